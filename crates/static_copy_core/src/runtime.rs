use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::error::EnvironmentError;

pub const STATE_DIR_NAME: &str = ".static-copy";
pub const SCRATCH_DIR_NAME: &str = "prototype-static-copy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub temp_dir: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self {
            cwd,
            temp_dir: env::temp_dir(),
        })
    }
}

/// Filesystem locations of one prototype project.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub assets_dir: PathBuf,
    pub homepage_path: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub scratch_base: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub scratch_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nassets_dir={}\nhomepage_path={}\nstate_dir={}\nconfig_path={} ({})\nscratch_base={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.assets_dir),
            normalize_for_display(&self.homepage_path),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.scratch_base),
            self.scratch_source.as_str(),
        )
    }

    pub fn destination_for(&self, name: &str) -> PathBuf {
        self.assets_dir.join(name)
    }

    /// A fresh, timestamped scratch directory path under the scratch base.
    pub fn scratch_dir_for_run(&self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or(0);
        self.scratch_base.join(millis.to_string())
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);

    let state_dir = project_root.join(STATE_DIR_NAME);
    let app_dir = project_root.join("app");

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("STATIC_COPY_CONFIG")) {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (state_dir.join("config.toml"), ValueSource::Default)
    };

    let (scratch_base, scratch_source) =
        if let Some(value) = non_empty(lookup_env("STATIC_COPY_SCRATCH_DIR")) {
            (
                absolutize(Path::new(value.trim()), &context.cwd),
                ValueSource::Env,
            )
        } else {
            (
                context.temp_dir.join(SCRATCH_DIR_NAME),
                ValueSource::Default,
            )
        };

    Ok(ResolvedPaths {
        assets_dir: app_dir.join("assets"),
        homepage_path: app_dir.join("views").join("index.html"),
        project_root,
        state_dir,
        config_path,
        scratch_base,
        root_source,
        config_source,
        scratch_source,
    })
}

/// Fails unless the resolved root looks like a prototype (has `app/assets`).
pub fn ensure_prototype_root(paths: &ResolvedPaths) -> Result<(), EnvironmentError> {
    if paths.assets_dir.is_dir() {
        return Ok(());
    }
    Err(EnvironmentError::NotAPrototype {
        project_root: paths.project_root.clone(),
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = non_empty(lookup_env("STATIC_COPY_PROJECT_ROOT")) {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    detect_project_root_heuristic(&context.cwd)
}

fn detect_project_root_heuristic(cwd: &Path) -> (PathBuf, ValueSource) {
    let mut seen = HashSet::new();
    let mut cursor = Some(cwd);
    while let Some(candidate) = cursor {
        cursor = candidate.parent();
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join("app").join("assets").is_dir() {
            return (candidate.to_path_buf(), ValueSource::Heuristic);
        }
    }
    (cwd.to_path_buf(), ValueSource::Default)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        PathOverrides, ResolutionContext, SCRATCH_DIR_NAME, ValueSource, ensure_prototype_root,
        resolve_paths_with_lookup,
    };
    use crate::error::EnvironmentError;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
            temp_dir: temp.path().join("tmp"),
        };

        let env = HashMap::from([(
            "STATIC_COPY_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.assets_dir, from_flag.join("app").join("assets"));
    }

    #[test]
    fn resolve_paths_finds_prototype_in_ancestor() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("prototype");
        let nested = root.join("app").join("views").join("deep");
        fs::create_dir_all(root.join("app").join("assets")).expect("assets");
        fs::create_dir_all(&nested).expect("nested");

        let context = ResolutionContext {
            cwd: nested,
            temp_dir: temp.path().join("tmp"),
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
        assert_eq!(
            resolved.homepage_path,
            root.join("app").join("views").join("index.html")
        );
        assert_eq!(
            resolved.scratch_base,
            temp.path().join("tmp").join(SCRATCH_DIR_NAME)
        );
        ensure_prototype_root(&resolved).expect("prototype root");
    }

    #[test]
    fn ensure_prototype_root_rejects_plain_directory() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
            temp_dir: temp.path().join("tmp"),
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.root_source, ValueSource::Default);

        let err = ensure_prototype_root(&resolved).expect_err("must fail");
        assert!(matches!(err, EnvironmentError::NotAPrototype { .. }));
        assert_eq!(err.exit_code(), 10);
    }

    #[test]
    fn scratch_and_config_follow_env_overrides() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let context = ResolutionContext {
            cwd: root.clone(),
            temp_dir: temp.path().join("tmp"),
        };
        let env = HashMap::from([
            ("STATIC_COPY_SCRATCH_DIR".to_string(), "scratch".to_string()),
            ("STATIC_COPY_CONFIG".to_string(), "conf/copy.toml".to_string()),
        ]);
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve");
        assert_eq!(resolved.scratch_base, root.join("scratch"));
        assert_eq!(resolved.scratch_source, ValueSource::Env);
        assert_eq!(resolved.config_path, root.join("conf").join("copy.toml"));
        assert_eq!(resolved.config_source, ValueSource::Env);

        let scratch = resolved.scratch_dir_for_run();
        assert!(scratch.starts_with(&resolved.scratch_base));
    }
}
