use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FETCH_PROGRAM: &str = "wget";
pub const DEFAULT_PUBLIC_PREFIX: &str = "/public";
pub const DEFAULT_PARTIAL_EXIT_CODE: i32 = 3;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct CopyConfig {
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub copy: CopySection,
}

/// Retry/backoff/timeout policy handed to the bulk fetcher.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FetchSection {
    pub program: Option<String>,
    pub timeout_secs: u32,
    pub tries: u32,
    pub wait_secs: f64,
    pub waitretry_secs: u32,
    pub ignore_robots: bool,
    pub partial_exit_code: i32,
    pub poll_interval_ms: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            program: None,
            timeout_secs: 1,
            tries: 5,
            wait_secs: 0.3,
            waitretry_secs: 2,
            ignore_robots: true,
            partial_exit_code: DEFAULT_PARTIAL_EXIT_CODE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CopySection {
    pub public_prefix: Option<String>,
}

impl CopyConfig {
    /// Resolve the fetch program: env STATIC_COPY_FETCH_PROGRAM > config > `wget`.
    pub fn fetch_program(&self) -> String {
        if let Ok(value) = env::var("STATIC_COPY_FETCH_PROGRAM") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.fetch
            .program
            .clone()
            .unwrap_or_else(|| DEFAULT_FETCH_PROGRAM.to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.fetch.poll_interval_ms.max(1))
    }

    /// Mount path for a named copy, e.g. `/public/my-copy`.
    pub fn public_url(&self, name: &str) -> String {
        let prefix = self
            .copy
            .public_prefix
            .as_deref()
            .unwrap_or(DEFAULT_PUBLIC_PREFIX)
            .trim_end_matches('/');
        format!("{prefix}/{name}")
    }
}

/// `LOG_EVERYTHING=true` turns on fetcher passthrough and debug logging.
pub fn log_everything() -> bool {
    env::var("LOG_EVERYTHING").is_ok_and(|value| value.trim() == "true")
}

/// Load and parse a CopyConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CopyConfig> {
    if !config_path.exists() {
        return Ok(CopyConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CopyConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
