use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::bytes::{Captures, Regex};
use serde::Serialize;

static REWRITE_PATTERN: OnceLock<Regex> = OnceLock::new();
static DISCOVERY_PATTERN: OnceLock<Regex> = OnceLock::new();

fn rewrite_pattern() -> &'static Regex {
    REWRITE_PATTERN.get_or_init(|| {
        Regex::new(r#"(href|src|action)(="?)/"#).expect("rewrite pattern is valid")
    })
}

fn discovery_pattern() -> &'static Regex {
    DISCOVERY_PATTERN.get_or_init(|| {
        Regex::new(r#"(?:href|src|action)="(/(?-u:[^"])+)""#).expect("discovery pattern is valid")
    })
}

/// Prefixes every root-relative `href`/`src`/`action` value with `mount`.
/// Attribute names and quoting are kept exactly as found; everything else in
/// the page is left byte-for-byte intact, whatever its encoding.
pub fn rewrite_references<'a>(page: &'a [u8], mount: &str) -> Cow<'a, [u8]> {
    let mount = mount.trim_end_matches('/').as_bytes();
    rewrite_pattern().replace_all(page, |caps: &Captures| {
        let mut replacement = Vec::with_capacity(caps[0].len() + mount.len());
        replacement.extend_from_slice(&caps[1]);
        replacement.extend_from_slice(&caps[2]);
        replacement.extend_from_slice(mount);
        replacement.push(b'/');
        replacement
    })
}

/// Root-relative, double-quoted references that look like files, with query
/// strings removed, deduplicated in first-seen order.
pub fn discover_references(page: &[u8]) -> Vec<String> {
    let mut found = ReferenceSet::default();
    for caps in discovery_pattern().captures_iter(page) {
        if let Some(path) = file_like_path(&String::from_utf8_lossy(&caps[1])) {
            found.insert(path);
        }
    }
    found.into_vec()
}

fn file_like_path(value: &str) -> Option<String> {
    let path = value.split('?').next().unwrap_or(value);
    let last_slash = path.rfind('/');
    let last_dot = path.rfind('.')?;
    match last_slash {
        Some(slash) if last_dot < slash => None,
        _ => Some(path.to_string()),
    }
}

/// Insertion-ordered set of discovered reference paths.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ReferenceSet {
    ordered: Vec<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl ReferenceSet {
    pub fn insert(&mut self, path: String) -> bool {
        if !self.seen.insert(path.clone()) {
            return false;
        }
        self.ordered.push(path);
        true
    }

    pub fn extend<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        for path in paths {
            self.insert(path);
        }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

impl FromIterator<String> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::default();
        set.extend(iter);
        set
    }
}
