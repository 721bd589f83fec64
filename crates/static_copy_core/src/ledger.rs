use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

pub const RECENT_LINES_CAPACITY: usize = 5;

static URL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn url_pattern() -> &'static Regex {
    URL_PATTERN.get_or_init(|| Regex::new(r"https?://\S+").expect("url pattern is valid"))
}

/// Fixed-capacity buffer of the most recent lines; the oldest is evicted first.
#[derive(Debug, Clone, Serialize)]
pub struct RecentLines {
    capacity: usize,
    lines: VecDeque<String>,
}

impl RecentLines {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for RecentLines {
    fn default() -> Self {
        Self::new(RECENT_LINES_CAPACITY)
    }
}

/// Fetch-tool diagnostics gathered over a run. Only used for reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorLedger {
    recent: RecentLines,
    failed_urls: Vec<String>,
    #[serde(skip)]
    seen_urls: HashSet<String>,
}

impl ErrorLedger {
    pub fn record(&mut self, line: &str) {
        self.recent.push(line.to_string());
        if let Some(url) = extract_url(line) {
            self.record_url(url);
        }
    }

    pub fn record_url(&mut self, url: &str) {
        if self.seen_urls.insert(url.to_string()) {
            self.failed_urls.push(url.to_string());
        }
    }

    pub fn recent_lines(&self) -> Vec<String> {
        self.recent.to_vec()
    }

    pub fn failed_urls(&self) -> &[String] {
        &self.failed_urls
    }

    pub fn failure_count(&self) -> usize {
        self.failed_urls.len()
    }
}

/// First `http(s)://` token in a diagnostic line.
pub fn extract_url(line: &str) -> Option<&str> {
    url_pattern().find(line).map(|found| found.as_str())
}
