use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

static END_BLOCK_PATTERN: OnceLock<Regex> = OnceLock::new();

fn end_block_pattern() -> &'static Regex {
    END_BLOCK_PATTERN.get_or_init(|| {
        Regex::new(r"\{%\s*endblock\s*%\}").expect("endblock pattern is valid")
    })
}

pub fn homepage_link_markup(public_url: &str, source_url: &str) -> String {
    format!(r#"<p class="govuk-body"><a href="{public_url}">Downloaded copy of {source_url}.</a></p>"#)
}

/// Inserts the link before the first `{% endblock %}`. `None` when the
/// template has no such marker.
pub fn insert_homepage_link(template: &str, public_url: &str, source_url: &str) -> Option<String> {
    let marker = end_block_pattern().find(template)?;
    let mut output = String::with_capacity(template.len() + 128);
    output.push_str(&template[..marker.start()]);
    output.push_str(&homepage_link_markup(public_url, source_url));
    output.push_str(&template[marker.start()..]);
    Some(output)
}

/// Rewrites the homepage template in place. Returns `false` if no marker was found.
pub fn add_link_to_homepage(homepage_path: &Path, public_url: &str, source_url: &str) -> Result<bool> {
    let template = fs::read_to_string(homepage_path)
        .with_context(|| format!("failed to read {}", homepage_path.display()))?;
    let Some(updated) = insert_homepage_link(&template, public_url, source_url) else {
        return Ok(false);
    };
    fs::write(homepage_path, updated)
        .with_context(|| format!("failed to write {}", homepage_path.display()))?;
    Ok(true)
}
