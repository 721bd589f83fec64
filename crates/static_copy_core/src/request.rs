use anyhow::{Result, bail};
use url::Url;

use crate::fetch::Credentials;

/// Validated details for one copy run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub name: String,
    pub url: String,
    pub credentials: Credentials,
}

impl CopyRequest {
    pub fn new(
        name: &str,
        url: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let name = validate_name(name)?;
        let url = validate_url(url)?;
        Ok(Self {
            name,
            url,
            credentials: Credentials::new(username, password),
        })
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("copy name must not be empty");
    }
    if trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
        bail!("copy name must be a single folder name, got `{trimmed}`");
    }
    Ok(trimmed.to_string())
}

fn validate_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(parsed) => parsed,
        Err(error) => bail!("`{trimmed}` is not an absolute URL: {error}"),
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("unsupported URL scheme `{}` (expected http or https)", parsed.scheme());
    }
    if parsed.host_str().is_none() {
        bail!("`{trimmed}` has no host");
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::CopyRequest;

    #[test]
    fn accepts_name_url_and_optional_credentials() {
        let request = CopyRequest::new(
            " my-copy ",
            "https://example.com/proto/",
            Some("user".to_string()),
            Some(String::new()),
        )
        .expect("valid request");
        assert_eq!(request.name, "my-copy");
        assert_eq!(request.url, "https://example.com/proto/");
        assert_eq!(request.credentials.username.as_deref(), Some("user"));
        assert_eq!(request.credentials.password, None);
    }

    #[test]
    fn rejects_names_that_escape_the_assets_folder() {
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(
                CopyRequest::new(name, "https://example.com/", None, None).is_err(),
                "name {name:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_relative_and_non_http_urls() {
        let err = CopyRequest::new("copy", "example.com/page", None, None).expect_err("relative");
        assert!(err.to_string().contains("not an absolute URL"));
        let err = CopyRequest::new("copy", "ftp://example.com/", None, None).expect_err("ftp");
        assert!(err.to_string().contains("unsupported URL scheme"));
    }
}
