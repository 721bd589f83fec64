use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};

const NAME_PROMPT: &str =
    "We're going to download a static copy of a prototype, what name do you want to use for this copy? ";
const URL_PROMPT: &str = "What's the URL (address) of the prototype you want to copy? ";
const USERNAME_PROMPT: &str = "If it needs a username to log in, what is that username? ";
const PASSWORD_PROMPT: &str = "If it needs a password to log in what is that password? ";

/// Raw answers before validation. Empty credentials mean "none".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyDetails {
    pub name: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Positional arguments win; with no positionals every detail is prompted for.
pub fn details_from_args(
    name: Option<String>,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<Option<CopyDetails>> {
    match (name, url) {
        (None, None) => {
            if username.is_some() || password.is_some() {
                bail!("credentials were given without a NAME and URL");
            }
            Ok(None)
        }
        (Some(name), Some(url)) => Ok(Some(CopyDetails {
            name,
            url,
            username,
            password,
        })),
        (Some(_), None) | (None, Some(_)) => {
            bail!("expected both NAME and URL (or no arguments to be asked interactively)")
        }
    }
}

pub fn prompt_details<R, W, P>(input: &mut R, output: &mut W, read_password: P) -> Result<CopyDetails>
where
    R: BufRead,
    W: Write,
    P: FnOnce(&str) -> io::Result<String>,
{
    let name = prompt_line(input, output, NAME_PROMPT)?;
    let url = prompt_line(input, output, URL_PROMPT)?;
    let username = prompt_line(input, output, USERNAME_PROMPT)?;
    let password = read_password(PASSWORD_PROMPT).context("failed to read password")?;

    let details = CopyDetails {
        name,
        url,
        username: Some(username).filter(|value| !value.is_empty()),
        password: Some(password.trim_end_matches(['\r', '\n']).to_string())
            .filter(|value| !value.is_empty()),
    };
    writeln!(output, "{}", render_details(&details))?;
    Ok(details)
}

fn prompt_line<R: BufRead, W: Write>(input: &mut R, output: &mut W, message: &str) -> Result<String> {
    write!(output, "{message}")?;
    output.flush()?;
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read answer from stdin")?;
    Ok(line.trim().to_string())
}

/// Echo of the collected answers with the password masked.
pub fn render_details(details: &CopyDetails) -> String {
    let password = details
        .password
        .as_ref()
        .map(|value| "*".repeat(value.chars().count()))
        .unwrap_or_default();
    [
        ("name", details.name.as_str()),
        ("url", details.url.as_str()),
        ("username", details.username.as_deref().unwrap_or("")),
        ("password", password.as_str()),
    ]
    .iter()
    .map(|(key, value)| format!("{key:<10} | {value}"))
    .collect::<Vec<_>>()
    .join("\n")
}
