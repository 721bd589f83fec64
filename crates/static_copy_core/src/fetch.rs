use std::fmt;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{CopyConfig, DEFAULT_PARTIAL_EXIT_CODE, FetchSection};
use crate::error::FetchError;
use crate::ledger::{ErrorLedger, RecentLines};

const WAIT_TICK: Duration = Duration::from_millis(50);
const REDACTED: &str = "***";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        let keep = |value: Option<String>| value.filter(|value| !value.is_empty());
        Self {
            username: keep(username),
            password: keep(password),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Follow links from the URL and mirror everything reachable.
    Recursive,
    /// Retrieve one URL, recreating its host/path directories locally.
    ForceDirectories,
}

/// Typed argument vector for one fetch-tool invocation.
#[derive(Debug, Clone)]
pub struct FetchArgs {
    mode: FetchMode,
    policy: FetchSection,
    credentials: Credentials,
    url: String,
}

impl FetchArgs {
    pub fn recursive(policy: &FetchSection, credentials: &Credentials, url: &str) -> Self {
        Self {
            mode: FetchMode::Recursive,
            policy: policy.clone(),
            credentials: credentials.clone(),
            url: url.to_string(),
        }
    }

    pub fn single(credentials: &Credentials, url: &str) -> Self {
        Self {
            mode: FetchMode::ForceDirectories,
            policy: FetchSection::default(),
            credentials: credentials.clone(),
            url: url.to_string(),
        }
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn to_argv(&self) -> Vec<String> {
        self.build_argv(false)
    }

    /// Same as [`FetchArgs::to_argv`] with the password masked, for logs.
    pub fn to_redacted_argv(&self) -> Vec<String> {
        self.build_argv(true)
    }

    fn build_argv(&self, redact: bool) -> Vec<String> {
        let mut args = Vec::new();
        match self.mode {
            FetchMode::Recursive => {
                args.push("-r".to_string());
                args.push(format!("--timeout={}", self.policy.timeout_secs));
                args.push(format!("--tries={}", self.policy.tries));
                args.push(format!("--wait={}", self.policy.wait_secs));
                args.push(format!("--waitretry={}", self.policy.waitretry_secs));
                if self.policy.ignore_robots {
                    args.push("-e".to_string());
                    args.push("robots=off".to_string());
                }
            }
            FetchMode::ForceDirectories => args.push("--force-directories".to_string()),
        }
        if !self.credentials.is_empty() {
            args.push("--auth-no-challenge".to_string());
        }
        if let Some(username) = &self.credentials.username {
            args.push(format!("--user={username}"));
        }
        if let Some(password) = &self.credentials.password {
            let shown = if redact { REDACTED } else { password.as_str() };
            args.push(format!("--password={shown}"));
        }
        args.push(self.url.clone());
        args
    }
}

impl fmt::Display for FetchArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_redacted_argv().join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOutcome {
    Complete,
    /// The tool finished but reported that some files were not retrieved.
    Partial,
}

/// Maps a process exit code to an outcome. `None` means "no code"
/// (killed by a signal) and is never a success.
pub fn classify_exit(code: Option<i32>, partial_exit_code: i32) -> Option<FetchOutcome> {
    match code {
        Some(0) => Some(FetchOutcome::Complete),
        Some(code) if code == partial_exit_code => Some(FetchOutcome::Partial),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct FetchInvocation {
    pub args: FetchArgs,
    pub working_dir: PathBuf,
}

impl FetchInvocation {
    pub fn new(args: FetchArgs, working_dir: &Path) -> Self {
        Self {
            args,
            working_dir: working_dir.to_path_buf(),
        }
    }
}

/// The external capability that actually retrieves URLs.
pub trait BulkFetcher {
    /// Runs one invocation to completion. Diagnostic lines go into `ledger`;
    /// `on_poll` is called periodically while the invocation is in flight.
    fn fetch(
        &mut self,
        invocation: &FetchInvocation,
        ledger: &mut ErrorLedger,
        on_poll: &mut dyn FnMut(&ErrorLedger),
    ) -> Result<FetchOutcome, FetchError>;
}

/// Runs an external program (wget by default) as a child process.
#[derive(Debug, Clone)]
pub struct ProcessFetcher {
    program: String,
    partial_exit_code: i32,
    poll_interval: Duration,
    passthrough_stdout: bool,
}

impl ProcessFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            partial_exit_code: DEFAULT_PARTIAL_EXIT_CODE,
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
            passthrough_stdout: false,
        }
    }

    pub fn from_config(config: &CopyConfig, verbose: bool) -> Self {
        Self {
            program: config.fetch_program(),
            partial_exit_code: config.fetch.partial_exit_code,
            poll_interval: config.poll_interval(),
            passthrough_stdout: verbose,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn describe(&self, args: &FetchArgs) -> String {
        format!("{} {}", self.program, args)
    }

    fn wait_with_poll(
        &self,
        child: &mut std::process::Child,
        lines: &mpsc::Receiver<String>,
        recent: &mut RecentLines,
        ledger: &mut ErrorLedger,
        on_poll: &mut dyn FnMut(&ErrorLedger),
    ) -> std::io::Result<ExitStatus> {
        let mut last_poll = Instant::now();
        loop {
            for line in lines.try_iter() {
                absorb_line(line, recent, ledger);
            }
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if last_poll.elapsed() >= self.poll_interval {
                on_poll(ledger);
                last_poll = Instant::now();
            }
            thread::sleep(WAIT_TICK);
        }
    }
}

impl BulkFetcher for ProcessFetcher {
    fn fetch(
        &mut self,
        invocation: &FetchInvocation,
        ledger: &mut ErrorLedger,
        on_poll: &mut dyn FnMut(&ErrorLedger),
    ) -> Result<FetchOutcome, FetchError> {
        let command_line = self.describe(&invocation.args);
        debug!(command = %command_line, dir = %invocation.working_dir.display(), "spawning fetcher");

        let mut child = Command::new(&self.program)
            .args(invocation.args.to_argv())
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(if self.passthrough_stdout {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FetchError::Launch {
                program: self.program.clone(),
                working_dir: invocation.working_dir.clone(),
                source,
            })?;

        let (sender, receiver) = mpsc::channel();
        let reader = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut stderr = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match stderr.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    // Drain to EOF even if nobody is listening.
                    let _ = sender.send(line);
                }
            })
        });

        let mut recent = RecentLines::default();
        let waited = self.wait_with_poll(&mut child, &receiver, &mut recent, ledger, on_poll);
        if waited.is_err() {
            let _ = child.kill();
        }
        if let Some(reader) = reader {
            let _ = reader.join();
        }
        for line in receiver.try_iter() {
            absorb_line(line, &mut recent, ledger);
        }
        let status = waited.map_err(|source| FetchError::Wait {
            command: command_line.clone(),
            source,
        })?;

        match classify_exit(status.code(), self.partial_exit_code) {
            Some(outcome) => {
                info!(
                    "successfully ran command [{command_line}] in dir [{}]",
                    invocation.working_dir.display()
                );
                Ok(outcome)
            }
            None => {
                let recent = recent.to_vec();
                for line in &recent {
                    debug!(target: "static_copy::fetcher", "{line}");
                }
                match status.code() {
                    Some(code) => Err(FetchError::ExitStatus {
                        code,
                        command: command_line,
                        working_dir: invocation.working_dir.clone(),
                        recent,
                    }),
                    None => Err(FetchError::Signal {
                        command: command_line,
                        working_dir: invocation.working_dir.clone(),
                        recent,
                    }),
                }
            }
        }
    }
}

fn absorb_line(line: String, recent: &mut RecentLines, ledger: &mut ErrorLedger) {
    ledger.record(&line);
    recent.push(line);
}

#[cfg(test)]
mod tests {
    use super::{Credentials, FetchArgs, FetchMode, FetchOutcome, classify_exit};
    use crate::config::FetchSection;

    #[test]
    fn recursive_args_follow_policy() {
        let args = FetchArgs::recursive(
            &FetchSection::default(),
            &Credentials::default(),
            "https://example.com/proto/",
        );
        assert_eq!(args.mode(), FetchMode::Recursive);
        assert_eq!(
            args.to_argv(),
            vec![
                "-r",
                "--timeout=1",
                "--tries=5",
                "--wait=0.3",
                "--waitretry=2",
                "-e",
                "robots=off",
                "https://example.com/proto/",
            ]
        );
    }

    #[test]
    fn single_args_force_directories_with_credentials() {
        let credentials = Credentials::new(Some("user".to_string()), Some("p@ss word".to_string()));
        let args = FetchArgs::single(&credentials, "https://example.com/a.js");
        assert_eq!(
            args.to_argv(),
            vec![
                "--force-directories",
                "--auth-no-challenge",
                "--user=user",
                "--password=p@ss word",
                "https://example.com/a.js",
            ]
        );
        assert!(!args.to_string().contains("p@ss"));
        assert!(args.to_string().contains("--password=***"));
    }

    #[test]
    fn password_alone_still_requests_auth() {
        let credentials = Credentials::new(Some(String::new()), Some("secret".to_string()));
        assert_eq!(credentials.username, None);
        let args = FetchArgs::single(&credentials, "https://example.com/");
        assert_eq!(
            args.to_argv(),
            vec![
                "--force-directories",
                "--auth-no-challenge",
                "--password=secret",
                "https://example.com/",
            ]
        );
    }

    #[test]
    fn classify_exit_accepts_success_and_partial() {
        assert_eq!(classify_exit(Some(0), 3), Some(FetchOutcome::Complete));
        assert_eq!(classify_exit(Some(3), 3), Some(FetchOutcome::Partial));
        assert_eq!(classify_exit(Some(8), 3), None);
        assert_eq!(classify_exit(Some(8), 8), Some(FetchOutcome::Partial));
        assert_eq!(classify_exit(None, 3), None);
    }

    #[cfg(unix)]
    mod process {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::time::Duration;

        use tempfile::tempdir;

        use super::super::{BulkFetcher, FetchArgs, FetchInvocation, FetchOutcome, ProcessFetcher};
        use crate::error::FetchError;
        use crate::fetch::Credentials;
        use crate::ledger::ErrorLedger;

        fn write_script(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-fetch.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut permissions = fs::metadata(&path).expect("metadata").permissions();
            permissions.set_mode(0o755);
            fs::set_permissions(&path, permissions).expect("chmod");
            path.to_string_lossy().to_string()
        }

        #[test]
        fn partial_exit_is_success_and_stderr_is_recorded() {
            let temp = tempdir().expect("tempdir");
            let script = write_script(
                temp.path(),
                "echo 'touch' > fetched.txt\necho 'failed https://example.com/gone.css' >&2\nexit 3",
            );
            let mut fetcher =
                ProcessFetcher::new(script).with_poll_interval(Duration::from_millis(10));
            let invocation = FetchInvocation::new(
                FetchArgs::single(&Credentials::default(), "https://example.com/"),
                temp.path(),
            );
            let mut ledger = ErrorLedger::default();
            let outcome = fetcher
                .fetch(&invocation, &mut ledger, &mut |_| {})
                .expect("partial is success");

            assert_eq!(outcome, FetchOutcome::Partial);
            assert!(temp.path().join("fetched.txt").exists());
            assert_eq!(ledger.failed_urls(), &["https://example.com/gone.css".to_string()]);
        }

        #[test]
        fn other_exit_codes_fail_with_recent_lines() {
            let temp = tempdir().expect("tempdir");
            let script = write_script(
                temp.path(),
                "for i in 1 2 3 4 5 6 7; do echo \"line $i\" >&2; done\nexit 4",
            );
            let mut fetcher = ProcessFetcher::new(script);
            let invocation = FetchInvocation::new(
                FetchArgs::single(&Credentials::default(), "https://example.com/"),
                temp.path(),
            );
            let mut ledger = ErrorLedger::default();
            let err = fetcher
                .fetch(&invocation, &mut ledger, &mut |_| {})
                .expect_err("must fail");

            assert!(matches!(err, FetchError::ExitStatus { code: 4, .. }));
            assert_eq!(
                err.recent_lines(),
                &["line 3", "line 4", "line 5", "line 6", "line 7"].map(String::from)
            );
            assert!(err.to_string().contains("non-zero exit status [4]"));
        }

        #[test]
        fn poll_runs_while_process_is_alive() {
            let temp = tempdir().expect("tempdir");
            let script = write_script(temp.path(), "sleep 1\nexit 0");
            let mut fetcher =
                ProcessFetcher::new(script).with_poll_interval(Duration::from_millis(100));
            let invocation = FetchInvocation::new(
                FetchArgs::single(&Credentials::default(), "https://example.com/"),
                temp.path(),
            );
            let mut ledger = ErrorLedger::default();
            let mut polls = 0usize;
            let outcome = fetcher
                .fetch(&invocation, &mut ledger, &mut |_| polls += 1)
                .expect("success");
            assert_eq!(outcome, FetchOutcome::Complete);
            assert!(polls >= 2, "expected repeated polls, got {polls}");
        }

        #[test]
        fn non_utf8_stderr_does_not_stop_the_reader() {
            let temp = tempdir().expect("tempdir");
            let script = write_script(
                temp.path(),
                "printf 'saved caf\\351.html\\n' >&2\nsleep 0.2\ni=0\nwhile [ $i -lt 2000 ]; do echo \"https://example.com/page-$i.html\" >&2; i=$((i + 1)); done\ntouch done.txt\nexit 0",
            );
            let mut fetcher =
                ProcessFetcher::new(script).with_poll_interval(Duration::from_millis(10));
            let invocation = FetchInvocation::new(
                FetchArgs::single(&Credentials::default(), "https://example.com/"),
                temp.path(),
            );
            let mut ledger = ErrorLedger::default();
            let outcome = fetcher
                .fetch(&invocation, &mut ledger, &mut |_| {})
                .expect("fetcher runs to completion");

            assert_eq!(outcome, FetchOutcome::Complete);
            assert!(temp.path().join("done.txt").exists());
            assert_eq!(ledger.failure_count(), 2000);
            assert_eq!(
                ledger.recent_lines().last().map(String::as_str),
                Some("https://example.com/page-1999.html")
            );
        }

        #[test]
        fn lossy_lines_keep_their_readable_parts() {
            let temp = tempdir().expect("tempdir");
            let script = write_script(temp.path(), "printf 'saved caf\\351.html\\n' >&2\nexit 0");
            let mut fetcher = ProcessFetcher::new(script);
            let invocation = FetchInvocation::new(
                FetchArgs::single(&Credentials::default(), "https://example.com/"),
                temp.path(),
            );
            let mut ledger = ErrorLedger::default();
            fetcher
                .fetch(&invocation, &mut ledger, &mut |_| {})
                .expect("success");
            assert_eq!(ledger.recent_lines(), vec!["saved caf\u{FFFD}.html".to_string()]);
        }

        #[test]
        fn missing_program_is_a_launch_error() {
            let temp = tempdir().expect("tempdir");
            let mut fetcher = ProcessFetcher::new("/nonexistent/fetch-tool");
            let invocation = FetchInvocation::new(
                FetchArgs::single(&Credentials::default(), "https://example.com/"),
                temp.path(),
            );
            let err = fetcher
                .fetch(&invocation, &mut ErrorLedger::default(), &mut |_| {})
                .expect_err("must fail");
            assert!(matches!(err, FetchError::Launch { .. }));
        }
    }
}
