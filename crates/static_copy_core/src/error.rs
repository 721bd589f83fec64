use std::path::PathBuf;

use thiserror::Error;

pub const EXIT_NOT_A_PROTOTYPE: i32 = 10;
pub const EXIT_SCRATCH_UNREADABLE: i32 = 11;

/// Invocation-context failures. These abort the run immediately.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error(
        "It looks like you're not in a prototype ({} has no app/assets), please run this command from inside a prototype",
        .project_root.display()
    )]
    NotAPrototype { project_root: PathBuf },
    #[error("Couldn't read dir {}: {source}", .path.display())]
    ScratchUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EnvironmentError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotAPrototype { .. } => EXIT_NOT_A_PROTOTYPE,
            Self::ScratchUnreadable { .. } => EXIT_SCRATCH_UNREADABLE,
        }
    }
}

/// A single fetch-tool invocation that did not succeed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch {program} in dir [{}]: {source}", .working_dir.display())]
    Launch {
        program: String,
        working_dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "non-zero exit status [{code}] for command [{command}] in dir [{}]",
        .working_dir.display()
    )]
    ExitStatus {
        code: i32,
        command: String,
        working_dir: PathBuf,
        recent: Vec<String>,
    },
    #[error(
        "command [{command}] in dir [{}] was terminated by a signal",
        .working_dir.display()
    )]
    Signal {
        command: String,
        working_dir: PathBuf,
        recent: Vec<String>,
    },
    #[error("failed while waiting for command [{command}]: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Most recent diagnostic lines captured from the failed invocation.
    pub fn recent_lines(&self) -> &[String] {
        match self {
            Self::ExitStatus { recent, .. } | Self::Signal { recent, .. } => recent,
            Self::Launch { .. } | Self::Wait { .. } => &[],
        }
    }
}
