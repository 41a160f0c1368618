use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Failure of a single external command (chkconfig, update-rc.d, service, sudo).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),
    #[error("exited with {status}{}", fmt_stderr(.stderr))]
    Failed { status: ExitStatus, stderr: String },
}

fn fmt_stderr(stderr: &str) -> String {
    let t = stderr.trim();
    if t.is_empty() { String::new() } else { format!(": {t}") }
}

#[derive(Debug, thiserror::Error)]
pub enum SysvError {
    #[error("user services are not supported on SystemV")]
    UserServiceUnsupported,

    #[error("invalid service name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("init script already exists: {}", .0.display())]
    AlreadyInstalled(PathBuf),

    #[error("unknown user {0:?}")]
    UnknownUser(String),

    #[error("render init script for {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: askama::Error,
    },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{program} {}: {source}", args.join(" "))]
    Command {
        program: String,
        args: Vec<String>,
        #[source]
        source: RunError,
    },
}

impl SysvError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SysvError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = SysvError> = std::result::Result<T, E>;
