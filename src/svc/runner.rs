use crate::svc::error::RunError;
use std::ffi::OsStr;
use std::process::{Command, Stdio};

/// Seam for external tools (chkconfig, update-rc.d, service, sudo).
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &OsStr, args: &[&str]) -> Result<(), RunError>;
}

/// Runs commands for real, waiting for each to finish.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &OsStr, args: &[&str]) -> Result<(), RunError> {
        tracing::debug!(program = %program.to_string_lossy(), ?args, "run");
        let out = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .map_err(RunError::Spawn)?;
        if out.status.success() {
            return Ok(());
        }
        Err(RunError::Failed {
            status: out.status,
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}
