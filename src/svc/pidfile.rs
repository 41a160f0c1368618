use crate::svc::error::{Result, SysvError};
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// On-disk record of the tracked worker pid. The only durable supervisor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tracked pid, or `None` when the file is missing or does not hold a positive pid.
    pub fn read(&self) -> Option<Pid> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let pid: i32 = raw.split_whitespace().next()?.parse().ok()?;
        (pid > 0).then(|| Pid::from_raw(pid))
    }

    pub fn write(&self, pid: Pid) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| SysvError::io("create_dir_all", dir, e))?;
        }
        fs::write(&self.path, format!("{pid}\n")).map_err(|e| SysvError::io("write", &self.path, e))
    }

    /// Delete the file. Returns whether something was removed.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SysvError::io("remove", &self.path, e)),
        }
    }
}
