use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::PathBuf;

/// View of the OS process table the supervisor needs.
pub trait ProcessTable: Send + Sync {
    fn is_alive(&self, pid: Pid) -> bool;
    /// Direct children of `pid`, lowest pid first.
    fn children_of(&self, pid: Pid) -> anyhow::Result<Vec<Pid>>;
    /// Deliver `sig`. A process that is already gone is not an error.
    fn signal(&self, pid: Pid, sig: Signal) -> anyhow::Result<()>;
    /// Collect the exit status of a child of this process, if it is one.
    fn reap(&self, pid: Pid);
}

/// `/proc` backed process table.
#[derive(Debug, Clone)]
pub struct LinuxProcessTable {
    proc_root: PathBuf,
}

impl Default for LinuxProcessTable {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatFields {
    pub(crate) state: char,
    pub(crate) ppid: i32,
}

/// Parse the fields after `comm` in `/proc/<pid>/stat`. `comm` may contain spaces and parens,
/// so split after the last `)`.
pub(crate) fn parse_stat(raw: &str) -> Option<StatFields> {
    let rest = &raw[raw.rfind(')')? + 1..];
    let mut it = rest.split_whitespace();
    let state = it.next()?.chars().next()?;
    let ppid = it.next()?.parse().ok()?;
    Some(StatFields { state, ppid })
}

impl LinuxProcessTable {
    pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn stat(&self, pid: i32) -> Option<StatFields> {
        let raw = fs::read_to_string(self.proc_root.join(pid.to_string()).join("stat")).ok()?;
        parse_stat(&raw)
    }

    fn scan_children(&self, parent: i32) -> io::Result<Vec<Pid>> {
        let mut out = Vec::new();
        for ent in fs::read_dir(&self.proc_root)? {
            let ent = match ent {
                Ok(e) => e,
                // Entries vanish while we iterate.
                Err(_) => continue,
            };
            let Some(pid) = ent.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            if let Some(st) = self.stat(pid) {
                if st.ppid == parent && st.state != 'Z' {
                    out.push(Pid::from_raw(pid));
                }
            }
        }
        out.sort_by_key(|p| p.as_raw());
        Ok(out)
    }
}

impl ProcessTable for LinuxProcessTable {
    fn is_alive(&self, pid: Pid) -> bool {
        if pid.as_raw() <= 0 {
            return false;
        }
        let exists = match kill(pid, None) {
            Ok(()) => true,
            // Owned by someone else, still a live process.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        };
        // Zombies answer kill(0) but have already exited.
        exists && self.stat(pid.as_raw()).map_or(true, |st| st.state != 'Z')
    }

    fn children_of(&self, pid: Pid) -> anyhow::Result<Vec<Pid>> {
        self.scan_children(pid.as_raw()).map_err(|e| {
            anyhow::anyhow!("scan {} for children of {pid}: {e}", self.proc_root.display())
        })
    }

    fn signal(&self, pid: Pid, sig: Signal) -> anyhow::Result<()> {
        anyhow::ensure!(pid.as_raw() > 0, "refusing to signal pid {pid}");
        match kill(pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("kill pid={pid} sig={sig} failed: {e}")),
        }
    }

    fn reap(&self, pid: Pid) {
        // ECHILD when the pid was never ours; nothing to collect then.
        match waitpid(pid, None) {
            Ok(st) => tracing::debug!(%pid, ?st, "reaped"),
            Err(e) => tracing::debug!(%pid, err = %e, "reap skipped"),
        }
    }
}
