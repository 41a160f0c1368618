//! Pid-file lifecycle supervisor.
//!
//! Each call runs one transition to completion and returns. Nothing is held between calls:
//! "running" means the pid file names a live process, and that is re-derived every time.
//! Concurrent invocations are not serialized.

use crate::svc::layout::SysvLayout;
use crate::svc::launcher::{LaunchSpec, Launcher};
use crate::svc::logger::Logger;
use crate::svc::pidfile::PidFile;
use crate::svc::proc::ProcessTable;
use crate::svc::retry::{retry, Clock, DISCOVERY, STOP_CONFIRM};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const USAGE_ACTIONS: &str = "{start|stop|restart|status}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "status" => Ok(Action::Status),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Status => "status",
        })
    }
}

/// Result of one transition, with the operator-facing message and exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    AlreadyStarted(Pid),
    Started(Pid),
    StartFailed { stdout_log: PathBuf, stderr_log: PathBuf },
    NotRunning,
    Stopped,
    StopTimedOut(Pid),
    RestartAborted,
    Running { name: String, pid: Pid },
    Down { name: String },
}

impl Report {
    pub fn success(&self) -> bool {
        matches!(
            self,
            Report::AlreadyStarted(_)
                | Report::Started(_)
                | Report::NotRunning
                | Report::Stopped
                | Report::Running { .. }
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::AlreadyStarted(_) => f.write_str("Already started"),
            Report::Started(pid) => write!(f, "Started (pid {pid})"),
            Report::StartFailed { stdout_log, stderr_log } => write!(
                f,
                "Unable to start, see {} and {}",
                stdout_log.display(),
                stderr_log.display()
            ),
            Report::NotRunning => f.write_str("Not running"),
            Report::Stopped => f.write_str("Stopped"),
            Report::StopTimedOut(_) => {
                f.write_str("Not stopped; may still be shutting down or shutdown may have failed")
            }
            Report::RestartAborted => f.write_str("Unable to stop, will not attempt to start"),
            Report::Running { name, .. } => write!(f, "{name} Running"),
            Report::Down { name } => write!(f, "{name} Stopped"),
        }
    }
}

pub struct Supervisor {
    name: String,
    pid_file: PidFile,
    spec: LaunchSpec,
    procs: Arc<dyn ProcessTable>,
    launcher: Arc<dyn Launcher>,
    clock: Arc<dyn Clock>,
    log: Arc<dyn Logger>,
}

impl Supervisor {
    pub fn new(
        spec: LaunchSpec,
        layout: &SysvLayout,
        procs: Arc<dyn ProcessTable>,
        launcher: Arc<dyn Launcher>,
        clock: Arc<dyn Clock>,
        log: Arc<dyn Logger>,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            pid_file: PidFile::new(layout.pid_file(&spec.name)),
            spec,
            procs,
            launcher,
            clock,
            log,
        }
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Tracked pid if the pid file exists and names a live process. A stale file reads as stopped.
    pub fn running_pid(&self) -> Option<Pid> {
        self.pid_file.read().filter(|pid| self.procs.is_alive(*pid))
    }

    pub fn run(&self, action: Action) -> anyhow::Result<Report> {
        match action {
            Action::Start => self.start(),
            Action::Stop => self.stop(),
            Action::Restart => self.restart(),
            Action::Status => Ok(self.status()),
        }
    }

    pub fn start(&self) -> anyhow::Result<Report> {
        if let Some(pid) = self.running_pid() {
            self.log.info("start", &format!("outcome=already_running pid={pid}"));
            return Ok(Report::AlreadyStarted(pid));
        }
        self.log.info("start", &format!("attempt=start cmd={}", self.spec.command_line));
        let failed = || Report::StartFailed {
            stdout_log: self.spec.stdout_log.clone(),
            stderr_log: self.spec.stderr_log.clone(),
        };

        let launcher_pid = match self.launcher.launch(&self.spec) {
            Ok(pid) => pid,
            Err(e) => {
                self.log.error("start", &format!("outcome=launch_failed err={e:#}"));
                return Ok(failed());
            }
        };

        let tracked = self.discover_worker(launcher_pid);
        self.pid_file.write(tracked)?;

        match self.running_pid() {
            Some(pid) => {
                self.log.info("start", &format!("outcome=started pid={pid}"));
                Ok(Report::Started(pid))
            }
            None => {
                self.log.error("start", &format!("outcome=not_running pid={tracked}"));
                Ok(failed())
            }
        }
    }

    /// Find the real worker behind the process we spawned.
    ///
    /// A child of the launcher is the worker; the launcher is then killed and reaped. With no
    /// child inside the discovery window the launcher itself is assumed to be the worker.
    fn discover_worker(&self, launcher: Pid) -> Pid {
        let found = retry(self.clock.as_ref(), DISCOVERY, |_| {
            self.procs
                .children_of(launcher)
                .ok()
                .and_then(|kids| kids.into_iter().min_by_key(|p| p.as_raw()))
        });
        match found {
            Ok(child) => {
                self.log.info(
                    "start",
                    &format!("outcome=worker_found launcher={launcher} worker={child}"),
                );
                if let Err(e) = self.procs.signal(launcher, Signal::SIGKILL) {
                    self.log.warn("start", &format!("outcome=launcher_kill_failed err={e:#}"));
                }
                self.procs.reap(launcher);
                child
            }
            Err(t) => {
                self.log.warn(
                    "start",
                    &format!(
                        "outcome=no_child attempts={} decision=track_launcher pid={launcher}",
                        t.attempts
                    ),
                );
                launcher
            }
        }
    }

    pub fn stop(&self) -> anyhow::Result<Report> {
        let Some(pid) = self.running_pid() else {
            self.log.info("stop", "outcome=not_running");
            return Ok(Report::NotRunning);
        };
        self.log.info("stop", &format!("attempt=signal sig=SIGTERM pid={pid}"));
        self.procs.signal(pid, Signal::SIGTERM)?;

        let gone = retry(self.clock.as_ref(), STOP_CONFIRM, |_| {
            self.running_pid().is_none().then_some(())
        });
        if gone.is_err() && self.running_pid().is_some() {
            self.log.error(
                "stop",
                &format!("outcome=timeout pid={pid} window_s={}", STOP_CONFIRM.window().as_secs()),
            );
            return Ok(Report::StopTimedOut(pid));
        }
        self.pid_file.remove()?;
        self.log.info("stop", &format!("outcome=stopped pid={pid}"));
        Ok(Report::Stopped)
    }

    /// Stop, then start. Never starts on top of an instance that refused to stop.
    pub fn restart(&self) -> anyhow::Result<Report> {
        let stopped = self.stop()?;
        if self.running_pid().is_some() {
            self.log.error("restart", &format!("outcome=aborted stop={stopped:?}"));
            return Ok(Report::RestartAborted);
        }
        self.start()
    }

    pub fn status(&self) -> Report {
        match self.running_pid() {
            Some(pid) => Report::Running {
                name: self.name.clone(),
                pid,
            },
            None => Report::Down {
                name: self.name.clone(),
            },
        }
    }
}
