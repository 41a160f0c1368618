//! Installs the init script and wires it into boot/shutdown sequencing.
//!
//! Registration picks the first tool present: chkconfig, then update-rc.d, then hand-made
//! `rc{N}.d` symlinks. Uninstall re-runs the same detection instead of remembering the choice,
//! so a host that gained or lost a tool in between is cleaned up with the new mechanism.

use crate::svc::descriptor::ServiceDescriptor;
use crate::svc::error::{Result, SysvError};
use crate::svc::layout::SysvLayout;
use crate::svc::logger::Logger;
use crate::svc::pidfile::PidFile;
use crate::svc::proc::{LinuxProcessTable, ProcessTable};
use crate::svc::runner::CommandRunner;
use crate::svc::template::render_init_script;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SCRIPT_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Chkconfig(PathBuf),
    UpdateRcD(PathBuf),
    Symlinks,
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Chkconfig(_) => f.write_str("chkconfig"),
            Registration::UpdateRcD(_) => f.write_str("update-rc.d"),
            Registration::Symlinks => f.write_str("rc.d symlinks"),
        }
    }
}

/// A tool counts as present unless stat says it does not exist.
fn tool_present(p: &Path) -> bool {
    match fs::metadata(p) {
        Ok(_) => true,
        Err(e) => e.kind() != io::ErrorKind::NotFound,
    }
}

impl Registration {
    pub fn detect(layout: &SysvLayout) -> Self {
        let r = if tool_present(&layout.chkconfig) {
            Registration::Chkconfig(layout.chkconfig.clone())
        } else if tool_present(&layout.update_rc_d) {
            Registration::UpdateRcD(layout.update_rc_d.clone())
        } else {
            Registration::Symlinks
        };
        tracing::debug!(mechanism = %r, "registration detected");
        r
    }

    fn register_command<'a>(&'a self, name: &'a str) -> Option<(&'a Path, Vec<&'a str>)> {
        match self {
            Registration::Chkconfig(tool) => Some((tool.as_path(), vec!["--add", name])),
            Registration::UpdateRcD(tool) => Some((tool.as_path(), vec![name, "defaults"])),
            Registration::Symlinks => None,
        }
    }

    fn deregister_command<'a>(&'a self, name: &'a str) -> Option<(&'a Path, Vec<&'a str>)> {
        match self {
            Registration::Chkconfig(tool) => Some((tool.as_path(), vec!["--del", name])),
            Registration::UpdateRcD(tool) => Some((tool.as_path(), vec!["-f", name, "remove"])),
            Registration::Symlinks => None,
        }
    }
}

/// Outcome of a collect-and-ignore loop: what was done and what was skipped (with why).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BestEffort {
    pub done: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
}

impl BestEffort {
    fn record(&mut self, path: PathBuf, r: io::Result<()>) {
        match r {
            Ok(()) => self.done.push(path),
            Err(e) => self.skipped.push((path, e.to_string())),
        }
    }

    fn report(&self, log: &dyn Logger, component: &str, what: &str) {
        for (p, why) in &self.skipped {
            log.warn(component, &format!("outcome=skipped {what}={} err={why}", p.display()));
        }
        log.info(
            component,
            &format!("outcome={what}s done={} skipped={}", self.done.len(), self.skipped.len()),
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub script: PathBuf,
    pub registration: Registration,
    /// Only populated by the symlink fallback.
    pub links: BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub script: PathBuf,
    pub registration: Registration,
    /// Set when the chkconfig/update-rc.d removal failed; the script and logs are removed anyway.
    pub deregister_error: Option<String>,
    pub links: BestEffort,
    /// Log and pid files removed (or failing to be removed). Absent files appear in neither list.
    pub cleanup: BestEffort,
}

pub struct Installer {
    layout: SysvLayout,
    runner: Arc<dyn CommandRunner>,
    log: Arc<dyn Logger>,
    procs: Arc<dyn ProcessTable>,
}

impl Installer {
    pub fn new(layout: SysvLayout, runner: Arc<dyn CommandRunner>, log: Arc<dyn Logger>) -> Self {
        Self {
            layout,
            runner,
            log,
            procs: Arc::new(LinuxProcessTable::default()),
        }
    }

    /// Replace the process table used to spot a worker that is still running at uninstall.
    pub fn with_process_table(mut self, procs: Arc<dyn ProcessTable>) -> Self {
        self.procs = procs;
        self
    }

    pub fn install(&self, desc: &ServiceDescriptor) -> Result<InstallReport> {
        desc.validate()?;
        let name = desc.name.as_str();
        let script = self.layout.init_script(name);
        if fs::symlink_metadata(&script).is_ok() {
            return Err(SysvError::AlreadyInstalled(script));
        }

        let body = render_init_script(desc, &self.layout)?;
        self.log.info("install", &format!("attempt=write_script path={}", script.display()));
        write_script(&script, &body)?;

        let registration = Registration::detect(&self.layout);
        self.log.info("install", &format!("attempt=register mechanism={registration}"));
        let mut links = BestEffort::default();
        match registration.register_command(name) {
            Some((tool, args)) => self.run_tool(tool, &args)?,
            None => {
                for link in self.layout.runlevel_links(name) {
                    let r = std::os::unix::fs::symlink(&script, &link);
                    links.record(link, r);
                }
                links.report(self.log.as_ref(), "install", "link");
            }
        }
        self.log.info("install", &format!("outcome=installed mechanism={registration}"));
        Ok(InstallReport {
            script,
            registration,
            links,
        })
    }

    pub fn uninstall(&self, desc: &ServiceDescriptor) -> Result<UninstallReport> {
        desc.validate()?;
        let name = desc.name.as_str();
        let script = self.layout.init_script(name);

        let registration = Registration::detect(&self.layout);
        self.log.info("uninstall", &format!("attempt=deregister mechanism={registration}"));
        let mut links = BestEffort::default();
        let mut deregister_error = None;
        match registration.deregister_command(name) {
            // A host whose registration never succeeded must still be uninstallable.
            Some((tool, args)) => {
                if let Err(e) = self.run_tool(tool, &args) {
                    self.log.warn(
                        "uninstall",
                        &format!("outcome=deregister_failed decision=continue err={e}"),
                    );
                    deregister_error = Some(e.to_string());
                }
            }
            None => {
                for link in self.layout.runlevel_links(name) {
                    if fs::symlink_metadata(&link).is_ok() {
                        let r = fs::remove_file(&link);
                        links.record(link, r);
                    }
                }
                links.report(self.log.as_ref(), "uninstall", "link");
            }
        }

        fs::remove_file(&script).map_err(|e| SysvError::io("remove", &script, e))?;
        self.log.info("uninstall", &format!("outcome=script_removed path={}", script.display()));

        let pid_file = PidFile::new(self.layout.pid_file(name));
        if let Some(pid) = pid_file.read().filter(|p| self.procs.is_alive(*p)) {
            self.log.warn(
                "uninstall",
                &format!(
                    "outcome=worker_still_running pid={pid} pid_file={}",
                    pid_file.path().display()
                ),
            );
        }

        let mut cleanup = BestEffort::default();
        let leftovers = self
            .layout
            .log_paths(name)
            .into_iter()
            .chain(std::iter::once(pid_file.path().to_path_buf()));
        for p in leftovers {
            match fs::remove_file(&p) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                r => cleanup.record(p, r),
            }
        }
        cleanup.report(self.log.as_ref(), "uninstall", "file");

        Ok(UninstallReport {
            script,
            registration,
            deregister_error,
            links,
            cleanup,
        })
    }

    fn run_tool(&self, tool: &Path, args: &[&str]) -> Result<()> {
        self.runner.run(tool.as_os_str(), args).map_err(|source| {
            self.log.error(
                "register",
                &format!("outcome=failed tool={} args={args:?} err={source}", tool.display()),
            );
            SysvError::Command {
                program: tool.display().to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                source,
            }
        })
    }
}

fn write_script(path: &Path, body: &str) -> Result<()> {
    // create_new closes the window between the existence probe and the write.
    let mut f = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(SCRIPT_MODE)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => SysvError::AlreadyInstalled(path.to_path_buf()),
            _ => SysvError::io("create", path, e),
        })?;
    f.write_all(body.as_bytes())
        .map_err(|e| SysvError::io("write", path, e))?;
    // The umask may have stripped bits from the create mode.
    fs::set_permissions(path, fs::Permissions::from_mode(SCRIPT_MODE))
        .map_err(|e| SysvError::io("chmod", path, e))
}
