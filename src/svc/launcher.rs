use crate::svc::descriptor::ServiceDescriptor;
use crate::svc::error::SysvError;
use crate::svc::layout::SysvLayout;
use crate::svc::template::command_line;
use anyhow::Context as _;
use nix::unistd::{setsid, Pid};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Everything needed to spawn the worker once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    /// Shell command line; every word already quoted.
    pub command_line: String,
    pub working_directory: Option<PathBuf>,
    pub user: Option<String>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

impl LaunchSpec {
    pub fn from_descriptor(desc: &ServiceDescriptor, layout: &SysvLayout) -> Self {
        Self {
            name: desc.name.clone(),
            command_line: command_line(&desc.executable, &desc.arguments),
            working_directory: desc.work_dir().map(Path::to_path_buf),
            user: desc.run_as().map(str::to_string),
            stdout_log: layout.stdout_log(&desc.name),
            stderr_log: layout.stderr_log(&desc.name),
        }
    }
}

/// Spawns the worker in the background and hands back the pid of whatever process it started.
/// That process may be a short-lived wrapper rather than the worker itself.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<Pid>;
}

/// Launches through a shell, switching user with `runuser` (or `su`) when one is configured.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    su_candidates: Vec<PathBuf>,
    shell: PathBuf,
    login_shell: PathBuf,
}

impl Default for ShellLauncher {
    fn default() -> Self {
        Self {
            su_candidates: vec!["/sbin/runuser".into(), "/bin/su".into()],
            shell: "/bin/sh".into(),
            login_shell: "/bin/bash".into(),
        }
    }
}

fn is_executable(p: &Path) -> bool {
    fs::metadata(p)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn open_append(path: &Path) -> anyhow::Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create_dir_all {}", dir.display()))?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))
}

impl ShellLauncher {
    /// First switch-user tool that exists; the last candidate is used blindly otherwise.
    fn su_path(&self) -> &Path {
        self.su_candidates
            .iter()
            .find(|p| is_executable(p))
            .or_else(|| self.su_candidates.last())
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("/bin/su"))
    }

    pub(crate) fn build_command(&self, spec: &LaunchSpec) -> anyhow::Result<Command> {
        let mut cmd = match spec.user.as_deref() {
            Some(user) => {
                if users::get_user_by_name(user).is_none() {
                    return Err(SysvError::UnknownUser(user.to_string()).into());
                }
                let mut c = Command::new(self.su_path());
                c.arg("-")
                    .arg(user)
                    .arg("-s")
                    .arg(&self.login_shell)
                    .arg("-c")
                    .arg(&spec.command_line);
                c
            }
            None => {
                let mut c = Command::new(&self.shell);
                c.arg("-c").arg(&spec.command_line);
                c
            }
        };
        if let Some(dir) = spec.working_directory.as_deref() {
            anyhow::ensure!(
                dir.is_dir(),
                "working_directory {} does not exist (refuse to start {})",
                dir.display(),
                spec.name
            );
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

impl Launcher for ShellLauncher {
    fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<Pid> {
        let mut cmd = self.build_command(spec)?;
        cmd.stdin(Stdio::null())
            .stdout(open_append(&spec.stdout_log)?)
            .stderr(open_append(&spec.stderr_log)?);
        // Detach from our controlling terminal so the worker outlives this invocation.
        unsafe {
            cmd.pre_exec(|| {
                let _ = setsid();
                Ok(())
            });
        }
        let child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!(
                "spawn app={} argv={:?} failed: kind={:?} os_error={:?} err={}",
                spec.name,
                cmd.get_args().collect::<Vec<_>>(),
                e.kind(),
                e.raw_os_error(),
                e
            )
        })?;
        let pid = Pid::from_raw(child.id() as i32);
        tracing::debug!(app = %spec.name, %pid, "launched");
        Ok(pid)
    }
}
