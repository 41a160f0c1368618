use std::path::{Path, PathBuf};

/// Runlevels that get an `S50<name>` start link when no registration tool is present.
pub const START_RUNLEVELS: [u8; 4] = [2, 3, 4, 5];
/// Shutdown, single-user and reboot runlevels that get a `K02<name>` kill link.
pub const KILL_RUNLEVELS: [u8; 3] = [0, 1, 6];

const START_PREFIX: &str = "S50";
const KILL_PREFIX: &str = "K02";

/// Where a SysV host keeps init scripts, pid files, logs and registration tools.
///
/// `Default` is the real host layout. Every path is overridable so the installer and the
/// supervisor can be pointed at a scratch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysvLayout {
    pub init_dir: PathBuf,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Logs written by older releases; only touched by uninstall.
    pub legacy_log_dir: PathBuf,
    /// Parent of the `rc{N}.d` directories.
    pub rc_root: PathBuf,
    pub chkconfig: PathBuf,
    pub update_rc_d: PathBuf,
}

impl Default for SysvLayout {
    fn default() -> Self {
        Self {
            init_dir: "/etc/init.d".into(),
            run_dir: "/var/run".into(),
            log_dir: "/var/log/opsramp".into(),
            legacy_log_dir: "/var/log".into(),
            rc_root: "/etc".into(),
            chkconfig: "/sbin/chkconfig".into(),
            update_rc_d: "/usr/sbin/update-rc.d".into(),
        }
    }
}

impl SysvLayout {
    /// Layout with every directory placed under `root`, mirroring the host tree.
    pub fn rooted_at(root: &Path) -> Self {
        let d = Self::default();
        let rebase = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            init_dir: rebase(&d.init_dir),
            run_dir: rebase(&d.run_dir),
            log_dir: rebase(&d.log_dir),
            legacy_log_dir: rebase(&d.legacy_log_dir),
            rc_root: rebase(&d.rc_root),
            chkconfig: rebase(&d.chkconfig),
            update_rc_d: rebase(&d.update_rc_d),
        }
    }

    pub fn init_script(&self, name: &str) -> PathBuf {
        self.init_dir.join(name)
    }

    pub fn pid_file(&self, name: &str) -> PathBuf {
        self.run_dir.join(format!("{name}.pid"))
    }

    pub fn stdout_log(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.log"))
    }

    pub fn stderr_log(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{name}.err"))
    }

    /// Current stdout/stderr logs followed by the two legacy ones.
    pub fn log_paths(&self, name: &str) -> [PathBuf; 4] {
        [
            self.stdout_log(name),
            self.stderr_log(name),
            self.legacy_log_dir.join(format!("{name}.log")),
            self.legacy_log_dir.join(format!("{name}.err")),
        ]
    }

    pub fn rc_dir(&self, level: u8) -> PathBuf {
        self.rc_root.join(format!("rc{level}.d"))
    }

    pub fn start_link(&self, level: u8, name: &str) -> PathBuf {
        self.rc_dir(level).join(format!("{START_PREFIX}{name}"))
    }

    pub fn kill_link(&self, level: u8, name: &str) -> PathBuf {
        self.rc_dir(level).join(format!("{KILL_PREFIX}{name}"))
    }

    /// Every runlevel link the symlink fallback manages for `name`, start links first.
    pub fn runlevel_links(&self, name: &str) -> Vec<PathBuf> {
        START_RUNLEVELS
            .iter()
            .map(|&l| self.start_link(l, name))
            .chain(KILL_RUNLEVELS.iter().map(|&l| self.kill_link(l, name)))
            .collect()
    }
}
