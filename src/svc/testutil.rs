//! Doubles shared by the unit tests.

use crate::svc::error::RunError;
use crate::svc::launcher::{LaunchSpec, Launcher};
use crate::svc::proc::ProcessTable;
use crate::svc::retry::Clock;
use crate::svc::runner::CommandRunner;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    fail_next: AtomicBool,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.calls).clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &OsStr, args: &[&str]) -> Result<(), RunError> {
        lock(&self.calls).push((
            program.to_string_lossy().into_owned(),
            args.iter().map(|s| s.to_string()).collect(),
        ));
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RunError::Failed {
                status: ExitStatus::from_raw(1 << 8),
                stderr: "simulated failure".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProcState {
    alive: HashSet<i32>,
    unkillable: HashSet<i32>,
    /// parent -> (child, probe number on which it appears)
    pending_children: HashMap<i32, Vec<(i32, u32)>>,
    children: HashMap<i32, Vec<i32>>,
    child_probes: HashMap<i32, u32>,
    /// pid -> liveness probes answered "alive" before a signalled process is gone
    exit_delay: HashMap<i32, u32>,
    dying: HashMap<i32, u32>,
    signals: Vec<(Pid, Signal)>,
    reaped: Vec<Pid>,
}

/// Scripted process table.
#[derive(Debug, Default)]
pub struct FakeProcs {
    st: Mutex<ProcState>,
}

impl FakeProcs {
    pub fn set_alive(&self, pid: Pid) {
        lock(&self.st).alive.insert(pid.as_raw());
    }

    pub fn kill_now(&self, pid: Pid) {
        lock(&self.st).alive.remove(&pid.as_raw());
    }

    pub fn make_unkillable(&self, pid: Pid) {
        lock(&self.st).unkillable.insert(pid.as_raw());
    }

    /// After the first signal, `pid` keeps answering alive for `probes` more liveness checks.
    pub fn dies_after_probes(&self, pid: Pid, probes: u32) {
        lock(&self.st).exit_delay.insert(pid.as_raw(), probes);
    }

    /// `child` shows up under `parent` from the `on_probe`-th `children_of` call onwards.
    pub fn spawn_child_after(&self, parent: Pid, child: Pid, on_probe: u32) {
        lock(&self.st)
            .pending_children
            .entry(parent.as_raw())
            .or_default()
            .push((child.as_raw(), on_probe));
    }

    pub fn signals(&self) -> Vec<(Pid, Signal)> {
        lock(&self.st).signals.clone()
    }

    pub fn reaped(&self) -> Vec<Pid> {
        lock(&self.st).reaped.clone()
    }
}

impl ProcessTable for FakeProcs {
    fn is_alive(&self, pid: Pid) -> bool {
        let mut st = lock(&self.st);
        let raw = pid.as_raw();
        if let Some(left) = st.dying.get_mut(&raw) {
            if *left == 0 {
                st.dying.remove(&raw);
                st.alive.remove(&raw);
            } else {
                *left -= 1;
            }
        }
        st.alive.contains(&raw)
    }

    fn children_of(&self, pid: Pid) -> anyhow::Result<Vec<Pid>> {
        let mut st = lock(&self.st);
        let raw = pid.as_raw();
        let n = {
            let c = st.child_probes.entry(raw).or_insert(0);
            *c += 1;
            *c
        };
        let due: Vec<i32> = st
            .pending_children
            .get(&raw)
            .map(|v| v.iter().filter(|(_, at)| *at <= n).map(|(c, _)| *c).collect())
            .unwrap_or_default();
        if let Some(v) = st.pending_children.get_mut(&raw) {
            v.retain(|(_, at)| *at > n);
        }
        for c in due {
            st.alive.insert(c);
            st.children.entry(raw).or_default().push(c);
        }
        let mut kids: Vec<Pid> = st
            .children
            .get(&raw)
            .map(|v| v.iter().copied().filter(|c| st.alive.contains(c)).map(Pid::from_raw).collect())
            .unwrap_or_default();
        kids.sort_by_key(|p| p.as_raw());
        Ok(kids)
    }

    fn signal(&self, pid: Pid, sig: Signal) -> anyhow::Result<()> {
        let mut st = lock(&self.st);
        let raw = pid.as_raw();
        st.signals.push((pid, sig));
        if st.unkillable.contains(&raw) || st.dying.contains_key(&raw) {
            return Ok(());
        }
        match st.exit_delay.remove(&raw) {
            Some(delay) => {
                st.dying.insert(raw, delay);
            }
            None => {
                st.alive.remove(&raw);
            }
        }
        Ok(())
    }

    fn reap(&self, pid: Pid) {
        lock(&self.st).reaped.push(pid);
    }
}

/// Hands out a fixed pid and marks it alive in the paired [`FakeProcs`].
#[derive(Debug)]
pub struct FakeLauncher {
    procs: Arc<FakeProcs>,
    pid: Pid,
    launches: AtomicUsize,
    fail: AtomicBool,
    die: AtomicBool,
}

impl FakeLauncher {
    pub fn new(procs: Arc<FakeProcs>, pid: Pid) -> Self {
        Self {
            procs,
            pid,
            launches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            die: AtomicBool::new(false),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn fail_on_launch(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// The launched process exits before anyone looks at it.
    pub fn die_on_launch(&self) {
        self.die.store(true, Ordering::SeqCst);
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<Pid> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("simulated launch failure for {}", spec.name);
        }
        if !self.die.load(Ordering::SeqCst) {
            self.procs.set_alive(self.pid);
        }
        Ok(self.pid)
    }
}

/// Really sleeps, but `divisor` times faster than asked.
#[derive(Debug)]
pub struct ScaledClock {
    divisor: u32,
}

impl ScaledClock {
    pub fn new(divisor: u32) -> Self {
        Self { divisor }
    }
}

impl Clock for ScaledClock {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d / self.divisor.max(1));
    }
}
