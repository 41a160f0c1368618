use crate::svc::error::{Result, SysvError};
use crate::svc::runner::CommandRunner;
use nix::unistd::getuid;
use std::ffi::OsStr;
use std::sync::Arc;

/// Drives an installed service through the host's `service` command.
///
/// Privilege follows the real uid, so a setuid wrapper still escalates through `sudo -n`.
/// A missing sudo rule simply fails the command.
pub struct ServiceControl {
    name: String,
    runner: Arc<dyn CommandRunner>,
    as_root: bool,
}

impl ServiceControl {
    pub fn new(name: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_privilege(name, runner, getuid().is_root())
    }

    pub fn with_privilege(name: impl Into<String>, runner: Arc<dyn CommandRunner>, as_root: bool) -> Self {
        Self {
            name: name.into(),
            runner,
            as_root,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.service("start")
    }

    pub fn stop(&self) -> Result<()> {
        self.service("stop")
    }

    pub fn restart(&self) -> Result<()> {
        self.service("restart")
    }

    fn service(&self, verb: &str) -> Result<()> {
        let (program, args): (&str, Vec<&str>) = if self.as_root {
            ("service", vec![self.name.as_str(), verb])
        } else {
            ("sudo", vec!["-n", "service", self.name.as_str(), verb])
        };
        self.runner
            .run(OsStr::new(program), &args)
            .map_err(|source| SysvError::Command {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::testutil::RecordingRunner;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_calls_service_directly() {
        let r = Arc::new(RecordingRunner::default());
        let c = ServiceControl::with_privilege("agent", r.clone(), true);
        c.start().unwrap();
        c.stop().unwrap();
        c.restart().unwrap();
        assert_eq!(
            r.calls(),
            vec![
                ("service".to_string(), strs(&["agent", "start"])),
                ("service".to_string(), strs(&["agent", "stop"])),
                ("service".to_string(), strs(&["agent", "restart"])),
            ]
        );
    }

    #[test]
    fn non_root_escalates_without_prompting() {
        let r = Arc::new(RecordingRunner::default());
        let c = ServiceControl::with_privilege("agent", r.clone(), false);
        c.restart().unwrap();
        assert_eq!(
            r.calls(),
            vec![("sudo".to_string(), strs(&["-n", "service", "agent", "restart"]))]
        );
    }

    #[test]
    fn privilege_follows_real_uid() {
        let r = Arc::new(RecordingRunner::default());
        ServiceControl::new("agent", r.clone()).stop().unwrap();
        let expected = if getuid().is_root() { "service" } else { "sudo" };
        assert_eq!(r.calls()[0].0, expected);
    }

    #[test]
    fn escalation_failure_is_a_plain_command_failure() {
        let r = Arc::new(RecordingRunner::default());
        r.fail_next();
        let err = ServiceControl::with_privilege("agent", r, false).start().unwrap_err();
        match err {
            SysvError::Command { program, args, .. } => {
                assert_eq!(program, "sudo");
                assert_eq!(args, strs(&["-n", "service", "agent", "start"]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
