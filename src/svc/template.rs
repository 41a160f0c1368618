//! Init script rendering.
//!
//! Rendering is a pure function of the descriptor and the layout. Every descriptor field is
//! untrusted text: words that reach the shell are single-quoted, free text that lands in
//! comment headers is flattened to a single line.

use crate::svc::descriptor::ServiceDescriptor;
use crate::svc::error::{Result, SysvError};
use crate::svc::layout::SysvLayout;
use crate::svc::retry::{DISCOVERY, STOP_CONFIRM};
use askama::Template;
use std::path::Path;

#[derive(Template)]
#[template(path = "sysv_init.sh", escape = "none")]
struct InitScriptTemplate {
    name: String,
    name_word: String,
    display_name: String,
    description: String,
    process_name: String,
    command: String,
    user: Option<String>,
    working_directory: Option<String>,
    pid_file: String,
    stdout_log: String,
    stderr_log: String,
    discovery_attempts: u32,
    discovery_interval_secs: u64,
    stop_attempts: u32,
    stop_interval_secs: u64,
}

/// Characters that never need quoting in a POSIX shell word.
fn is_plain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ',' | ':' | '=' | '+' | '@' | '%')
}

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(is_plain) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Collapse free text onto one line so it cannot leave a `#` comment.
pub fn flatten_text(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

/// Executable followed by its arguments, each quoted on its own.
pub fn command_line(executable: &Path, args: &[String]) -> String {
    std::iter::once(quote_path(executable))
        .chain(args.iter().map(|a| shell_quote(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_init_script(desc: &ServiceDescriptor, layout: &SysvLayout) -> Result<String> {
    let name = &desc.name;
    let t = InitScriptTemplate {
        name: flatten_text(name),
        name_word: shell_quote(name),
        display_name: flatten_text(desc.label()),
        description: flatten_text(&desc.description),
        process_name: flatten_text(&desc.executable.to_string_lossy()),
        // The command line is itself stored in a shell variable, so it is quoted twice.
        command: shell_quote(&command_line(&desc.executable, &desc.arguments)),
        user: desc.run_as().map(shell_quote),
        working_directory: desc.work_dir().map(quote_path),
        pid_file: quote_path(&layout.pid_file(name)),
        stdout_log: quote_path(&layout.stdout_log(name)),
        stderr_log: quote_path(&layout.stderr_log(name)),
        discovery_attempts: DISCOVERY.max_attempts,
        discovery_interval_secs: DISCOVERY.interval.as_secs().max(1),
        stop_attempts: STOP_CONFIRM.max_attempts,
        stop_interval_secs: STOP_CONFIRM.interval.as_secs().max(1),
    };
    let mut out = t.render().map_err(|source| SysvError::Render {
        name: name.clone(),
        source,
    })?;
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::pidfile::PidFile;
    use crate::svc::proc::{LinuxProcessTable, ProcessTable};
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::process::{Command, Stdio};

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            name: "agent".into(),
            display_name: "Monitoring Agent".into(),
            description: "Collects metrics".into(),
            executable: PathBuf::from("/opt/agent/bin/agent"),
            arguments: vec!["--config".into(), "/etc/agent/agent.yaml".into()],
            working_directory: Some(PathBuf::from("/opt/agent")),
            user_name: Some("agent".into()),
            user_service: false,
        }
    }

    #[test]
    fn quoting() {
        assert_eq!(shell_quote("plain-word_1.0"), "plain-word_1.0");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(shell_quote("a\"b`c"), "'a\"b`c'");
    }

    #[test]
    fn command_line_quotes_each_argument() {
        let line = command_line(
            Path::new("/opt/my app/run"),
            &["--name".to_string(), "x y".to_string(), "it's".to_string()],
        );
        assert_eq!(line, "'/opt/my app/run' --name 'x y' 'it'\\''s'");
    }

    #[test]
    fn renders_full_script() {
        let s = render_init_script(&descriptor(), &SysvLayout::default()).unwrap();
        assert!(s.starts_with("#!/bin/sh\n"));
        assert!(s.contains("# description: Collects metrics\n"));
        assert!(s.contains("# Short-Description: Monitoring Agent\n"));
        assert!(s.contains("# processname: /opt/agent/bin/agent\n"));
        assert!(s.contains("cmd='/opt/agent/bin/agent --config /etc/agent/agent.yaml'\n"));
        assert!(s.contains("user=agent\n"));
        assert!(s.contains("pid_file=/var/run/agent.pid\n"));
        assert!(s.contains("stdout_log=/var/log/opsramp/agent.log\n"));
        assert!(s.contains("stderr_log=/var/log/opsramp/agent.err\n"));
        assert!(s.contains("cd /opt/agent || exit 1\n"));
        assert!(s.contains("$SU - \"$user\" -s /bin/bash -c \"$cmd\""));
        assert!(s.contains("for i in $(seq 1 30)"));
        assert!(s.contains("for i in $(seq 1 10)"));
        assert!(s.contains("echo \"Usage: $0 {start|stop|restart|status}\""));
        assert!(s.ends_with("exit 0\n"));
    }

    #[test]
    fn optional_steps_are_omitted() {
        let mut d = descriptor();
        d.user_name = None;
        d.working_directory = None;
        let s = render_init_script(&d, &SysvLayout::default()).unwrap();
        assert!(!s.contains("user="));
        assert!(!s.contains("cd "));
        assert!(!s.contains("$SU - "));
        assert!(s.contains("/bin/sh -c \"$cmd\" >> \"$stdout_log\" 2>> \"$stderr_log\" &\n"));
        assert!(s.contains("name=agent\npid_file=/var/run/agent.pid\n"));
    }

    #[test]
    fn hostile_fields_stay_inert() {
        let mut d = descriptor();
        d.description = "line one\nrm -rf / #".into();
        d.display_name = "{{ name }} {% if true %}".into();
        d.arguments = vec!["'; reboot; '".into()];
        d.user_name = Some("bob; reboot".into());
        d.working_directory = Some(PathBuf::from("/tmp/$(reboot)"));
        let s = render_init_script(&d, &SysvLayout::default()).unwrap();

        assert!(s.contains("# description: line one rm -rf / #\n"));
        assert!(!s.lines().any(|l| l.trim_start().starts_with("rm -rf")));
        assert!(s.contains("# Short-Description: {{ name }} {% if true %}\n"));
        assert!(s.contains("user='bob; reboot'\n"));
        assert!(s.contains("cd '/tmp/$(reboot)' || exit 1\n"));
        // Argument quoted once for the command line, then again for the assignment.
        let inner = command_line(&d.executable, &d.arguments);
        assert!(s.contains(&format!("cmd={}\n", shell_quote(&inner))));
    }

    /// A rendered script installed under a scratch root, run the way init runs it.
    struct ScriptHost {
        _dir: tempfile::TempDir,
        name: String,
        script: PathBuf,
        pid_file: PidFile,
    }

    impl ScriptHost {
        fn new(name: &str, body: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = SysvLayout::rooted_at(dir.path());
            fs::create_dir_all(&layout.init_dir).unwrap();
            fs::create_dir_all(&layout.run_dir).unwrap();
            let mut d = ServiceDescriptor::new(name, "/bin/sh");
            d.arguments = vec!["-c".into(), body.into()];
            let script = layout.init_script(name);
            fs::write(&script, render_init_script(&d, &layout).unwrap()).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
            Self {
                _dir: dir,
                name: name.to_string(),
                pid_file: PidFile::new(layout.pid_file(name)),
                script,
            }
        }

        fn run(&self, verb: &str) -> (i32, String) {
            let out = Command::new("/bin/sh")
                .arg(&self.script)
                .arg(verb)
                .stdin(Stdio::null())
                .output()
                .unwrap();
            (out.status.code().unwrap_or(-1), String::from_utf8_lossy(&out.stdout).into_owned())
        }

        fn tracked(&self) -> Pid {
            self.pid_file.read().expect("pid file holds a pid")
        }
    }

    impl Drop for ScriptHost {
        fn drop(&mut self) {
            if let Some(pid) = self.pid_file.read() {
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
    }

    fn host_tools_present() -> bool {
        ["pgrep", "ps", "seq"].iter().all(|t| {
            Command::new("/bin/sh")
                .arg("-c")
                .arg(format!("command -v {t}"))
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    fn cmdline(pid: Pid) -> String {
        fs::read(format!("/proc/{pid}/cmdline"))
            .map(|b| String::from_utf8_lossy(&b).replace('\0', " "))
            .unwrap_or_default()
    }

    #[test]
    fn script_lifecycle() {
        if !host_tools_present() {
            eprintln!("pgrep/ps/seq not available, skipping");
            return;
        }
        let procs = LinuxProcessTable::default();
        let h = ScriptHost::new("initsvc-lifecycle", "sleep 30; true");

        let (code, out) = h.run("status");
        assert_eq!(code, 1, "{out}");
        assert!(out.contains("initsvc-lifecycle Stopped"), "{out}");

        // A pid file naming a process that is long gone reads as stopped.
        let mut gone = Command::new("true").spawn().unwrap();
        let stale = Pid::from_raw(gone.id() as i32);
        gone.wait().unwrap();
        h.pid_file.write(stale).unwrap();
        assert_eq!(h.run("status").0, 1);

        let (code, out) = h.run("start");
        assert_eq!(code, 0, "{out}");
        let first = h.tracked();
        assert_ne!(first, stale);
        assert!(procs.is_alive(first));
        // The worker found behind the launching shell, not the shell that was killed.
        assert!(cmdline(first).contains("sleep"), "{}", cmdline(first));

        let (code, out) = h.run("status");
        assert_eq!(code, 0, "{out}");
        assert!(out.contains(&format!("{} Running", h.name)), "{out}");

        let (code, out) = h.run("start");
        assert_eq!(code, 0, "{out}");
        assert!(out.contains("Already started"), "{out}");
        assert_eq!(h.tracked(), first);

        let (code, out) = h.run("restart");
        assert_eq!(code, 0, "{out}");
        assert!(out.contains("Stopped"), "{out}");
        let second = h.tracked();
        assert_ne!(second, first);
        assert!(!procs.is_alive(first));
        assert!(procs.is_alive(second));

        let (code, out) = h.run("stop");
        assert_eq!(code, 0, "{out}");
        assert!(out.contains("Stopped"), "{out}");
        assert_eq!(h.pid_file.read(), None);
        assert!(!procs.is_alive(second));

        let (code, out) = h.run("stop");
        assert_eq!(code, 0, "{out}");
        assert!(out.contains("Not running"), "{out}");

        let (code, out) = h.run("bogus");
        assert_eq!(code, 1, "{out}");
        assert!(out.contains("Usage: "), "{out}");
        assert!(out.contains("{start|stop|restart|status}"), "{out}");
    }

    #[test]
    fn script_restart_refuses_to_start_over_a_stuck_worker() {
        if !host_tools_present() {
            eprintln!("pgrep/ps/seq not available, skipping");
            return;
        }
        let procs = LinuxProcessTable::default();
        // The ignored SIGTERM is inherited by the sleep as well.
        let h = ScriptHost::new("initsvc-stuck", "trap '' TERM; sleep 60; true");

        let (code, out) = h.run("start");
        assert_eq!(code, 0, "{out}");
        let pid = h.tracked();

        let (code, out) = h.run("restart");
        assert_eq!(code, 1, "{out}");
        assert!(out.contains("Not stopped"), "{out}");
        assert!(out.contains("Unable to stop, will not attempt to start"), "{out}");
        assert_eq!(h.tracked(), pid);
        assert!(procs.is_alive(pid));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render_init_script(&descriptor(), &SysvLayout::default()).unwrap();
        let b = render_init_script(&descriptor(), &SysvLayout::default()).unwrap();
        assert_eq!(a, b);
    }
}
