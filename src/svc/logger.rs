use chrono::Local;
use std::ffi::CString;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Sink for lifecycle events (install, start, stop, ...).
pub trait Logger: Send + Sync {
    fn event(&self, level: Level, component: &str, msg: &str);

    fn info(&self, component: &str, msg: &str) {
        self.event(Level::Info, component, msg);
    }
    fn warn(&self, component: &str, msg: &str) {
        self.event(Level::Warn, component, msg);
    }
    fn error(&self, component: &str, msg: &str) {
        self.event(Level::Error, component, msg);
    }
}

fn format_line(app: &str, level: Level, component: &str, msg: &str) -> String {
    let ts = Local::now().format("%Y-%m-%d_%H:%M:%S%.3f");
    format!("{ts} {} [{component}] app={app} {msg}", level.as_str())
}

/// Foreground sink: one timestamped line per event on stderr.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    app: String,
}

impl ConsoleLogger {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into() }
    }
}

impl Logger for ConsoleLogger {
    fn event(&self, level: Level, component: &str, msg: &str) {
        eprintln!("{}", format_line(&self.app, level, component, msg));
    }
}

/// Background sink: the host syslog, with the service name as ident.
#[derive(Debug)]
pub struct SyslogLogger {
    // openlog keeps the pointer, so the string must outlive every syslog call.
    _ident: CString,
}

fn to_cstring(s: &str) -> CString {
    CString::new(s.replace('\0', " ")).unwrap_or_default()
}

impl SyslogLogger {
    pub fn new(name: &str) -> Self {
        let ident = to_cstring(name);
        // SAFETY: ident is a valid NUL-terminated string owned by self for its whole lifetime.
        unsafe { libc::openlog(ident.as_ptr(), libc::LOG_PID, libc::LOG_DAEMON) };
        Self { _ident: ident }
    }
}

impl Logger for SyslogLogger {
    fn event(&self, level: Level, component: &str, msg: &str) {
        let prio = match level {
            Level::Info => libc::LOG_INFO,
            Level::Warn => libc::LOG_WARNING,
            Level::Error => libc::LOG_ERR,
        };
        let line = to_cstring(&format!("[{component}] {msg}"));
        // SAFETY: constant "%s" format with one NUL-terminated argument.
        unsafe {
            libc::syslog(
                libc::LOG_DAEMON | prio,
                b"%s\0".as_ptr() as *const libc::c_char,
                line.as_ptr(),
            )
        };
    }
}

impl Drop for SyslogLogger {
    fn drop(&mut self) {
        // SAFETY: closelog has no preconditions.
        unsafe { libc::closelog() };
    }
}

/// Pick the sink for a service. Whether the caller is interactive is decided outside.
pub fn select_logger(name: &str, interactive: bool) -> Arc<dyn Logger> {
    if interactive {
        Arc::new(ConsoleLogger::new(name))
    } else {
        Arc::new(SyslogLogger::new(name))
    }
}

/// Keeps events in memory; handy for tests and for embedding callers that render their own output.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    events: Mutex<Vec<(Level, String, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Level, String, String)> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Whether any event message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.events().iter().any(|(_, _, m)| m.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn event(&self, level: Level, component: &str, msg: &str) {
        let mut g = self.events.lock().unwrap_or_else(|p| p.into_inner());
        g.push((level, component.to_string(), msg.to_string()));
    }
}
