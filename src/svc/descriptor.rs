use crate::svc::error::{Result, SysvError};
use std::path::PathBuf;

/// Immutable description of one managed service, supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub user_name: Option<String>,
    /// Per-user services have no SysV counterpart; setting this makes every operation fail.
    pub user_service: bool,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Preconditions shared by install, uninstall and the supervisor. Touches nothing on disk.
    pub fn validate(&self) -> Result<()> {
        if self.user_service {
            return Err(SysvError::UserServiceUnsupported);
        }
        let reason = if self.name.is_empty() {
            Some("must not be empty")
        } else if self.name == "." || self.name == ".." {
            Some("must not be a relative path component")
        } else if self.name.contains('/') {
            Some("must not contain '/'")
        } else if self.name.chars().any(|c| c == '\0' || c.is_whitespace() || c.is_control()) {
            Some("must not contain whitespace or control characters")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SysvError::InvalidName {
                name: self.name.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Display name when set, otherwise the service name.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    /// `user_name` with blank values treated as unset.
    pub fn run_as(&self) -> Option<&str> {
        self.user_name.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// `working_directory` with an empty path treated as unset.
    pub fn work_dir(&self) -> Option<&std::path::Path> {
        self.working_directory
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}
