use crate::svc::descriptor::ServiceDescriptor;
use crate::svc::layout::SysvLayout;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A service definition plus the host layout it is installed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub descriptor: ServiceDescriptor,
    pub layout: SysvLayout,
}

// -------- YAML file schema (strict) --------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    service: ServiceSectionFile,
    #[serde(default)]
    layout: Option<LayoutSectionFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceSectionFile {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    executable: PathBuf,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    user_service: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayoutSectionFile {
    #[serde(default)]
    init_dir: Option<PathBuf>,
    #[serde(default)]
    run_dir: Option<PathBuf>,
    #[serde(default)]
    log_dir: Option<PathBuf>,
    #[serde(default)]
    legacy_log_dir: Option<PathBuf>,
    #[serde(default)]
    rc_root: Option<PathBuf>,
    #[serde(default)]
    chkconfig: Option<PathBuf>,
    #[serde(default)]
    update_rc_d: Option<PathBuf>,
}

fn resolve(base: &Path, p: PathBuf) -> PathBuf {
    if p.is_relative() { base.join(p) } else { p }
}

pub fn parse_service_config(raw: &str, base: &Path) -> anyhow::Result<ServiceConfig> {
    let file: ServiceConfigFile = serde_yaml::from_str(raw)?;
    let svc = file.service;

    let name = svc.name.trim().to_string();
    anyhow::ensure!(!name.is_empty(), "service.name must not be empty");
    anyhow::ensure!(
        !svc.executable.as_os_str().is_empty(),
        "service.executable must not be empty"
    );

    let descriptor = ServiceDescriptor {
        name,
        display_name: svc.display_name.unwrap_or_default().trim().to_string(),
        description: svc.description.unwrap_or_default(),
        executable: svc.executable,
        arguments: svc.arguments,
        working_directory: svc
            .working_directory
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| resolve(base, p)),
        user_name: svc.user.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
        user_service: svc.user_service,
    };

    // Start from the host layout and overlay whatever the file sets.
    let mut layout = SysvLayout::default();
    if let Some(l) = file.layout {
        let slots: [(&mut PathBuf, Option<PathBuf>); 7] = [
            (&mut layout.init_dir, l.init_dir),
            (&mut layout.run_dir, l.run_dir),
            (&mut layout.log_dir, l.log_dir),
            (&mut layout.legacy_log_dir, l.legacy_log_dir),
            (&mut layout.rc_root, l.rc_root),
            (&mut layout.chkconfig, l.chkconfig),
            (&mut layout.update_rc_d, l.update_rc_d),
        ];
        for (slot, v) in slots {
            if let Some(p) = v {
                *slot = resolve(base, p);
            }
        }
    }

    Ok(ServiceConfig { descriptor, layout })
}

pub fn load_service_config(config_path: &Path) -> anyhow::Result<ServiceConfig> {
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", config_path.display()))?;
    // Relative paths are relative to the config file, not to the caller's cwd.
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    parse_service_config(&raw, base)
        .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e:#}", config_path.display()))
}
