use crate::svc::build_info;
use crate::svc::config::{self, ServiceConfig};
use crate::svc::control::ServiceControl;
use crate::svc::launcher::{LaunchSpec, ShellLauncher};
use crate::svc::logger::select_logger;
use crate::svc::proc::LinuxProcessTable;
use crate::svc::registrar::Installer;
use crate::svc::retry::SystemClock;
use crate::svc::runner::SystemRunner;
use crate::svc::supervisor::{Action, Report, Supervisor, USAGE_ACTIONS};
use crate::svc::template;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sysvctl", version, about = "SysV init service installer and supervisor")]
pub struct Args {
    /// Path to the service config YAML
    #[arg(short = 'c', long = "config", default_value = "service.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Write the init script and register it for the default runlevels
    Install,
    /// Deregister the service and remove its script, logs and pid file
    Uninstall,
    /// Print the init script that `install` would write
    Render,
    /// Start the installed service through `service`
    Start,
    /// Stop the installed service through `service`
    Stop,
    /// Restart the installed service through `service`
    Restart,
    /// Show whether the tracked worker is alive
    Status {
        /// Output format: text (default) or json
        #[arg(long = "format", default_value = "text")]
        format: OutputFormat,
    },
    /// Run one lifecycle action in-process (what the init script does)
    Supervise { action: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct StatusView {
    name: String,
    running: bool,
    pid: Option<i32>,
    pid_file: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SYSVCTL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn supervisor_for(cfg: &ServiceConfig) -> Supervisor {
    let name = &cfg.descriptor.name;
    Supervisor::new(
        LaunchSpec::from_descriptor(&cfg.descriptor, &cfg.layout),
        &cfg.layout,
        Arc::new(LinuxProcessTable::default()),
        Arc::new(ShellLauncher::default()),
        Arc::new(SystemClock),
        select_logger(name, std::io::stderr().is_terminal()),
    )
}

pub fn run() -> anyhow::Result<()> {
    init_tracing();
    // clap wants a 'static str here; the banner is built once per process.
    let banner: &'static str = Box::leak(build_info::long_version().into_boxed_str());
    let matches = Args::command().long_version(banner).get_matches();
    let args = Args::from_arg_matches(&matches)?;
    let cfg = config::load_service_config(&args.config)?;
    let name = cfg.descriptor.name.clone();

    match args.cmd {
        Cmd::Install => {
            let log = select_logger(&name, std::io::stderr().is_terminal());
            let installer = Installer::new(cfg.layout.clone(), Arc::new(SystemRunner), log);
            let report = installer.install(&cfg.descriptor)?;
            println!("installed {} ({})", report.script.display(), report.registration);
            Ok(())
        }
        Cmd::Uninstall => {
            let log = select_logger(&name, std::io::stderr().is_terminal());
            let installer = Installer::new(cfg.layout.clone(), Arc::new(SystemRunner), log);
            let report = installer.uninstall(&cfg.descriptor)?;
            println!("removed {} ({})", report.script.display(), report.registration);
            if let Some(err) = &report.deregister_error {
                eprintln!("warning: {} deregistration failed: {err}", report.registration);
            }
            for (path, err) in report.links.skipped.iter().chain(report.cleanup.skipped.iter()) {
                eprintln!("warning: could not remove {}: {err}", path.display());
            }
            Ok(())
        }
        Cmd::Render => {
            print!("{}", template::render_init_script(&cfg.descriptor, &cfg.layout)?);
            Ok(())
        }
        Cmd::Start => Ok(ServiceControl::new(name, Arc::new(SystemRunner)).start()?),
        Cmd::Stop => Ok(ServiceControl::new(name, Arc::new(SystemRunner)).stop()?),
        Cmd::Restart => Ok(ServiceControl::new(name, Arc::new(SystemRunner)).restart()?),
        Cmd::Status { format } => {
            cfg.descriptor.validate()?;
            let sup = supervisor_for(&cfg);
            let pid = sup.running_pid();
            match format {
                OutputFormat::Text => println!("{}", sup.status()),
                OutputFormat::Json => {
                    let view = StatusView {
                        name,
                        running: pid.is_some(),
                        pid: pid.map(|p| p.as_raw()),
                        pid_file: sup.pid_file().path().to_path_buf(),
                    };
                    println!("{}", serde_json::to_string_pretty(&view)?);
                }
            }
            if pid.is_none() {
                std::process::exit(1);
            }
            Ok(())
        }
        Cmd::Supervise { action } => {
            let action: Action = match action.parse() {
                Ok(a) => a,
                Err(_) => {
                    println!("Usage: sysvctl supervise {USAGE_ACTIONS}");
                    std::process::exit(1);
                }
            };
            cfg.descriptor.validate()?;
            let report: Report = supervisor_for(&cfg).run(action)?;
            println!("{report}");
            std::process::exit(report.exit_code());
        }
    }
}
