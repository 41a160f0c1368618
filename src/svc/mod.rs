pub mod build_info;
pub mod cli;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod error;
pub mod launcher;
pub mod layout;
pub mod logger;
pub mod pidfile;
pub mod proc;
pub mod registrar;
pub mod retry;
pub mod runner;
pub mod supervisor;
pub mod template;

#[cfg(test)]
mod testutil;

pub fn main() -> anyhow::Result<()> {
    cli::run()
}
