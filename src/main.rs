//! ldh-init - init process entry point.
//!
//! Mounts the kernel filesystems, loads and starts the configured services,
//! then supervises them until SIGTERM or SIGINT.

use clap::{Parser, ValueEnum};
use ldh_init::boot::InitSystem;
use ldh_init::types::config::SERVICES_PATH_ENV;
use ldh_init::Config;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// LDH-OS init: service supervisor
#[derive(Debug, Parser)]
#[command(name = "ldh-init", version, about = "LDH-OS init and service supervisor")]
struct Args {
    /// Service definitions file
    #[arg(long, short = 'c', env = SERVICES_PATH_ENV)]
    config: Option<PathBuf>,

    /// Skip mounting /proc, /sys and /dev
    #[arg(long)]
    no_mount: bool,

    /// Log output format (overrides LDH_LOG_FORMAT)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(path) = args.config {
        config.boot.services_path = path;
    }
    if args.no_mount {
        config.boot.mount_filesystems = false;
    }
    if let Some(format) = args.log_format {
        config.observability.json_logs = matches!(format, LogFormat::Json);
    }

    ldh_init::observability::init_tracing(&config.observability);

    let pid = std::process::id();
    if pid != 1 {
        tracing::warn!("not_pid_one: pid={}", pid);
    }

    tracing::info!(
        "ldh_init_starting: services={}, stop_timeout={:?}",
        config.boot.services_path.display(),
        config.supervisor.stop_timeout
    );

    let mut init = InitSystem::new(config);
    init.run().await?;

    tracing::info!("ldh_init_exited");
    Ok(())
}
