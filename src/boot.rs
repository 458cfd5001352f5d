//! Boot sequence for running as PID 1.
//!
//! `InitSystem` wraps a [`ServiceManager`] with the duties of an init
//! process: mount the kernel filesystems, materialise and load the service
//! definitions, start everything, then sleep until asked to shut down.
//! Mount failures are logged and never abort boot.

use nix::mount::{mount, umount, MsFlags};
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

use crate::supervisor::ServiceManager;
use crate::types::{Config, Result};

/// Definitions written when the services file does not exist yet.
pub const DEFAULT_SERVICES_YAML: &str = r#"# LDH-OS default services
syslog:
  description: "System logging service"
  type: "daemon"
  exec: "/usr/sbin/syslogd"
  restart: "always"
  mcp:
    functions: ["start", "stop", "restart", "status"]
    permissions: ["read", "write"]

cron:
  description: "Cron daemon"
  type: "daemon"
  exec: "/usr/sbin/crond"
  args: ["-n"]
  dependencies: ["syslog"]
  restart: "always"
  mcp:
    functions: ["start", "stop", "restart", "status"]
    permissions: ["read", "write"]
"#;

struct EssentialMount {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

const ESSENTIAL_MOUNTS: [EssentialMount; 3] = [
    EssentialMount {
        source: "proc",
        target: "/proc",
        fstype: "proc",
        flags: MsFlags::empty(),
        data: None,
    },
    EssentialMount {
        source: "sysfs",
        target: "/sys",
        fstype: "sysfs",
        flags: MsFlags::empty(),
        data: None,
    },
    EssentialMount {
        source: "devtmpfs",
        target: "/dev",
        fstype: "devtmpfs",
        flags: MsFlags::MS_NOSUID,
        data: Some("mode=755"),
    },
];

#[derive(Debug)]
pub struct InitSystem {
    config: Config,
    manager: Arc<ServiceManager>,
    mounted: Vec<&'static str>,
}

impl InitSystem {
    pub fn new(config: Config) -> Self {
        let manager = Arc::new(ServiceManager::with_config(config.supervisor.clone()));
        Self {
            config,
            manager,
            mounted: Vec::new(),
        }
    }

    pub fn manager(&self) -> &Arc<ServiceManager> {
        &self.manager
    }

    /// Mount /proc, /sys and /dev. Failures are warnings.
    pub fn mount_essential_filesystems(&mut self) {
        if !self.config.boot.mount_filesystems {
            tracing::debug!("mount_skipped: disabled by configuration");
            return;
        }

        tracing::info!("mounting_essential_filesystems");
        for fs in &ESSENTIAL_MOUNTS {
            match mount(
                Some(fs.source),
                fs.target,
                Some(fs.fstype),
                fs.flags,
                fs.data,
            ) {
                Ok(()) => {
                    tracing::debug!("filesystem_mounted: target={}, fstype={}", fs.target, fs.fstype);
                    self.mounted.push(fs.target);
                }
                Err(e) => {
                    tracing::warn!("mount_failed: target={}, fstype={}, error={}", fs.target, fs.fstype, e);
                }
            }
        }
    }

    /// Unmount whatever `mount_essential_filesystems` mounted, in reverse.
    pub fn unmount_filesystems(&mut self) {
        while let Some(target) = self.mounted.pop() {
            if let Err(e) = umount(target) {
                tracing::warn!("unmount_failed: target={}, error={}", target, e);
            }
        }
    }

    /// Load the services file, writing the defaults first if it is missing.
    pub fn load_services(&self) -> Result<usize> {
        let path = &self.config.boot.services_path;
        ensure_services_file(path)?;

        let bytes = std::fs::read(path)?;
        let count = self.manager.load_services(&bytes)?;
        tracing::info!("services_file_loaded: path={}, count={}", path.display(), count);
        Ok(count)
    }

    /// Load and start every service. Errors are logged; boot carries on.
    pub fn start_services(&self) {
        if let Err(e) = self.load_services() {
            tracing::warn!("services_load_failed: error={}", e);
            return;
        }
        if let Err(e) = self.manager.start_all() {
            tracing::warn!("services_start_failed: error={}", e);
        }
    }

    /// Boot, wait for SIGTERM or SIGINT, shut down.
    pub async fn run(&mut self) -> Result<()> {
        self.mount_essential_filesystems();
        self.start_services();
        tracing::info!("init_ready");

        wait_for_shutdown_signal().await?;
        self.shutdown().await;
        Ok(())
    }

    /// Stop all services, wait for their processes to exit, then unmount.
    pub async fn shutdown(&mut self) {
        tracing::info!("init_shutdown: stopping services");
        if let Err(e) = self.manager.stop_all() {
            tracing::warn!("services_stop_failed: error={}", e);
        }
        self.manager.wait_stopped().await;
        self.unmount_filesystems();
    }
}

/// Create the parent directory and write the default definitions if `path`
/// does not exist. Returns true if the file was created.
pub fn ensure_services_file(path: &Path) -> Result<bool> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    if path.exists() {
        return Ok(false);
    }

    std::fs::write(path, DEFAULT_SERVICES_YAML)?;
    tracing::info!("default_services_written: path={}", path.display());
    Ok(true)
}

/// Resolve on SIGTERM or SIGINT. SIGHUP and SIGQUIT are only logged.
async fn wait_for_shutdown_signal() -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    loop {
        tokio::select! {
            _ = term.recv() => {
                tracing::info!("signal_received: SIGTERM, shutting down");
                return Ok(());
            }
            _ = int.recv() => {
                tracing::info!("signal_received: SIGINT, shutting down");
                return Ok(());
            }
            _ = hup.recv() => tracing::info!("signal_received: SIGHUP"),
            _ = quit.recv() => tracing::info!("signal_received: SIGQUIT"),
        }
    }
}
