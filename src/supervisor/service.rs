//! Service - one supervised external process.
//!
//! A `Service` pairs an immutable [`ServiceConfig`] with its live
//! [`ServiceStatus`] and a per-run cancellation token. Every `start` spawns a
//! monitor task that owns the child process and waits for it to exit. The
//! token is how the monitor tells a requested stop apart from a crash: `stop`
//! cancels it before signalling the process, and `start` replaces it so a
//! token from an earlier run is never consulted again.
//!
//! Every state change is published synchronously on the event bus before the
//! triggering call returns.

use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{ServiceConfig, ServiceState, ServiceStatus};
use crate::bus::{EventBus, EventType, ServiceEvent};
use crate::types::{Error, Result};

#[derive(Debug)]
pub struct Service {
    config: ServiceConfig,
    status: RwLock<ServiceStatus>,
    cancel: Mutex<CancellationToken>,
    /// Monitor task of the latest run.
    monitor: Mutex<Option<JoinHandle<()>>>,
    bus: Arc<EventBus>,
    stop_timeout: Duration,
}

impl Service {
    /// Create a service in state `unknown`, publishing on `bus`.
    pub fn new(config: ServiceConfig, bus: Arc<EventBus>, stop_timeout: Duration) -> Self {
        Self {
            config,
            status: RwLock::new(ServiceStatus::default()),
            cancel: Mutex::new(CancellationToken::new()),
            monitor: Mutex::new(None),
            bus,
            stop_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> ServiceState {
        self.status.read().state
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the process and start monitoring it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() == ServiceState::Running {
            return Err(Error::AlreadyRunning(self.name().to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("no async runtime to supervise {}: {}", self.name(), e)))?;

        let token = self.rearm();
        self.transition(ServiceState::Starting, |_| {});

        let mut cmd = Command::new(&self.config.exec_path);
        cmd.args(&self.config.args)
            .envs(&self.config.environment)
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let message = source.to_string();
                tracing::error!(
                    "service_launch_failed: name={}, exec={}, error={}",
                    self.name(),
                    self.config.exec_path,
                    message
                );
                self.transition(ServiceState::Failed, |s| s.last_error = Some(message));
                return Err(Error::LaunchFailed {
                    service: self.name().to_string(),
                    source,
                });
            }
        };

        let pid = child.id();
        self.transition(ServiceState::Running, |s| {
            s.pid = pid;
            s.started_at = Some(Utc::now());
        });
        tracing::info!("service_started: name={}, pid={:?}", self.name(), pid);

        // Slot stays locked until our handle is stored; a restart issued by
        // the new monitor lands after it.
        let service = Arc::clone(self);
        let mut monitor = self.monitor.lock();
        *monitor = Some(runtime.spawn(async move { service.monitor(child, token).await }));

        Ok(())
    }

    /// Ask the running process to terminate.
    ///
    /// Sends SIGTERM, escalating to SIGKILL only if SIGTERM cannot be
    /// delivered. Returns once the signal is delivered; the monitor reaps the
    /// process and force-kills it if it outlives the stop timeout.
    pub fn stop(&self) -> Result<()> {
        let pid = {
            let status = self.status.read();
            if status.state != ServiceState::Running {
                return Err(Error::NotRunning(self.name().to_string()));
            }
            status.pid
        };

        self.transition(ServiceState::Stopping, |_| {});
        self.cancel.lock().cancel();

        if let Some(pid) = pid {
            let target = Pid::from_raw(pid as i32);
            if let Err(term_err) = kill(target, Signal::SIGTERM) {
                tracing::warn!(
                    "service_sigterm_failed: name={}, pid={}, error={}",
                    self.name(),
                    pid,
                    term_err
                );
                if let Err(source) = kill(target, Signal::SIGKILL) {
                    tracing::error!(
                        "service_kill_failed: name={}, pid={}, error={}",
                        self.name(),
                        pid,
                        source
                    );
                    self.transition(ServiceState::Failed, |s| {
                        s.last_error = Some(format!("failed to kill process {pid}: {source}"));
                    });
                    return Err(Error::KillFailed {
                        service: self.name().to_string(),
                        source,
                    });
                }
            }
        }

        self.transition(ServiceState::Stopped, |_| {});
        tracing::info!("service_stopped: name={}", self.name());
        Ok(())
    }

    /// Stop, bump the restart counter, start again.
    pub fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop()?;
        self.record_restart();
        self.start()
    }

    /// Wait until the monitor of the last run has reaped its process.
    ///
    /// Only meaningful once the service is no longer running: after `stop`
    /// this returns when the process exited or was force-killed at
    /// `stop_timeout`.
    pub async fn wait_reaped(&self) {
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("service_monitor_aborted: name={}, error={}", self.name(), e);
            }
        }
    }

    // =========================================================================
    // Monitor
    // =========================================================================

    /// Wait for the process to exit and apply the restart policy.
    async fn monitor(self: Arc<Self>, mut child: Child, token: CancellationToken) {
        let exit = tokio::select! {
            result = child.wait() => result,
            _ = token.cancelled() => {
                self.reap_stopped(&mut child).await;
                return;
            }
        };

        if token.is_cancelled() {
            tracing::debug!("service_exit_after_stop: name={}", self.name());
            return;
        }

        let error = match exit {
            Ok(status) if status.success() => None,
            Ok(status) => Some(format!("process exited with {status}")),
            Err(e) => Some(format!("failed to wait for process: {e}")),
        };
        let exited_with_error = error.is_some();

        tracing::warn!(
            "service_exited_unexpectedly: name={}, error={:?}",
            self.name(),
            error
        );
        self.transition(ServiceState::Failed, |s| s.last_error = error);

        if self.config.restart.should_restart(exited_with_error) {
            self.record_restart();
            tracing::info!(
                "service_auto_restart: name={}, policy={:?}",
                self.name(),
                self.config.restart
            );
            if let Err(e) = self.start() {
                tracing::error!("service_auto_restart_failed: name={}, error={}", self.name(), e);
            }
        }
    }

    /// Give a deliberately stopped process `stop_timeout` to exit.
    async fn reap_stopped(&self, child: &mut Child) {
        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("service_reaped: name={}, status={}", self.name(), status);
            }
            Ok(Err(e)) => {
                tracing::warn!("service_wait_failed: name={}, error={}", self.name(), e);
            }
            Err(_) => {
                tracing::warn!(
                    "service_stop_timeout: name={}, timeout={:?}, force killing",
                    self.name(),
                    self.stop_timeout
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!("service_force_kill_failed: name={}, error={}", self.name(), e);
                }
            }
        }
    }

    // =========================================================================
    // Status updates
    // =========================================================================

    /// Replace the cancellation token for a new run.
    fn rearm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    /// Apply `mutate`, move to `state`, publish if the state changed.
    fn transition<F>(&self, state: ServiceState, mutate: F)
    where
        F: FnOnce(&mut ServiceStatus),
    {
        let (old, snapshot) = {
            let mut status = self.status.write();
            let old = status.state;
            mutate(&mut status);
            status.state = state;
            if !state.has_process() {
                status.pid = None;
            }
            (old, status.clone())
        };

        if old == state {
            return;
        }
        tracing::debug!(
            "service_transition: name={}, from={}, to={}",
            self.name(),
            old,
            state
        );
        if let Some(event_type) = EventType::for_state(state) {
            self.bus
                .emit_sync(&ServiceEvent::new(event_type, self.name(), snapshot));
        }
    }

    fn record_restart(&self) {
        let snapshot = {
            let mut status = self.status.write();
            status.restart_count += 1;
            status.clone()
        };
        self.bus
            .emit(ServiceEvent::new(EventType::Restart, self.name(), snapshot));
    }
}
