//! Configuration structures.
//!
//! Configuration is loaded from defaults and environment variables. Service
//! definitions themselves live in a separate YAML file, see
//! [`crate::supervisor::ServiceConfig`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the service definitions file.
pub const DEFAULT_SERVICES_PATH: &str = "/etc/ldh-os/services.yaml";

/// Environment variable overriding the service definitions path.
pub const SERVICES_PATH_ENV: &str = "LDH_SERVICES_CONFIG";

/// Environment variable selecting the log format (`json` or text).
pub const LOG_FORMAT_ENV: &str = "LDH_LOG_FORMAT";

/// Environment variable overriding the stop timeout (humantime, e.g. `5s`).
pub const STOP_TIMEOUT_ENV: &str = "LDH_STOP_TIMEOUT";

/// Global init configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Supervision behaviour.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Boot-time collaborator settings.
    #[serde(default)]
    pub boot: BootConfig,
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(SERVICES_PATH_ENV) {
            if !path.is_empty() {
                config.boot.services_path = PathBuf::from(path);
            }
        }

        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            config.observability.json_logs = format.eq_ignore_ascii_case("json");
        }

        if let Ok(raw) = std::env::var(STOP_TIMEOUT_ENV) {
            match humantime_serde::re::humantime::parse_duration(&raw) {
                Ok(timeout) => config.supervisor.stop_timeout = timeout,
                Err(e) => tracing::warn!("invalid {}={}: {}", STOP_TIMEOUT_ENV, raw, e),
            }
        }

        config
    }
}

/// Supervision behaviour shared by all services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// How long a stopped process may take to exit after the graceful signal
    /// before the monitor force-kills it.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Boot-time collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// Path of the YAML service definitions.
    pub services_path: PathBuf,

    /// Mount /proc, /sys and /dev before starting services.
    pub mount_filesystems: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            services_path: PathBuf::from(DEFAULT_SERVICES_PATH),
            mount_filesystems: true,
        }
    }
}
