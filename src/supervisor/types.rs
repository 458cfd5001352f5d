//! Supervisor types: ServiceState, ServiceConfig, ServiceStatus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::types::{Error, Result};

/// Service lifecycle state.
///
/// State transitions:
/// ```text
/// UNKNOWN → STARTING → RUNNING → STOPPING → STOPPED
///              ↓          ↓          ↓
///            FAILED ←─────┴──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Unknown => "unknown",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }

    /// States in which the recorded pid refers to a live process.
    pub fn has_process(self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Stopping
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of service. Recorded and reported; supervision is identical for all
/// kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Long-running background process.
    #[default]
    Daemon,
    /// Runs once to completion.
    Oneshot,
    /// Runs repeatedly on a schedule.
    Periodic,
}

/// Rule governing automatic restart after an unexpected exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    #[default]
    Never,
}

impl RestartPolicy {
    /// Decide whether an unexpected exit warrants a restart.
    pub fn should_restart(self, exited_with_error: bool) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => exited_with_error,
            RestartPolicy::Never => false,
        }
    }
}

/// Control functions a service may expose.
pub const CONTROL_START: &str = "start";
pub const CONTROL_STOP: &str = "stop";
pub const CONTROL_RESTART: &str = "restart";
pub const CONTROL_STATUS: &str = "status";

/// Control-protocol block of a service definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ControlConfig {
    /// Enabled function names (`start`, `stop`, `restart`, `status`).
    #[serde(default)]
    pub functions: Vec<String>,

    /// Capability tags. Advisory, not enforced.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Declarative definition of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique key. In the YAML file the name is the mapping key.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default)]
    pub service_type: ServiceType,

    /// Path of the executable.
    #[serde(rename = "exec")]
    pub exec_path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Overrides layered on top of the inherited process environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    #[serde(default)]
    pub restart: RestartPolicy,

    #[serde(rename = "mcp", default)]
    pub control: ControlConfig,
}

impl ServiceConfig {
    /// Minimal daemon definition; remaining fields take their defaults.
    pub fn new(name: impl Into<String>, exec_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            service_type: ServiceType::Daemon,
            exec_path: exec_path.into(),
            args: Vec::new(),
            dependencies: Vec::new(),
            environment: HashMap::new(),
            restart: RestartPolicy::Never,
            control: ControlConfig::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.control.functions = functions.into_iter().map(Into::into).collect();
        self
    }

    /// Reject definitions the registry cannot key.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("service name cannot be empty"));
        }
        if self.exec_path.is_empty() {
            return Err(Error::config(format!(
                "service {} has no exec path",
                self.name
            )));
        }
        Ok(())
    }
}

/// Runtime status of a service. Owned and mutated only by its `Service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceStatus {
    pub state: ServiceState,

    /// OS pid; `Some` only while a process is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    pub restart_count: u32,

    /// Most recent failure (spawn error or abnormal exit).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_decisions() {
        assert!(RestartPolicy::Always.should_restart(false));
        assert!(RestartPolicy::Always.should_restart(true));
        assert!(RestartPolicy::OnFailure.should_restart(true));
        assert!(!RestartPolicy::OnFailure.should_restart(false));
        assert!(!RestartPolicy::Never.should_restart(true));
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
description: "Cron daemon"
type: "daemon"
exec: "/usr/sbin/crond"
args: ["-n"]
dependencies: ["syslog"]
environment:
  TZ: UTC
restart: "on-failure"
mcp:
  functions: ["start", "status"]
  permissions: ["read"]
"#;
        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "");
        assert_eq!(config.service_type, ServiceType::Daemon);
        assert_eq!(config.exec_path, "/usr/sbin/crond");
        assert_eq!(config.args, vec!["-n"]);
        assert_eq!(config.dependencies, vec!["syslog"]);
        assert_eq!(config.environment.get("TZ").map(String::as_str), Some("UTC"));
        assert_eq!(config.restart, RestartPolicy::OnFailure);
        assert_eq!(config.control.functions, vec!["start", "status"]);
        assert_eq!(config.control.permissions, vec!["read"]);
    }

    #[test]
    fn test_config_defaults() {
        let config: ServiceConfig = serde_yaml::from_str("exec: /bin/true").unwrap();
        assert!(config.args.is_empty());
        assert!(config.dependencies.is_empty());
        assert_eq!(config.restart, RestartPolicy::Never);
        assert_eq!(config.service_type, ServiceType::Daemon);
        assert!(config.control.functions.is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let err = ServiceConfig::new("  ", "/bin/true").validate().unwrap_err();
        assert!(err.to_string().contains("name cannot be empty"));
        assert!(ServiceConfig::new("ok", "/bin/true").validate().is_ok());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ServiceState::Running).unwrap(),
            serde_json::json!("running")
        );
        assert!(ServiceState::Stopping.has_process());
        assert!(!ServiceState::Failed.has_process());
    }
}
