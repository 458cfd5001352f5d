//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. The `Display` text of the lookup errors
//! is part of the control protocol: it is what callers see in the `error`
//! field of a failed response.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the init core.
#[derive(Error, Debug)]
pub enum Error {
    /// No service registered under this name.
    #[error("service {0} not found")]
    ServiceNotFound(String),

    /// The service exists but exposes no such control function.
    #[error("function {function} not found in service {service}")]
    FunctionNotFound { service: String, function: String },

    /// A service with this name is already registered.
    #[error("service {0} already exists")]
    DuplicateService(String),

    /// The control function is already registered for this service.
    #[error("function {function} already registered for service {service}")]
    DuplicateFunction { service: String, function: String },

    #[error("service {0} is already running")]
    AlreadyRunning(String),

    #[error("service {0} is not running")]
    NotRunning(String),

    /// One or more declared dependencies are not in state `running`.
    #[error("dependencies not satisfied for service {service}: [{}]", unmet.join(", "))]
    DependencyUnsatisfied { service: String, unmet: Vec<String> },

    /// The OS refused to spawn the configured executable.
    #[error("failed to start service {service}: {source}")]
    LaunchFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    /// Neither the graceful signal nor the forceful kill could be delivered.
    #[error("failed to kill service {service}: {source}")]
    KillFailed {
        service: String,
        #[source]
        source: nix::Error,
    },

    /// A control function name outside start/stop/restart/status.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Malformed or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML service definitions that fail to parse.
    #[error("configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error taxonomy shared by all core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateRegistration,
    InvalidStateTransition,
    DependencyUnsatisfied,
    ProcessLaunchFailure,
    ProcessTerminationFailure,
    ConfigurationError,
    Internal,
}

impl ErrorKind {
    /// Stable code for logs and external callers.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::DuplicateRegistration => "ALREADY_EXISTS",
            ErrorKind::InvalidStateTransition => "FAILED_PRECONDITION",
            ErrorKind::DependencyUnsatisfied => "DEPENDENCY_UNSATISFIED",
            ErrorKind::ProcessLaunchFailure => "LAUNCH_FAILED",
            ErrorKind::ProcessTerminationFailure => "KILL_FAILED",
            ErrorKind::ConfigurationError => "INVALID_CONFIGURATION",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl Error {
    /// Map onto the error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ServiceNotFound(_)
            | Error::FunctionNotFound { .. }
            | Error::UnknownFunction(_) => ErrorKind::NotFound,
            Error::DuplicateService(_) | Error::DuplicateFunction { .. } => {
                ErrorKind::DuplicateRegistration
            }
            Error::AlreadyRunning(_) | Error::NotRunning(_) => ErrorKind::InvalidStateTransition,
            Error::DependencyUnsatisfied { .. } => ErrorKind::DependencyUnsatisfied,
            Error::LaunchFailed { .. } => ErrorKind::ProcessLaunchFailure,
            Error::KillFailed { .. } => ErrorKind::ProcessTerminationFailure,
            Error::Config(_) | Error::Yaml(_) => ErrorKind::ConfigurationError,
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
