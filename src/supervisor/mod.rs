//! Service supervision.
//!
//! - `types` - definitions, states, policies and status snapshots
//! - `service` - one supervised process and its monitor
//! - `state` - mirrored states and the dependency gate
//! - `manager` - the orchestrator tying services, bus and control together
//! - `recovery` - panic containment for caller-supplied closures

pub mod manager;
pub mod recovery;
pub mod service;
pub mod state;
pub mod types;

pub use manager::ServiceManager;
pub use recovery::with_recovery;
pub use service::Service;
pub use state::StateManager;
pub use types::{
    ControlConfig, RestartPolicy, ServiceConfig, ServiceState, ServiceStatus, ServiceType,
    CONTROL_RESTART, CONTROL_START, CONTROL_STATUS, CONTROL_STOP,
};
