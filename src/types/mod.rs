//! Core types for the init core.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (SubscriptionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for supervision, logging and boot

pub mod config;
mod errors;
mod ids;

pub use config::{BootConfig, Config, ObservabilityConfig, SupervisorConfig};
pub use errors::{Error, ErrorKind, Result};
pub use ids::SubscriptionId;
