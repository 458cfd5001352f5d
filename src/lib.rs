//! # ldh-init - Supervisory Core of an Init System
//!
//! Launches configured external programs as child processes and keeps them
//! running:
//! - Service lifecycle with explicit states (starting, running, stopping, ...)
//! - Restart policies applied when a process exits on its own
//! - Dependency gate: a service starts only once its dependencies run
//! - Lifecycle event bus with per-type and wildcard subscribers
//! - Control protocol exposing per-service start/stop/restart/status
//!
//! ## Architecture
//!
//! ```text
//!                 ┌───────────────────────────────────────┐
//!  YAML config →  │            ServiceManager             │
//!                 │  ┌─────────┐ ┌──────────┐ ┌─────────┐  │
//!   control   →   │  │ Service │ │  State   │ │ Control │  │
//!   requests      │  │  (x N)  │ │ Manager  │ │ Handler │  │
//!                 │  └────┬────┘ └────▲─────┘ └─────────┘  │
//!                 │       │  events   │                    │
//!                 │       └──► EventBus ──► subscribers     │
//!                 └───────────────────────────────────────┘
//! ```
//!
//! `boot::InitSystem` adds the PID 1 duties around the manager.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod boot;
pub mod bus;
pub mod control;
pub mod supervisor;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
