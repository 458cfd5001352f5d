//! State manager - mirrored service states and declared dependencies.
//!
//! Pure in-memory bookkeeping, no I/O. The state table is a mirror: the
//! authoritative status lives in each `Service`. The orchestrator writes
//! here after every transition-causing call, and the manager's bus
//! subscription keeps it current when a monitor detects a crash.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::types::ServiceState;

/// Service name → last-known state, and service name → dependencies.
#[derive(Debug, Default)]
pub struct StateManager {
    states: RwLock<HashMap<String, ServiceState>>,
    dependencies: RwLock<HashMap<String, Vec<String>>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_state(&self, service: &str, state: ServiceState) {
        self.states.write().insert(service.to_string(), state);
    }

    /// Last-known state; `Unknown` for services never seen.
    pub fn get_state(&self, service: &str) -> ServiceState {
        self.states
            .read()
            .get(service)
            .copied()
            .unwrap_or(ServiceState::Unknown)
    }

    pub fn set_dependencies(&self, service: &str, deps: Vec<String>) {
        self.dependencies.write().insert(service.to_string(), deps);
    }

    /// Declared dependencies, in declaration order.
    pub fn get_dependencies(&self, service: &str) -> Vec<String> {
        self.dependencies
            .read()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// Dependencies of `service` that are absent or not `running`.
    pub fn unmet_dependencies(&self, service: &str) -> Vec<String> {
        let deps = self.get_dependencies(service);
        let states = self.states.read();

        deps.into_iter()
            .filter(|dep| states.get(dep) != Some(&ServiceState::Running))
            .collect()
    }

    /// True iff every declared dependency is known and `running`.
    ///
    /// A readiness gate evaluated at start time, not a launch scheduler.
    pub fn check_dependencies(&self, service: &str) -> bool {
        self.unmet_dependencies(service).is_empty()
    }

    /// Snapshot of every mirrored state.
    pub fn get_all_services(&self) -> HashMap<String, ServiceState> {
        self.states.read().clone()
    }

    /// Forget both the state and the dependency list of `service`.
    pub fn remove_service(&self, service: &str) {
        self.states.write().remove(service);
        self.dependencies.write().remove(service);
    }
}
