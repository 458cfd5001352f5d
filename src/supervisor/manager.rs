//! Service manager - the orchestrator.
//!
//! Owns every [`Service`], keeps the [`StateManager`] mirror current, and
//! exposes each service's allowlisted control functions through the
//! [`ControlProtocolHandler`]. Dependencies act as a readiness gate checked
//! at start time: `start_all` walks services in registration order and fails
//! fast if a dependency is not yet running. It does not reorder them.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::service::Service;
use super::state::StateManager;
use super::types::{
    ServiceConfig, ServiceState, ServiceStatus, CONTROL_RESTART, CONTROL_START, CONTROL_STATUS,
    CONTROL_STOP,
};
use crate::bus::{EventBus, EventFilter, EventType, ServiceEvent};
use crate::control::{ControlFunction, ControlProtocolHandler, ControlRequest, ControlResponse, Params};
use crate::types::{Error, Result, SubscriptionId, SupervisorConfig};

/// Registered services plus their registration order.
#[derive(Debug, Default)]
struct Registry {
    services: HashMap<String, Arc<Service>>,
    order: Vec<String>,
}

#[derive(Debug)]
pub struct ServiceManager {
    registry: RwLock<Registry>,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    control: Arc<ControlProtocolHandler>,
    config: SupervisorConfig,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    pub fn with_config(config: SupervisorConfig) -> Self {
        let state = Arc::new(StateManager::new());
        let bus = Arc::new(EventBus::new());
        let control = Arc::new(ControlProtocolHandler::new());

        // Keep the mirror current for transitions no orchestrator call caused,
        // such as a crash detected by a monitor.
        let mirror = Arc::clone(&state);
        bus.subscribe(EventFilter::All, move |event: &ServiceEvent| {
            if event.event_type != EventType::Restart {
                mirror.update_state(&event.service, event.status.state);
            }
        });

        let notifier = Arc::clone(&control);
        bus.subscribe(EventFilter::All, move |event: &ServiceEvent| {
            if let Err(e) = notifier.notify(event) {
                tracing::warn!("event_notify_failed: service={}, error={}", event.service, e);
            }
        });

        Self {
            registry: RwLock::new(Registry::default()),
            state,
            bus,
            control,
            config,
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Parse YAML service definitions and register them in file order.
    ///
    /// The document is a mapping from service name to definition. Returns the
    /// number of services registered; stops at the first failure.
    pub fn load_services(&self, config_bytes: &[u8]) -> Result<usize> {
        if config_bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(0);
        }
        let Some(mapping) = serde_yaml::from_slice::<Option<serde_yaml::Mapping>>(config_bytes)?
        else {
            return Ok(0);
        };

        let mut loaded = 0;
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| Error::config(format!("service name must be a string, got {key:?}")))?
                .to_string();
            let mut config: ServiceConfig = serde_yaml::from_value(value).map_err(|e| {
                Error::config(format!("invalid definition for service {name}: {e}"))
            })?;
            config.name = name;

            self.register_service(config)?;
            loaded += 1;
        }

        tracing::info!("services_loaded: count={}", loaded);
        Ok(loaded)
    }

    /// Register one service, its dependencies and its control functions.
    pub fn register_service(&self, config: ServiceConfig) -> Result<()> {
        config.validate()?;

        let mut registry = self.registry.write();
        if registry.services.contains_key(&config.name) {
            return Err(Error::DuplicateService(config.name));
        }

        let name = config.name.clone();
        let service = Arc::new(Service::new(
            config,
            Arc::clone(&self.bus),
            self.config.stop_timeout,
        ));

        self.state
            .set_dependencies(&name, service.config().dependencies.clone());

        let mut registered: Vec<&str> = Vec::new();
        for function in &service.config().control.functions {
            let result = self.control.register_function(
                &name,
                function,
                control_function(&service, &self.state, function),
            );
            if let Err(e) = result {
                for done in registered {
                    self.control.unregister_function(&name, done);
                }
                self.state.remove_service(&name);
                return Err(e);
            }
            registered.push(function);
        }

        self.state.update_state(&name, ServiceState::Unknown);
        registry.order.push(name.clone());
        registry.services.insert(name.clone(), service);

        tracing::info!("service_registered: name={}", name);
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start `name` once every dependency is running.
    pub fn start_service(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;

        if !self.state.check_dependencies(name) {
            let unmet = self.state.unmet_dependencies(name);
            tracing::warn!(
                "service_dependencies_unsatisfied: name={}, unmet={:?}",
                name,
                unmet
            );
            return Err(Error::DependencyUnsatisfied {
                service: name.to_string(),
                unmet,
            });
        }

        let result = service.start();
        self.state.update_state(name, service.state());
        result
    }

    pub fn stop_service(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;
        let result = service.stop();
        self.state.update_state(name, service.state());
        result
    }

    pub fn restart_service(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;
        let result = service.restart();
        self.state.update_state(name, service.state());
        result
    }

    /// Start every service in registration order, aborting on the first error.
    pub fn start_all(&self) -> Result<()> {
        let names = self.service_names();
        tracing::info!("starting_all_services: count={}", names.len());

        for name in &names {
            self.start_service(name)?;
        }
        Ok(())
    }

    /// Stop every service in reverse registration order, aborting on the
    /// first error.
    pub fn stop_all(&self) -> Result<()> {
        let names = self.service_names();
        tracing::info!("stopping_all_services: count={}", names.len());

        for name in names.iter().rev() {
            self.stop_service(name)?;
        }
        Ok(())
    }

    /// Wait until every service that is no longer running has been reaped.
    ///
    /// Call after `stop_all` so processes finish their termination handlers
    /// before the runtime goes away. Each wait is bounded by the stop timeout
    /// and the forced kill that follows it.
    pub async fn wait_stopped(&self) {
        let services: Vec<Arc<Service>> = {
            let registry = self.registry.read();
            registry
                .order
                .iter()
                .rev()
                .filter_map(|name| registry.services.get(name).cloned())
                .collect()
        };

        for service in services {
            if service.state() != ServiceState::Running {
                service.wait_reaped().await;
            }
        }
        tracing::debug!("services_reaped");
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn get_service_status(&self, name: &str) -> Result<ServiceStatus> {
        Ok(self.lookup(name)?.status())
    }

    /// Status snapshot of every service, in registration order.
    pub fn list_services(&self) -> Vec<(String, ServiceStatus)> {
        let registry = self.registry.read();
        registry
            .order
            .iter()
            .filter_map(|name| {
                registry
                    .services
                    .get(name)
                    .map(|svc| (name.clone(), svc.status()))
            })
            .collect()
    }

    /// Registered names in registration order.
    pub fn service_names(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.registry.read().services.get(name).cloned()
    }

    // =========================================================================
    // Control protocol and events
    // =========================================================================

    /// Dispatch a control request.
    pub fn handle_request(&self, request: &ControlRequest) -> ControlResponse {
        self.control.handle_request(request)
    }

    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(filter, handler)
    }

    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn control(&self) -> &Arc<ControlProtocolHandler> {
        &self.control
    }

    fn lookup(&self, name: &str) -> Result<Arc<Service>> {
        self.service(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Control function dispatching `function` to `service`.
///
/// Start/stop/restart mirror the resulting state and, like `status`, answer
/// with the status snapshot.
fn control_function(
    service: &Arc<Service>,
    state: &Arc<StateManager>,
    function: &str,
) -> impl ControlFunction + 'static {
    let service = Arc::clone(service);
    let state = Arc::clone(state);
    let function = function.to_string();

    move |_params: &Params| -> Result<Value> {
        match function.as_str() {
            CONTROL_START => service.start()?,
            CONTROL_STOP => service.stop()?,
            CONTROL_RESTART => service.restart()?,
            CONTROL_STATUS => return Ok(serde_json::to_value(service.status())?),
            other => return Err(Error::UnknownFunction(other.to_string())),
        }
        state.update_state(service.name(), service.state());
        Ok(serde_json::to_value(service.status())?)
    }
}
