//! Control protocol (MCP) - per-service remote functions.
//!
//! Each service exposes a set of named functions. A request names the
//! service, the function and a parameter mapping; the handler resolves the
//! pair, invokes the function and wraps the outcome in a [`ControlResponse`].
//! Failures, including panics inside a function, always come back as an
//! error string in the envelope.
//!
//! Transport is out of scope: callers hand requests to
//! [`ControlProtocolHandler::handle_request`] however they receive them.

use crate::bus::ServiceEvent;
use crate::supervisor::with_recovery;
use crate::types::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Parameter mapping carried by a request.
pub type Params = Map<String, Value>;

// =============================================================================
// Wire contract
// =============================================================================

/// Invoke `function` on `service`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub service: String,
    pub function: String,
    #[serde(default)]
    pub params: Params,
}

impl ControlRequest {
    pub fn new(service: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            function: function.into(),
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Outcome envelope. Exactly one of `data` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<Value>> for ControlResponse {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

// =============================================================================
// Functions
// =============================================================================

/// A remotely invocable function.
pub trait ControlFunction: Send + Sync {
    fn call(&self, params: &Params) -> Result<Value>;
}

impl<F> ControlFunction for F
where
    F: Fn(&Params) -> Result<Value> + Send + Sync,
{
    fn call(&self, params: &Params) -> Result<Value> {
        self(params)
    }
}

type FunctionTable = HashMap<String, Arc<dyn ControlFunction>>;

// =============================================================================
// Handler
// =============================================================================

/// Registry of service → function → handler, plus the request dispatcher.
#[derive(Default)]
pub struct ControlProtocolHandler {
    functions: RwLock<HashMap<String, FunctionTable>>,
}

impl fmt::Debug for ControlProtocolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions = self.functions.read();
        let mut services: Vec<&String> = functions.keys().collect();
        services.sort();
        f.debug_struct("ControlProtocolHandler")
            .field("services", &services)
            .finish()
    }
}

impl ControlProtocolHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `service`. Fails if the pair already exists.
    pub fn register_function<F>(&self, service: &str, name: &str, function: F) -> Result<()>
    where
        F: ControlFunction + 'static,
    {
        let mut functions = self.functions.write();
        let table = functions.entry(service.to_string()).or_default();

        if table.contains_key(name) {
            return Err(Error::DuplicateFunction {
                service: service.to_string(),
                function: name.to_string(),
            });
        }

        table.insert(name.to_string(), Arc::new(function));
        tracing::debug!("control_function_registered: service={}, function={}", service, name);
        Ok(())
    }

    /// Resolve, invoke and wrap. Never returns a raw error.
    pub fn handle_request(&self, request: &ControlRequest) -> ControlResponse {
        let function = match self.resolve(&request.service, &request.function) {
            Ok(function) => function,
            Err(e) => {
                tracing::debug!("control_request_rejected: {}", e);
                return ControlResponse::err(e.to_string());
            }
        };

        let operation = format!("{}.{}", request.service, request.function);
        let result = with_recovery(|| function.call(&request.params), &operation);
        if let Err(ref e) = result {
            tracing::warn!("control_function_failed: {}, error={}", operation, e);
        }
        result.into()
    }

    /// Function names registered for `service`, sorted.
    pub fn get_registered_functions(&self, service: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .get(service)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Drop one function of `service`. Returns false if it was not registered.
    pub fn unregister_function(&self, service: &str, name: &str) -> bool {
        let mut functions = self.functions.write();
        let Some(table) = functions.get_mut(service) else {
            return false;
        };
        let removed = table.remove(name).is_some();
        if table.is_empty() {
            functions.remove(service);
        }
        removed
    }

    /// Drop every function of `service`. Returns the number removed.
    pub fn unregister_service(&self, service: &str) -> usize {
        self.functions
            .write()
            .remove(service)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    /// Forward a lifecycle event to external observers.
    ///
    /// Events are serialised to JSON and written to the `ldh_init::notify`
    /// log target. Returns the JSON that was emitted.
    pub fn notify(&self, event: &ServiceEvent) -> Result<String> {
        let json = serde_json::to_string(event)?;
        tracing::info!(target: "ldh_init::notify", "service_event: {}", json);
        Ok(json)
    }

    /// Clone the handler out so no lock is held while it runs.
    fn resolve(&self, service: &str, function: &str) -> Result<Arc<dyn ControlFunction>> {
        let functions = self.functions.read();
        let table = functions
            .get(service)
            .ok_or_else(|| Error::ServiceNotFound(service.to_string()))?;
        table
            .get(function)
            .cloned()
            .ok_or_else(|| Error::FunctionNotFound {
                service: service.to_string(),
                function: function.to_string(),
            })
    }
}
