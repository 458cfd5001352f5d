//! Event bus for service lifecycle notifications.
//!
//! Every state transition of a supervised service is published here. Two
//! delivery modes exist:
//!   - **emit**: fire-and-forget, one task per handler, caller never waits
//!   - **emit_sync**: sequential on the caller's context, returns after every
//!     handler ran (used on the state-transition path)
//!
//! Handlers subscribe to one event type or to [`EventFilter::All`]. Each
//! subscription is identified by the [`SubscriptionId`] returned from
//! [`EventBus::subscribe`]; unsubscribing removes exactly that handler.

use crate::supervisor::{with_recovery, ServiceState, ServiceStatus};
use crate::types::SubscriptionId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Event Types
// =============================================================================

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    /// The restart counter was incremented.
    Restart,
}

impl EventType {
    /// Event announcing entry into `state`. `Unknown` is never entered.
    pub fn for_state(state: ServiceState) -> Option<Self> {
        match state {
            ServiceState::Unknown => None,
            ServiceState::Starting => Some(EventType::Starting),
            ServiceState::Running => Some(EventType::Running),
            ServiceState::Stopping => Some(EventType::Stopping),
            ServiceState::Stopped => Some(EventType::Stopped),
            ServiceState::Failed => Some(EventType::Failed),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Starting => "starting",
            EventType::Running => "running",
            EventType::Stopping => "stopping",
            EventType::Stopped => "stopped",
            EventType::Failed => "failed",
            EventType::Restart => "restart",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event published by a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub event_type: EventType,
    pub service: String,
    /// Status snapshot taken right after the change.
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
}

impl ServiceEvent {
    pub fn new(event_type: EventType, service: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            event_type,
            service: service.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Which events a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// Every event, regardless of type.
    All,
    Only(EventType),
}

impl From<EventType> for EventFilter {
    fn from(event_type: EventType) -> Self {
        EventFilter::Only(event_type)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Shared handler callable from any thread.
pub type EventHandler = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    handler: EventHandler,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

// =============================================================================
// EventBus
// =============================================================================

/// In-memory publish/subscribe bus for lifecycle events.
#[derive(Debug, Default)]
pub struct EventBus {
    /// filter -> subscribers, in subscription order
    subscribers: RwLock<HashMap<EventFilter, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events matching `filter`.
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        let filter = filter.into();
        let id = SubscriptionId::new();

        self.subscribers
            .write()
            .entry(filter)
            .or_default()
            .push(Subscriber {
                id: id.clone(),
                handler: Arc::new(handler),
            });

        tracing::debug!("subscribed: id={}, filter={:?}", id, filter);
        id
    }

    /// Remove the subscription `id`. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();

        for subs in subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| &s.id == id) {
                subs.remove(pos);
                tracing::debug!("unsubscribed: id={}", id);
                return true;
            }
        }
        false
    }

    /// Number of live subscriptions across all filters.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }

    /// Exact-type subscribers first, then wildcard subscribers.
    ///
    /// The list is cloned so no lock is held while handlers run; a handler
    /// may subscribe or unsubscribe without deadlocking.
    fn targets(&self, event_type: EventType) -> Vec<Subscriber> {
        let subscribers = self.subscribers.read();
        let exact = subscribers
            .get(&EventFilter::Only(event_type))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let wildcard = subscribers
            .get(&EventFilter::All)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        exact.iter().chain(wildcard).cloned().collect()
    }

    /// Fan the event out without waiting.
    ///
    /// Each handler runs on its own task; panics are contained in that task.
    /// Returns the number of handlers dispatched.
    pub fn emit(&self, event: ServiceEvent) -> usize {
        let targets = self.targets(event.event_type);
        let count = targets.len();
        let runtime = tokio::runtime::Handle::try_current();

        for subscriber in targets {
            let event = event.clone();
            let deliver = move || {
                let _ = with_recovery(
                    || {
                        (subscriber.handler)(&event);
                        Ok(())
                    },
                    "event_handler",
                );
            };
            match &runtime {
                Ok(handle) => {
                    handle.spawn(async move { deliver() });
                }
                Err(_) => {
                    std::thread::spawn(deliver);
                }
            }
        }

        tracing::debug!(
            "event_emitted: type={}, service={}, handlers={}",
            event.event_type,
            event.service,
            count
        );
        count
    }

    /// Deliver the event to every handler in order before returning.
    pub fn emit_sync(&self, event: &ServiceEvent) -> usize {
        let targets = self.targets(event.event_type);

        for subscriber in &targets {
            if let Err(e) = with_recovery(
                || {
                    (subscriber.handler)(event);
                    Ok(())
                },
                "event_handler",
            ) {
                tracing::warn!(
                    "event_handler_failed: subscription={}, error={}",
                    subscriber.id,
                    e
                );
            }
        }

        targets.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
