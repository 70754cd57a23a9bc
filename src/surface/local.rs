//! In-process surface host
//!
//! Keeps the registered catalog and the latest variable values, counts
//! feedback invalidations, and fans every change out on a broadcast channel
//! (the HTTP/WebSocket front end subscribes to it).

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{Surface, SurfaceContribution};
use crate::device::ConnectionState;

/// Change notification sent to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SurfaceEvent {
    Variable { id: String, value: Value },
    FeedbackInvalidated { id: String },
    Status { state: ConnectionState },
}

/// Surface host living inside the gateway process
pub struct LocalSurface {
    definitions: RwLock<SurfaceContribution>,
    values: DashMap<String, Value>,
    feedback_checks: DashMap<String, u64>,
    status: RwLock<ConnectionState>,
    events: broadcast::Sender<SurfaceEvent>,
}

impl LocalSurface {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            definitions: RwLock::new(SurfaceContribution::default()),
            values: DashMap::new(),
            feedback_checks: DashMap::new(),
            status: RwLock::new(ConnectionState::Disconnected),
            events,
        }
    }

    /// Snapshot of the registered catalog
    pub fn definitions(&self) -> SurfaceContribution {
        self.definitions.read().clone()
    }

    /// Latest value of one variable
    pub fn variable(&self, id: &str) -> Option<Value> {
        self.values.get(id).map(|entry| entry.value().clone())
    }

    /// All variable values, sorted by id
    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// How many times a feedback was invalidated
    pub fn feedback_checks(&self, id: &str) -> u64 {
        self.feedback_checks.get(id).map(|c| *c).unwrap_or(0)
    }

    /// Last connection state reported
    pub fn status(&self) -> ConnectionState {
        *self.status.read()
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SurfaceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for LocalSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for LocalSurface {
    fn set_definitions(&self, definitions: &SurfaceContribution) {
        debug!(
            "Surface catalog: {} actions, {} feedbacks, {} variables",
            definitions.actions.len(),
            definitions.feedbacks.len(),
            definitions.variables.len()
        );
        let known: HashSet<&str> = definitions
            .variables
            .iter()
            .map(|v| v.variable_id.as_str())
            .collect();
        self.values.retain(|id, _| known.contains(id.as_str()));
        *self.definitions.write() = definitions.clone();
    }

    fn set_variable_values(&self, values: Vec<(String, Value)>) {
        for (id, value) in values {
            let changed = self
                .values
                .insert(id.clone(), value.clone())
                .map(|previous| previous != value)
                .unwrap_or(true);
            if changed {
                trace!("Variable {} = {}", id, value);
                self.publish(SurfaceEvent::Variable { id, value });
            }
        }
    }

    fn check_feedbacks(&self, feedback_ids: &[&str]) {
        for id in feedback_ids {
            *self.feedback_checks.entry(id.to_string()).or_insert(0) += 1;
            self.publish(SurfaceEvent::FeedbackInvalidated { id: id.to_string() });
        }
    }

    fn update_status(&self, state: ConnectionState) {
        *self.status.write() = state;
        self.publish(SurfaceEvent::Status { state });
    }
}
