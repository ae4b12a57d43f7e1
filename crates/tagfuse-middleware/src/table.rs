//! [`TelemetryTable`] – batched key-value publishing on top of the bus.
//!
//! Writers stage values with [`TelemetryTable::set`]; nothing leaves the
//! process until [`TelemetryTable::flush`] publishes every staged entry as a
//! single [`EventPayload::TableUpdate`] on [`Topic::Telemetry`].  Readers on
//! the bus therefore never observe half of an update.

use std::collections::BTreeMap;

use serde_json::Value;
use tagfuse_types::{Event, EventPayload, FusionError};
use tracing::trace;

use crate::bus::{EventBus, Topic};

/// A namespaced key-value table that publishes on flush.
pub struct TelemetryTable {
    bus: EventBus,
    root: String,
    pending: BTreeMap<String, Value>,
    flushed: BTreeMap<String, Value>,
}

impl TelemetryTable {
    /// Create a table whose keys are all prefixed with `root/`.
    pub fn new(bus: EventBus, root: impl Into<String>) -> Self {
        Self {
            bus,
            root: root.into(),
            pending: BTreeMap::new(),
            flushed: BTreeMap::new(),
        }
    }

    /// Fully-qualified key for `key`.
    pub fn path(&self, key: &str) -> String {
        format!("{}/{}", self.root, key)
    }

    /// Stage `value` under `root/key`.  Later writes to the same key before
    /// a flush overwrite earlier ones.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let path = self.path(key);
        self.pending.insert(path, value.into());
    }

    /// Last flushed value of `root/key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.flushed.get(&self.path(key))
    }

    /// Number of staged, not yet flushed, entries.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Publish every staged entry as one batch.
    ///
    /// Returns the number of entries flushed; an empty stage is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates [`FusionError::Transport`] from the bus.
    pub fn flush(&mut self) -> Result<usize, FusionError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        self.flushed
            .extend(batch.iter().map(|(k, v)| (k.clone(), v.clone())));
        let receivers = self.bus.publish_to(
            Topic::Telemetry,
            Event::new("tagfuse-middleware::table", EventPayload::TableUpdate(batch)),
        )?;
        trace!(entries = count, receivers, "telemetry table flushed");
        Ok(count)
    }
}
