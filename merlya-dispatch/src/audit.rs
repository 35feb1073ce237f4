//! Audit sinks.
//!
//! The sink is fire-and-forget at call sites: an operation that succeeded
//! must not fail because the audit table hiccuped, so append errors are
//! logged and swallowed here. Secret values never reach this module; the
//! vocabulary types carry hashes and key names only.

use merlya_secret::SecretAccessObserver;
use merlya_store::InventoryStore;
use merlya_types::{AuditOutcome, AuditRecord, SecretAccessEvent};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Append-only audit destination.
pub trait AuditSink: Send + Sync {
    /// Record one event. Must not panic; errors are the sink's problem.
    fn append(&self, record: AuditRecord);

    /// Flush buffered records. Default: no-op (synchronous sinks).
    fn flush(&self) {}
}

/// Sink writing to the inventory's `audit` table.
pub struct StoreAuditSink {
    store: Arc<InventoryStore>,
}

impl StoreAuditSink {
    /// A sink appending to `store`.
    pub fn new(store: Arc<InventoryStore>) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditSink {
    fn append(&self, record: AuditRecord) {
        if let Err(e) = self.store.append_audit(&record) {
            warn!(action = %record.action, "audit append failed: {e}");
        }
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: AuditRecord) {
        self.records.lock().expect("audit lock").push(record);
    }
}

/// Bridges secret-store access events into the audit sink. The event
/// carries the key name and outcome; the value field does not exist.
pub struct SecretAuditBridge {
    sink: Arc<dyn AuditSink>,
}

impl SecretAuditBridge {
    /// A bridge appending to `sink`.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }
}

impl SecretAccessObserver for SecretAuditBridge {
    fn on_access(&self, event: &SecretAccessEvent) {
        let mut record = AuditRecord::new(
            "process",
            "secret_access",
            event.key.as_str(),
            AuditOutcome::Ok,
        );
        record.metadata = serde_json::json!({
            "outcome": event.outcome,
            "access_count": event.access_count,
        });
        self.sink.append(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use merlya_types::SecretKey;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn sink_is_object_safe() {
        _assert_send_sync::<Arc<dyn AuditSink>>();
        let _: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
    }

    #[test]
    fn bridge_records_key_name_only() {
        let sink = Arc::new(MemoryAuditSink::new());
        let bridge = SecretAuditBridge::new(sink.clone());
        bridge.on_access(&SecretAccessEvent {
            key: SecretKey::parse("sudo:box-1:password").unwrap(),
            outcome: merlya_types::SecretAccessOutcome::Resolved,
            access_count: 3,
            timestamp_ms: 0,
        });
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "secret_access");
        assert_eq!(records[0].target, "sudo:box-1:password");
        assert_eq!(records[0].metadata["access_count"], 3);
    }
}
