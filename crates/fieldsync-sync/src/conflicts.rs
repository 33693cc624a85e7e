//! Queue of conflicts awaiting manual resolution.

use std::sync::Arc;

use parking_lot::Mutex;

use fieldsync_core::{ConflictRecord, EntityKind, RecordId};

use crate::listeners::{Listeners, Subscription};

/// Observable list of unresolved conflicts, at most one per record.
///
/// Recording a conflict does not notify; the pull engine calls
/// [`ConflictQueue::notify`] once per pass.
#[derive(Clone, Default)]
pub struct ConflictQueue {
    entries: Arc<Mutex<Vec<ConflictRecord>>>,
    listeners: Listeners<Vec<ConflictRecord>>,
}

impl ConflictQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a conflict, replacing any earlier one for the same record.
    pub fn record(&self, conflict: ConflictRecord) {
        let mut entries = self.entries.lock();
        match entries
            .iter_mut()
            .find(|c| c.record_type == conflict.record_type && c.record_id == conflict.record_id)
        {
            Some(existing) => *existing = conflict,
            None => entries.push(conflict),
        }
    }

    /// Remove and return the conflict for a record.
    pub fn take(&self, kind: EntityKind, id: &RecordId) -> Option<ConflictRecord> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|c| c.record_type == kind && &c.record_id == id)?;
        Some(entries.remove(index))
    }

    pub fn get(&self, kind: EntityKind, id: &RecordId) -> Option<ConflictRecord> {
        self.entries
            .lock()
            .iter()
            .find(|c| c.record_type == kind && &c.record_id == id)
            .cloned()
    }

    pub fn contains(&self, kind: EntityKind, id: &RecordId) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|c| c.record_type == kind && &c.record_id == id)
    }

    /// All queued conflicts, oldest first.
    pub fn list(&self) -> Vec<ConflictRecord> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Observe the queue; the listener receives the full list on every
    /// notification.
    pub fn subscribe(
        &self,
        listener: impl Fn(&Vec<ConflictRecord>) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(listener)
    }

    /// Broadcast the current list.
    pub fn notify(&self) {
        let snapshot = self.list();
        self.listeners.emit(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{
        detect, ConflictDecision, ConflictPolicy, EntityPayload, LocalRecord, Project,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict(id: &str, remote_name: &str) -> ConflictRecord {
        let payload = |name: &str| {
            EntityPayload::Project(Project {
                name: name.into(),
                client_name: "Acme".into(),
                address: None,
                status: "active".into(),
                notes: None,
            })
        };
        let local = LocalRecord::dirty(RecordId::new(id), payload("local"), 10);
        let remote = LocalRecord::clean(RecordId::new(id), payload(remote_name), 20);
        match detect(Some(&local), &remote, ConflictPolicy::Manual, 30).unwrap() {
            ConflictDecision::Conflict(c) => *c,
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_record_replaces_same_record() {
        let queue = ConflictQueue::new();
        queue.record(conflict("p1", "first"));
        queue.record(conflict("p2", "other"));
        queue.record(conflict("p1", "second"));

        assert_eq!(queue.len(), 2);
        let p1 = queue.get(EntityKind::Project, &RecordId::new("p1")).unwrap();
        assert_eq!(p1.remote_version.payload.display_name(), "second");
    }

    #[test]
    fn test_take_removes() {
        let queue = ConflictQueue::new();
        queue.record(conflict("p1", "remote"));
        assert!(queue.contains(EntityKind::Project, &RecordId::new("p1")));
        assert!(!queue.contains(EntityKind::Contact, &RecordId::new("p1")));
        assert!(queue.take(EntityKind::Project, &RecordId::new("p1")).is_some());
        assert!(!queue.contains(EntityKind::Project, &RecordId::new("p1")));
        assert!(queue.take(EntityKind::Project, &RecordId::new("p1")).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_notify_is_explicit() {
        let queue = ConflictQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _sub = queue.subscribe(move |list| {
            assert!(!list.is_empty());
            c.fetch_add(1, Ordering::SeqCst);
        });

        queue.record(conflict("p1", "a"));
        queue.record(conflict("p2", "b"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        queue.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
