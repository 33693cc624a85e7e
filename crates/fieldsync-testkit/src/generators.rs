//! Proptest generators for property-based testing.

use proptest::prelude::*;

use fieldsync_core::{
    Budget, Contact, EntityKind, EntityPayload, Installation, LocalRecord, Project, RecordId,
    SyncMarker,
};

use crate::fixtures::sample_project_id;

/// Generate a record id.
pub fn record_id() -> impl Strategy<Value = RecordId> {
    "[a-z0-9]{8}".prop_map(RecordId::new)
}

/// Generate a timestamp between 2001 and 2100, in epoch milliseconds.
pub fn timestamp() -> impl Strategy<Value = i64> {
    1_000_000_000_000i64..=4_102_444_800_000
}

/// Generate a sync marker.
pub fn sync_marker() -> impl Strategy<Value = SyncMarker> {
    prop_oneof![
        Just(SyncMarker::Clean),
        Just(SyncMarker::Dirty),
        Just(SyncMarker::Tombstoned),
    ]
}

/// Generate a kind that is resolved manually on conflict.
pub fn manual_kind() -> impl Strategy<Value = EntityKind> {
    prop_oneof![
        Just(EntityKind::Project),
        Just(EntityKind::Installation),
        Just(EntityKind::Contact),
        Just(EntityKind::Budget),
    ]
}

fn text() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{0,23}".prop_map(String::from)
}

fn maybe_text() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(text())
}

/// Generate a payload of `kind`. File and history kinds fall back to a
/// project payload.
pub fn payload_of(kind: EntityKind) -> BoxedStrategy<EntityPayload> {
    match kind {
        EntityKind::Installation => (text(), maybe_text(), text())
            .prop_map(|(system_type, location, status)| {
                EntityPayload::Installation(Installation {
                    project_id: sample_project_id(),
                    system_type,
                    location,
                    status,
                    installed_on: None,
                })
            })
            .boxed(),
        EntityKind::Contact => (text(), maybe_text(), maybe_text(), maybe_text())
            .prop_map(|(name, email, phone, role)| {
                EntityPayload::Contact(Contact {
                    project_id: None,
                    name,
                    email,
                    phone,
                    role,
                })
            })
            .boxed(),
        EntityKind::Budget => (text(), 0i64..10_000_000, text())
            .prop_map(|(title, amount_cents, status)| {
                EntityPayload::Budget(Budget {
                    project_id: sample_project_id(),
                    title,
                    amount_cents,
                    currency: "EUR".into(),
                    status,
                })
            })
            .boxed(),
        EntityKind::Project | EntityKind::File | EntityKind::History => {
            (text(), text(), maybe_text(), text(), maybe_text())
                .prop_map(|(name, client_name, address, status, notes)| {
                    EntityPayload::Project(Project {
                        name,
                        client_name,
                        address,
                        status,
                        notes,
                    })
                })
                .boxed()
        }
    }
}

/// Generate a user-editable payload of any manually resolved kind.
pub fn editable_payload() -> impl Strategy<Value = EntityPayload> {
    manual_kind().prop_flat_map(payload_of)
}

/// Parameters for a local record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub id: RecordId,
    pub payload: EntityPayload,
    pub marker: SyncMarker,
    pub updated_at: i64,
}

impl RecordParams {
    pub fn to_record(&self) -> LocalRecord {
        LocalRecord {
            id: self.id.clone(),
            payload: self.payload.clone(),
            marker: self.marker,
            updated_at: self.updated_at,
        }
    }
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (record_id(), editable_payload(), sync_marker(), timestamp())
            .prop_map(|(id, payload, marker, updated_at)| RecordParams {
                id,
                payload,
                marker,
                updated_at,
            })
            .boxed()
    }
}

/// Change one substantive field of `payload`.
pub fn edit_payload(payload: &EntityPayload) -> EntityPayload {
    let mut edited = payload.clone();
    match &mut edited {
        EntityPayload::Project(p) => p.name.push_str(" (edited)"),
        EntityPayload::Installation(i) => i.system_type.push_str(" (edited)"),
        EntityPayload::Contact(c) => c.name.push_str(" (edited)"),
        EntityPayload::Budget(b) => b.amount_cents += 1,
        EntityPayload::File(f) => f.file_name.push_str(".bak"),
        EntityPayload::History(h) => h.summary.push_str(" (edited)"),
    }
    edited
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn edit_payload_changes_payload(params: RecordParams) {
            let record = params.to_record();
            prop_assert_ne!(edit_payload(&record.payload), record.payload.clone());
            prop_assert_eq!(edit_payload(&record.payload).kind(), record.kind());
        }
    }
}
