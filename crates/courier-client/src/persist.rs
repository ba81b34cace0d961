//! Durable persistence for the outbox and the session records.
//!
//! Outbox snapshots are written at teardown under page-scoped keys so
//! concurrent instances never clobber each other, and consumed at restore
//! time under the cross-instance lock. Session state splits in half: the
//! device-info cadence goes to durable storage, the live session record to
//! the session area so a reload resumes it but a fresh tab does not.

use courier_core::{DeliveryStatus, OutboxEvent, StoredRecord};
use courier_storage::{set_item_guarded, StorageArea, RESERVED_PREFIX, SCHEME_PREFIX};
use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::{
    EVENTS_DROPPED_TOTAL, EVENTS_RESTORED_TOTAL, EVENTS_STORED_TOTAL, STORE_FAILURES_TOTAL,
};
use crate::outbox::Outbox;
use crate::session::{LocalRecord, SessionRecord, SessionState};

/// Reserved key holding a session state record in either storage area.
pub const STATE_KEY: &str = "courier:__state";

// ─────────────────────────────────────────────────────────────────────────────
// Outbox snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Persist the outbox under a page-scoped key: `courier:<page>.<now_ms>`.
///
/// Drains the buffer. Already-delivered events are dropped rather than
/// written; everything else is serialized as an array of stored records. On
/// a storage failure the drained events go back into the outbox unchanged.
/// Returns the number of records written.
pub fn store_events(
    outbox: &mut Outbox,
    durable: &dyn StorageArea,
    page_id: &str,
    now_ms: i64,
) -> usize {
    if outbox.is_empty() {
        return 0;
    }
    let events = outbox.drain_all();
    let records: Vec<StoredRecord> = events
        .iter()
        .filter(|event| event.meta.status != DeliveryStatus::Delivered)
        .map(OutboxEvent::to_stored)
        .collect();
    if records.is_empty() {
        return 0;
    }

    let key = format!("{SCHEME_PREFIX}{page_id}.{now_ms}");
    let payload = match serde_json::to_string(&records) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "failed to encode outbox snapshot; keeping events in memory");
            outbox.push_back(events);
            return 0;
        }
    };
    match set_item_guarded(durable, &key, &payload) {
        Ok(()) => {
            debug!(count = records.len(), key, "outbox persisted");
            counter!(EVENTS_STORED_TOTAL).increment(records.len() as u64);
            records.len()
        }
        Err(error) => {
            warn!(%error, "outbox persistence failed; keeping events in memory");
            counter!(STORE_FAILURES_TOTAL).increment(1);
            outbox.push_back(events);
            0
        }
    }
}

/// Pull every persisted outbox snapshot back into the buffer.
///
/// Scans scheme-prefixed keys, skipping reserved entries. Each snapshot is
/// removed before parsing, so a snapshot is consumed exactly once even when
/// it turns out corrupt. Corrupt snapshots and corrupt entries inside an
/// otherwise valid snapshot are skipped; entries past the durability window
/// are dropped. Restored events restart as pending.
pub fn restore_events(
    outbox: &mut Outbox,
    durable: &dyn StorageArea,
    now_ms: i64,
    expiry_ms: i64,
) -> usize {
    let keys = match durable.keys() {
        Ok(keys) => keys,
        Err(error) => {
            warn!(%error, "cannot list storage keys; skipping restore");
            return 0;
        }
    };

    let mut restored = 0_usize;
    for key in keys {
        if !key.starts_with(SCHEME_PREFIX) || key.starts_with(RESERVED_PREFIX) {
            continue;
        }
        let item = match durable.get_item(&key) {
            Ok(item) => item,
            Err(error) => {
                warn!(key, %error, "unreadable outbox snapshot");
                continue;
            }
        };
        // Remove before parsing: a snapshot is consumed even when corrupt.
        if let Err(error) = durable.remove_item(&key) {
            warn!(key, %error, "failed to remove outbox snapshot");
        }
        let Some(item) = item else { continue };

        let elements: Vec<serde_json::Value> = match serde_json::from_str(&item) {
            Ok(elements) => elements,
            Err(error) => {
                warn!(key, %error, "discarding corrupt outbox snapshot");
                counter!(EVENTS_DROPPED_TOTAL, "reason" => "corrupt").increment(1);
                continue;
            }
        };
        for element in elements {
            let record: StoredRecord = match serde_json::from_value(element) {
                Ok(record) => record,
                Err(error) => {
                    warn!(key, %error, "skipping corrupt outbox entry");
                    counter!(EVENTS_DROPPED_TOTAL, "reason" => "corrupt").increment(1);
                    continue;
                }
            };
            let event = record.into_event(0);
            if event.expired(now_ms, expiry_ms) {
                counter!(EVENTS_DROPPED_TOTAL, "reason" => "expired").increment(1);
                continue;
            }
            let _ = outbox.adopt(event);
            restored += 1;
        }
    }

    if restored > 0 {
        counter!(EVENTS_RESTORED_TOTAL).increment(restored as u64);
    }
    restored
}

// ─────────────────────────────────────────────────────────────────────────────
// Session records
// ─────────────────────────────────────────────────────────────────────────────

/// Write the split session records under [`STATE_KEY`] in each area.
pub fn store_session(
    state: &SessionState,
    durable: &dyn StorageArea,
    session_area: &dyn StorageArea,
) {
    let (local, session) = state.records();
    write_state(durable, local, "durable");
    write_state(session_area, session, "session");
}

/// Load the split session records, falling back to defaults for an absent
/// or corrupt half.
#[must_use]
pub fn load_session(
    durable: &dyn StorageArea,
    session_area: &dyn StorageArea,
    gap_ms: i64,
    device_info_interval_ms: i64,
) -> SessionState {
    let local: LocalRecord = read_state(durable).unwrap_or_default();
    let session: SessionRecord = read_state(session_area).unwrap_or_default();
    SessionState::from_records(local, session, gap_ms, device_info_interval_ms)
}

fn write_state<T: serde::Serialize>(area: &dyn StorageArea, record: &T, half: &str) {
    match serde_json::to_string(record) {
        Ok(payload) => {
            if let Err(error) = set_item_guarded(area, STATE_KEY, &payload) {
                warn!(%error, half, "failed to persist session state");
            }
        }
        Err(error) => warn!(%error, half, "failed to encode session state"),
    }
}

fn read_state<T: serde::de::DeserializeOwned>(area: &dyn StorageArea) -> Option<T> {
    let item = match area.get_item(STATE_KEY) {
        Ok(item) => item?,
        Err(error) => {
            warn!(%error, "unreadable session state");
            return None;
        }
    };
    match serde_json::from_str(&item) {
        Ok(record) => Some(record),
        Err(error) => {
            warn!(%error, "discarding corrupt session state");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
