//! Session tracking for the envelope-packaged surfaces.
//!
//! A session is a run of activity with no idle stretch longer than the
//! configured gap. Every state access checks the gap first, so a page left
//! idle rotates to a fresh session id the moment traffic resumes. Envelope
//! sequence numbers restart at zero on rotation, and the first envelope of a
//! session carries appended device-status enrichment.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Durable half of the session state: survives the browser session by
/// living in the durable storage area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalRecord {
    /// Last time device-info enrichment was emitted, epoch milliseconds.
    pub last_device_info_time: i64,
}

/// Session-scoped half: lives in the session storage area so a tab reload
/// resumes the session but a new tab starts fresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecord {
    /// Next envelope sequence number.
    pub sequence_id: u64,
    /// Last event activity, epoch milliseconds. Drives rotation.
    pub last_event_time: i64,
    /// Current session id, `hex(start_ms)-hex(random)`.
    pub session_id: String,
}

/// Read-only view of the live session, for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current session id.
    pub session_id: String,
    /// Next envelope sequence number.
    pub sequence_id: u64,
    /// Last event activity, epoch milliseconds.
    pub last_event_time: i64,
}

/// Live session state plus the timing rules it enforces.
#[derive(Debug)]
pub struct SessionState {
    local: LocalRecord,
    session: SessionRecord,
    gap_ms: i64,
    device_info_interval_ms: i64,
}

impl SessionState {
    /// Fresh state. The first access rotates in a new session id.
    #[must_use]
    pub fn new(gap_ms: i64, device_info_interval_ms: i64) -> Self {
        Self::from_records(
            LocalRecord::default(),
            SessionRecord::default(),
            gap_ms,
            device_info_interval_ms,
        )
    }

    /// State rehydrated from persisted records.
    #[must_use]
    pub fn from_records(
        local: LocalRecord,
        session: SessionRecord,
        gap_ms: i64,
        device_info_interval_ms: i64,
    ) -> Self {
        Self {
            local,
            session,
            gap_ms,
            device_info_interval_ms,
        }
    }

    /// The records persistence writes.
    #[must_use]
    pub fn records(&self) -> (&LocalRecord, &SessionRecord) {
        (&self.local, &self.session)
    }

    /// Read-only view of the live session record.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session.session_id.clone(),
            sequence_id: self.session.sequence_id,
            last_event_time: self.session.last_event_time,
        }
    }

    /// Build a named analytics event and mark session activity.
    ///
    /// The payload shape is `{time, name, extra}` with `time` in epoch
    /// seconds.
    pub fn make_event(&mut self, name: &str, extra: Value, now_ms: i64) -> Value {
        self.touch(now_ms);
        json!({
            "time": now_ms as f64 / 1000.0,
            "name": name,
            "extra": extra,
        })
    }

    /// Claim the next envelope slot: returns the session id and sequence
    /// number, post-incrementing the sequence.
    pub fn next_seq(&mut self, now_ms: i64) -> (String, u64) {
        self.rotate_if_idle(now_ms);
        let seq = self.session.sequence_id;
        self.session.sequence_id += 1;
        (self.session.session_id.clone(), seq)
    }

    /// Device enrichment for an analytics envelope, appended after the
    /// event payloads.
    ///
    /// `device_status` rides on the first envelope of each session;
    /// `device_info` re-announces the platform on a long cadence shared
    /// across sessions.
    pub fn device_enrichment(&mut self, now_ms: i64, app_version: &str) -> Vec<Value> {
        self.rotate_if_idle(now_ms);
        let mut out = Vec::new();
        if self.session.sequence_id == 0 {
            out.push(self.make_event("device_status", json!({"locale": locale()}), now_ms));
        }
        if now_ms - self.local.last_device_info_time > self.device_info_interval_ms {
            self.local.last_device_info_time = now_ms;
            out.push(self.make_event(
                "device_info",
                json!({
                    "platform": std::env::consts::OS,
                    "locale": locale(),
                    "app_version": app_version,
                }),
                now_ms,
            ));
        }
        out
    }

    /// Record session activity at `now_ms`.
    pub fn touch(&mut self, now_ms: i64) {
        self.rotate_if_idle(now_ms);
        self.session.last_event_time = now_ms;
    }

    /// Zero the session record. The durable half keeps its device-info
    /// cadence.
    pub fn reset(&mut self) {
        self.session = SessionRecord::default();
    }

    fn rotate_if_idle(&mut self, now_ms: i64) {
        if now_ms - self.gap_ms > self.session.last_event_time {
            self.session.session_id = new_session_id(now_ms);
            self.session.sequence_id = 0;
        }
    }
}

fn new_session_id(now_ms: i64) -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{now_ms:x}-{suffix:x}")
}

fn locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| lang.split('.').next().map(str::to_owned))
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| "en-US".to_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const GAP: i64 = 180_000;
    const DEVICE_INTERVAL: i64 = 43_200_000;
    const NOW: i64 = 1_700_000_000_000;

    fn state() -> SessionState {
        SessionState::new(GAP, DEVICE_INTERVAL)
    }

    // ── rotation ──

    #[test]
    fn first_access_rotates_in_a_session_id() {
        let mut state = state();
        let (id, seq) = state.next_seq(NOW);
        assert_eq!(seq, 0);
        let (start, suffix) = id.split_once('-').unwrap();
        assert_eq!(i64::from_str_radix(start, 16).unwrap(), NOW);
        assert!(u32::from_str_radix(suffix, 16).is_ok());
    }

    #[test]
    fn session_survives_activity_within_the_gap() {
        let mut state = state();
        state.touch(NOW);
        let (id, seq) = state.next_seq(NOW + GAP);
        let (again, seq2) = state.next_seq(NOW + GAP);
        assert_eq!(id, again);
        assert_eq!((seq, seq2), (0, 1));
    }

    #[test]
    fn idle_gap_rotates_and_resets_the_sequence() {
        let mut state = state();
        state.touch(NOW);
        let (first, _) = state.next_seq(NOW);
        let (second, seq) = state.next_seq(NOW + GAP + 1);
        assert_ne!(first, second);
        assert_eq!(seq, 0);
    }

    // ── events ──

    #[test]
    fn make_event_shapes_time_in_seconds_and_touches_activity() {
        let mut state = state();
        let event = state.make_event("page_view", json!({"path": "/"}), NOW);
        assert_eq!(event["name"], "page_view");
        assert_eq!(event["extra"]["path"], "/");
        let time = event["time"].as_f64().unwrap();
        assert!((time - 1_700_000_000.0).abs() < f64::EPSILON);
        assert_eq!(state.snapshot().last_event_time, NOW);
    }

    // ── enrichment ──

    #[test]
    fn first_envelope_carries_device_status_and_info() {
        let mut state = state();
        let events = state.device_enrichment(NOW, "1.2.3");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["name"], "device_status");
        assert_eq!(events[1]["name"], "device_info");
        assert_eq!(events[1]["extra"]["app_version"], "1.2.3");
    }

    #[test]
    fn enrichment_goes_quiet_after_the_first_envelope() {
        let mut state = state();
        let _ = state.device_enrichment(NOW, "1.2.3");
        let _ = state.next_seq(NOW);
        assert!(state.device_enrichment(NOW + 1, "1.2.3").is_empty());
    }

    #[test]
    fn device_info_reannounces_only_after_its_interval() {
        let mut state = state();
        let _ = state.device_enrichment(NOW, "1.2.3");
        let _ = state.next_seq(NOW);

        // A rotation inside the interval re-emits device_status alone.
        let mid = NOW + GAP + 1;
        let events = state.device_enrichment(mid, "1.2.3");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["name"], "device_status");
        let _ = state.next_seq(mid);

        // Past the interval the platform announcement comes back too.
        let later = NOW + DEVICE_INTERVAL + 1;
        let events = state.device_enrichment(later, "1.2.3");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["name"], "device_info");
    }

    // ── reset / persistence shapes ──

    #[test]
    fn reset_zeroes_the_session_but_keeps_device_cadence() {
        let mut state = state();
        let _ = state.device_enrichment(NOW, "1.2.3");
        let _ = state.next_seq(NOW);
        state.reset();

        let (local, session) = state.records();
        assert_eq!(local.last_device_info_time, NOW);
        assert_eq!(session, &SessionRecord::default());
    }

    #[test]
    fn records_serialize_camel_case() {
        let record = SessionRecord {
            sequence_id: 4,
            last_event_time: 99,
            session_id: "abc-1".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"sequenceId": 4, "lastEventTime": 99, "sessionId": "abc-1"})
        );
        let local: LocalRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(local.last_device_info_time, 0);
    }
}
