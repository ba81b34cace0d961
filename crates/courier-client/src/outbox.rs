//! The in-memory outbox: every posted event waits here until a flush,
//! teardown beacon, or persistence pass moves it along.
//!
//! The outbox owns delivery state. Events stay in the buffer while their
//! batch is in flight; completion removes them, a rejected delivery requeues
//! the retry-flagged ones, and an unreachable endpoint leaves them
//! [`DeliveryStatus::InFlight`] so teardown persistence still sees them.

use courier_core::{DeliveredCallback, DeliveryStatus, OutboxEvent, WrappedBatch};
use metrics::counter;
use tracing::debug;

use crate::metrics::EVENTS_DROPPED_TOTAL;

// ─────────────────────────────────────────────────────────────────────────────
// Batch projections
// ─────────────────────────────────────────────────────────────────────────────

/// A batch wrapped for an async flush, with the outbox ids it covers.
///
/// The events themselves stay in the outbox; the ids route the delivery
/// outcome back to them.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    /// The delivery batch.
    pub batch: WrappedBatch,
    /// Outbox ids of the wrapped events, aligned with `batch.posts`.
    pub event_ids: Vec<u64>,
}

/// A batch drained for beacon teardown, carrying the events themselves so a
/// refused handoff can push them back.
#[derive(Debug)]
pub struct DrainedBatch {
    /// The delivery batch.
    pub batch: WrappedBatch,
    /// Drained events, aligned with `batch.posts`.
    pub events: Vec<OutboxEvent>,
}

/// What a rejected delivery did to the affected events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequeueOutcome {
    /// Retry-flagged events returned to [`DeliveryStatus::Pending`].
    pub requeued: usize,
    /// Events dropped because they carried no retry flag or the status code
    /// was outside the retryable range.
    pub dropped: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered buffer of queued events plus the trigger-route bookkeeping for the
/// next flush.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<OutboxEvent>,
    next_id: u64,
    trigger: Option<String>,
}

impl Outbox {
    /// Empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered events, any status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events still waiting for a flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.meta.status == DeliveryStatus::Pending)
            .count()
    }

    /// Take ownership of an event, assigning it a fresh outbox id.
    pub fn adopt(&mut self, mut event: OutboxEvent) -> u64 {
        self.next_id += 1;
        event.id = self.next_id;
        self.events.push(event);
        self.next_id
    }

    /// Re-insert events that previously left through a drain, keeping their
    /// ids and statuses.
    pub fn push_back(&mut self, events: Vec<OutboxEvent>) {
        self.events.extend(events);
    }

    /// Remove everything, preserving order. Used by teardown persistence.
    pub fn drain_all(&mut self) -> Vec<OutboxEvent> {
        std::mem::take(&mut self.events)
    }

    // ── trigger bookkeeping ──

    /// Record `route` as the flush trigger. A post that armed the timer
    /// always becomes the trigger; otherwise only the first route since the
    /// last flush is kept.
    pub fn note_trigger(&mut self, route: &str, armed: bool) {
        if armed || self.trigger.is_none() {
            self.trigger = Some(route.to_owned());
        }
    }

    /// Consume the recorded trigger route.
    pub fn take_trigger(&mut self) -> Option<String> {
        self.trigger.take()
    }

    // ── batch projections ──

    /// Drop expired events, then wrap everything still
    /// [`DeliveryStatus::Pending`] into per-`(page, user)` batches, marking
    /// the wrapped events [`DeliveryStatus::InFlight`].
    ///
    /// Wrapped events stay in the outbox; the returned ids tie the delivery
    /// outcome back to them. Batches appear in first-seen order and posts
    /// keep append order.
    pub fn sweep_and_wrap(
        &mut self,
        now_ms: i64,
        expiry_ms: i64,
        app_id: &str,
        device_id: &str,
    ) -> Vec<PreparedBatch> {
        self.drop_expired(now_ms, expiry_ms);

        let mut batches: Vec<PreparedBatch> = Vec::new();
        for event in &mut self.events {
            if event.meta.status != DeliveryStatus::Pending {
                continue;
            }
            event.meta.status = DeliveryStatus::InFlight;
            let at = find_or_push_batch(&mut batches, event, app_id, device_id);
            batches[at].batch.posts.push(event.to_wire());
            batches[at].event_ids.push(event.id);
        }
        batches
    }

    /// Drain [`DeliveryStatus::Pending`] events out of the outbox for a
    /// teardown beacon, marking them [`DeliveryStatus::InFlight`] and
    /// grouping them like [`Self::sweep_and_wrap`].
    ///
    /// In-flight events stay put: their async send may still resolve, and if
    /// it does not, teardown persistence picks them up. Expired events are
    /// dropped first.
    pub fn drain_for_beacon(
        &mut self,
        now_ms: i64,
        expiry_ms: i64,
        app_id: &str,
        device_id: &str,
    ) -> Vec<DrainedBatch> {
        self.drop_expired(now_ms, expiry_ms);

        let mut kept = Vec::new();
        let mut batches: Vec<DrainedBatch> = Vec::new();
        for mut event in std::mem::take(&mut self.events) {
            if event.meta.status != DeliveryStatus::Pending {
                kept.push(event);
                continue;
            }
            event.meta.status = DeliveryStatus::InFlight;
            let at = find_or_push_drained(&mut batches, &event, app_id, device_id);
            batches[at].batch.posts.push(event.to_wire());
            batches[at].events.push(event);
        }
        self.events = kept;
        batches
    }

    // ── delivery outcomes ──

    /// Remove acknowledged events, returning their callbacks in outbox order
    /// so the caller can fire them outside any lock.
    pub fn complete_delivered(&mut self, ids: &[u64]) -> Vec<DeliveredCallback> {
        let mut callbacks = Vec::new();
        self.events.retain_mut(|event| {
            if !ids.contains(&event.id) {
                return true;
            }
            if let Some(callback) = event.meta.on_delivered.take() {
                callbacks.push(callback);
            }
            false
        });
        callbacks
    }

    /// Apply a rejected delivery to the affected events.
    ///
    /// Retry-flagged events return to [`DeliveryStatus::Pending`] with an
    /// incremented attempt count, but only when the status code sits in the
    /// retryable 4xx/5xx range; everything else is dropped along with its
    /// callback.
    pub fn requeue_failed(&mut self, ids: &[u64], status_code: u16) -> RequeueOutcome {
        let retryable = (400..600).contains(&status_code);
        let mut outcome = RequeueOutcome::default();
        self.events.retain_mut(|event| {
            if !ids.contains(&event.id) {
                return true;
            }
            if retryable && event.meta.retry {
                event.meta.status = DeliveryStatus::Pending;
                event.attempts += 1;
                outcome.requeued += 1;
                true
            } else {
                outcome.dropped += 1;
                false
            }
        });
        if outcome.dropped > 0 {
            counter!(EVENTS_DROPPED_TOTAL, "reason" => "rejected").increment(outcome.dropped as u64);
        }
        outcome
    }

    fn drop_expired(&mut self, now_ms: i64, expiry_ms: i64) {
        let before = self.events.len();
        self.events
            .retain(|event| !event.expired(now_ms, expiry_ms));
        let expired = before - self.events.len();
        if expired > 0 {
            debug!(expired, "dropped events past the durability window");
            counter!(EVENTS_DROPPED_TOTAL, "reason" => "expired").increment(expired as u64);
        }
    }
}

fn find_or_push_batch(
    batches: &mut Vec<PreparedBatch>,
    event: &OutboxEvent,
    app_id: &str,
    device_id: &str,
) -> usize {
    let found = batches.iter().position(|prepared| {
        prepared.batch.page_id == event.meta.page_id && prepared.batch.user == event.meta.user_id
    });
    if let Some(at) = found {
        return at;
    }
    batches.push(PreparedBatch {
        batch: empty_batch(event, app_id, device_id),
        event_ids: Vec::new(),
    });
    batches.len() - 1
}

fn find_or_push_drained(
    batches: &mut Vec<DrainedBatch>,
    event: &OutboxEvent,
    app_id: &str,
    device_id: &str,
) -> usize {
    let found = batches.iter().position(|drained| {
        drained.batch.page_id == event.meta.page_id && drained.batch.user == event.meta.user_id
    });
    if let Some(at) = found {
        return at;
    }
    batches.push(DrainedBatch {
        batch: empty_batch(event, app_id, device_id),
        events: Vec::new(),
    });
    batches.len() - 1
}

fn empty_batch(event: &OutboxEvent, app_id: &str, device_id: &str) -> WrappedBatch {
    WrappedBatch {
        user: event.meta.user_id.clone(),
        page_id: event.meta.page_id.clone(),
        app_id: app_id.to_owned(),
        device_id: device_id.to_owned(),
        posts: Vec::new(),
        trigger: None,
        send_method: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::EventMeta;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const EXPIRY: i64 = 86_400_000;

    fn event(route: &str, created_at: i64, retry: bool) -> OutboxEvent {
        event_for(route, created_at, retry, "page1", None)
    }

    fn event_for(
        route: &str,
        created_at: i64,
        retry: bool,
        page_id: &str,
        user_id: Option<&str>,
    ) -> OutboxEvent {
        OutboxEvent {
            id: 0,
            route: route.into(),
            payload: json!({"r": route}),
            created_at,
            attempts: 0,
            meta: EventMeta {
                status: DeliveryStatus::Pending,
                retry,
                page_id: page_id.into(),
                user_id: user_id.map(Into::into),
                on_delivered: None,
            },
        }
    }

    // ── adopt / counts ──

    #[test]
    fn adopt_assigns_increasing_ids() {
        let mut outbox = Outbox::new();
        let a = outbox.adopt(event("a", 10, false));
        let b = outbox.adopt(event("b", 10, false));
        assert!(b > a);
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pending(), 2);
    }

    // ── sweep ──

    #[test]
    fn sweep_wraps_pending_marks_in_flight_and_retains_events() {
        let mut outbox = Outbox::new();
        let a = outbox.adopt(event("a", 10, false));
        let b = outbox.adopt(event("b", 10, false));

        let batches = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].event_ids, vec![a, b]);
        assert_eq!(batches[0].batch.posts.len(), 2);
        assert_eq!(batches[0].batch.posts[0].0, "a");

        // Events stay buffered, now in flight; a second sweep wraps nothing.
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pending(), 0);
        assert!(outbox.sweep_and_wrap(20, EXPIRY, "app", "dev").is_empty());
    }

    #[test]
    fn sweep_groups_by_page_and_user_in_first_seen_order() {
        let mut outbox = Outbox::new();
        let _ = outbox.adopt(event_for("a", 10, false, "p1", Some("u1")));
        let _ = outbox.adopt(event_for("b", 10, false, "p2", None));
        let _ = outbox.adopt(event_for("c", 10, false, "p1", Some("u1")));

        let batches = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch.page_id, "p1");
        assert_eq!(batches[0].batch.user.as_deref(), Some("u1"));
        assert_eq!(batches[0].batch.posts.len(), 2);
        assert_eq!(batches[1].batch.page_id, "p2");
        assert_eq!(batches[1].batch.user, None);
    }

    #[test]
    fn sweep_drops_expired_events_first() {
        let mut outbox = Outbox::new();
        let _ = outbox.adopt(event("old", 0, true));
        let fresh = outbox.adopt(event("fresh", EXPIRY, false));

        let batches = outbox.sweep_and_wrap(EXPIRY + 1, EXPIRY, "app", "dev");
        assert_eq!(outbox.len(), 1);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].event_ids, vec![fresh]);
    }

    // ── beacon drain ──

    #[test]
    fn beacon_drain_takes_pending_and_keeps_in_flight() {
        let mut outbox = Outbox::new();
        let _ = outbox.adopt(event("stuck", 10, true));
        let _ = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");
        let _ = outbox.adopt(event("late", 30, false));

        let drained = outbox.drain_for_beacon(40, EXPIRY, "app", "dev");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].events.len(), 1);
        assert_eq!(drained[0].events[0].route, "late");
        assert_eq!(drained[0].events[0].meta.status, DeliveryStatus::InFlight);

        // The in-flight event is still buffered for persistence.
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.pending(), 0);
    }

    #[test]
    fn pushed_back_events_keep_ids_and_statuses() {
        let mut outbox = Outbox::new();
        let id = outbox.adopt(event("a", 10, true));
        let mut drained = outbox.drain_for_beacon(20, EXPIRY, "app", "dev");
        assert!(outbox.is_empty());

        outbox.push_back(drained.remove(0).events);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.pending(), 0);
        let callbacks = outbox.complete_delivered(&[id]);
        assert!(callbacks.is_empty());
        assert!(outbox.is_empty());
    }

    // ── delivery outcomes ──

    #[test]
    fn complete_removes_events_and_returns_callbacks_in_order() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut outbox = Outbox::new();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let fired = Arc::clone(&fired);
            let mut queued = event("a", 10, false);
            queued.meta.on_delivered = Some(Box::new(move || {
                let _ = fired.fetch_add(1, Ordering::SeqCst);
            }));
            ids.push(outbox.adopt(queued));
        }
        let _ = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");

        let callbacks = outbox.complete_delivered(&ids);
        assert!(outbox.is_empty());
        assert_eq!(callbacks.len(), 2);
        for callback in callbacks {
            callback();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn requeue_keeps_retry_flagged_and_drops_the_rest() {
        let mut outbox = Outbox::new();
        let keep = outbox.adopt(event("keep", 10, true));
        let drop = outbox.adopt(event("drop", 10, false));
        let _ = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");

        let outcome = outbox.requeue_failed(&[keep, drop], 503);
        assert_eq!(outcome, RequeueOutcome { requeued: 1, dropped: 1 });
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.pending(), 1);
    }

    #[test]
    fn requeued_events_count_their_attempts() {
        let mut outbox = Outbox::new();
        let id = outbox.adopt(event("keep", 10, true));

        let _ = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");
        let _ = outbox.requeue_failed(&[id], 500);
        let wrapped = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");
        assert_eq!(wrapped[0].batch.posts[0].3, 1);

        let _ = outbox.requeue_failed(&[id], 429);
        let wrapped = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");
        assert_eq!(wrapped[0].batch.posts[0].3, 2);
    }

    #[test]
    fn non_retryable_status_drops_even_retry_flagged_events() {
        let mut outbox = Outbox::new();
        let id = outbox.adopt(event("keep", 10, true));
        let _ = outbox.sweep_and_wrap(20, EXPIRY, "app", "dev");

        let outcome = outbox.requeue_failed(&[id], 302);
        assert_eq!(outcome, RequeueOutcome { requeued: 0, dropped: 1 });
        assert!(outbox.is_empty());
    }

    // ── trigger bookkeeping ──

    #[test]
    fn first_route_wins_until_a_post_arms_the_timer() {
        let mut outbox = Outbox::new();
        outbox.note_trigger("first", false);
        outbox.note_trigger("second", false);
        assert_eq!(outbox.take_trigger().as_deref(), Some("first"));
        assert_eq!(outbox.take_trigger(), None);

        outbox.note_trigger("first", false);
        outbox.note_trigger("armed", true);
        assert_eq!(outbox.take_trigger().as_deref(), Some("armed"));
    }
}
