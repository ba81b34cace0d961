//! The telemetry client facade.
//!
//! [`TelemetryClient`] is what hosts hold: it owns the outbox, the flush
//! worker, session state, and lifecycle handling, wired to the storage
//! areas and transport supplied at spawn time. Posting is synchronous and
//! never blocks on the network; delivery happens on the runtime, driven by
//! the coalescing flush timer or an explicit flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    generate_page_id, now_ms, DeliveredCallback, DeliveryStatus, EventMeta, IdentitySource,
    OutboxAction, OutboxEvent, ReplayBus, TelemetryConfig, WrappedBatch,
};
use courier_storage::{PageLock, StorageArea, DEFAULT_LEASE_MS};
use courier_transport::{Transport, TransportError};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{self, DeliveryRound, Provider, ROUTE_ANALYTICS, SEND_METHOD_AJAX};
use crate::lifecycle::{LifecycleEvent, PageState, PayloadStash};
use crate::metrics::{
    BEACON_PUSHBACKS_TOTAL, EVENTS_DELIVERED_TOTAL, EVENTS_REQUEUED_TOTAL, FLUSHES_TOTAL,
    OUTBOX_DEPTH, POSTS_DROPPED_TOTAL, POSTS_TOTAL,
};
use crate::outbox::{Outbox, PreparedBatch};
use crate::persist;
use crate::scheduler::{run_timer, FlushTimer};
use crate::session::{SessionSnapshot, SessionState};

/// Route carrying the pipeline's own operational reports, such as the
/// synthetic event recorded when a teardown beacon is refused.
pub const ROUTE_OPS: &str = "ops:outbox";

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Per-post options.
#[derive(Default)]
pub struct PostOptions {
    /// Requeue the event when its delivery is rejected with a 4xx/5xx.
    pub retry: bool,
    /// Flush delay this post arms the timer with. Defaults to the
    /// configured base wait.
    pub delay_ms: Option<u64>,
    /// Send immediately in a single-post batch, skipping the scheduler.
    pub signal: bool,
    /// Fired once when the event is acknowledged.
    pub on_delivered: Option<DeliveredCallback>,
}

impl std::fmt::Debug for PostOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostOptions")
            .field("retry", &self.retry)
            .field("delay_ms", &self.delay_ms)
            .field("signal", &self.signal)
            .field("on_delivered", &self.on_delivered.is_some())
            .finish()
    }
}

/// Callbacks observing the outcome of an explicit flush.
#[derive(Default)]
pub struct FlushOptions {
    /// Fired when the flush leaves nothing behind: the outbox was already
    /// empty or the round fully delivered.
    pub on_empty: Option<Box<dyn FnOnce() + Send>>,
    /// Fired when events remain queued: the client was offline or a send
    /// failed.
    pub on_ready: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for FlushOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushOptions")
            .field("on_empty", &self.on_empty.is_some())
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}

/// Storage areas, transport, and identity supplied by the host.
pub struct ClientDeps {
    /// Durable area shared across instances: outbox snapshots, the restore
    /// lock, and the device-info cadence live here.
    pub durable: Arc<dyn StorageArea>,
    /// Session-scoped area: the live session record lives here so a reload
    /// resumes the session but a fresh tab starts over.
    pub session: Arc<dyn StorageArea>,
    /// Delivery transport.
    pub transport: Arc<dyn Transport>,
    /// Viewer and device identity.
    pub identity: Arc<dyn IdentitySource>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a running telemetry pipeline. Cheap to clone; all clones share
/// the same outbox and worker.
#[derive(Clone)]
pub struct TelemetryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: TelemetryConfig,
    page_id: String,
    bus: ReplayBus<OutboxAction>,
    outbox: Mutex<Outbox>,
    session: Mutex<SessionState>,
    stash: Mutex<PayloadStash>,
    page_state: Mutex<PageState>,
    online: AtomicBool,
    timer: FlushTimer,
    cancel: CancellationToken,
    runtime: Handle,
    durable: Arc<dyn StorageArea>,
    session_area: Arc<dyn StorageArea>,
    transport: Arc<dyn Transport>,
    identity: Arc<dyn IdentitySource>,
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("page_id", &self.inner.page_id)
            .finish_non_exhaustive()
    }
}

impl TelemetryClient {
    /// Start the pipeline on the current tokio runtime.
    ///
    /// Loads persisted session state and spawns the flush worker. Must be
    /// called from within a runtime; the worker runs until
    /// [`Self::shutdown`] cancels it.
    #[must_use]
    pub fn spawn(config: TelemetryConfig, deps: ClientDeps) -> Self {
        let (timer, deadline_rx) = FlushTimer::new();
        let cancel = CancellationToken::new();
        let page_id = generate_page_id();
        let session_state = persist::load_session(
            deps.durable.as_ref(),
            deps.session.as_ref(),
            config.session_gap_ms,
            config.device_info_interval_ms,
        );
        info!(page_id, app_id = %config.app_id, "telemetry client starting");

        let inner = Arc::new(ClientInner {
            bus: ReplayBus::new(config.replay_capacity),
            outbox: Mutex::new(Outbox::new()),
            session: Mutex::new(session_state),
            stash: Mutex::new(PayloadStash::new()),
            page_state: Mutex::new(PageState::Active),
            online: AtomicBool::new(true),
            timer: timer.clone(),
            cancel: cancel.clone(),
            runtime: Handle::current(),
            page_id,
            durable: deps.durable,
            session_area: deps.session,
            transport: deps.transport,
            identity: deps.identity,
            config,
        });

        let flush_inner = Arc::clone(&inner);
        let worker = run_timer(timer, deadline_rx, cancel, move || {
            let inner = Arc::clone(&flush_inner);
            async move {
                inner.run_flush(FlushOptions::default()).await;
            }
        });
        let _ = inner.runtime.spawn(async move {
            let end = worker.await;
            debug!(?end, "flush worker stopped");
        });

        Self { inner }
    }

    /// Queue an event for delivery on `route`.
    ///
    /// An empty route is accepted with a warning. Posts on a disabled
    /// client or a blocked route are dropped silently.
    pub fn post(&self, route: &str, payload: Value, options: PostOptions) {
        self.inner.post(route, payload, options);
    }

    /// Queue a named analytics event: `{time, name, extra}` posted on the
    /// analytics route.
    pub fn log_event(&self, name: &str, extra: Value, options: PostOptions) {
        let payload = {
            let mut session = self.inner.session.lock();
            session.make_event(name, extra, now_ms())
        };
        self.post(ROUTE_ANALYTICS, payload, options);
    }

    /// Post options preset for latency-sensitive events: arms the timer
    /// with the configured vital wait instead of the base wait.
    #[must_use]
    pub fn vital_options(&self) -> PostOptions {
        PostOptions {
            delay_ms: Some(self.inner.config.vital_wait_ms),
            ..PostOptions::default()
        }
    }

    /// Cancel the timer and flush now.
    ///
    /// Returns immediately; the round runs on the runtime. Use the
    /// [`FlushOptions`] callbacks to observe the outcome.
    pub fn flush(&self, options: FlushOptions) {
        self.inner.timer.clear();
        let inner = Arc::clone(&self.inner);
        let _ = self.inner.runtime.spawn(async move {
            inner.run_flush(options).await;
        });
    }

    /// Cancel the timer, flush, and wait for the round to settle.
    pub async fn flush_and_wait(&self) {
        self.inner.timer.clear();
        self.inner.run_flush(FlushOptions::default()).await;
    }

    /// Drive a page lifecycle transition.
    ///
    /// `Hidden` hands pending events to the beacon transport and persists
    /// whatever remains. `Visible` restores persisted events under the
    /// cross-instance lock and arms a quick flush. `Unload` drains the
    /// payload stash through the post path, then does the hidden work one
    /// final time; the client is terminal afterwards and ignores further
    /// transitions.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        self.inner.handle_lifecycle(event).await;
    }

    /// Run the unload sequence and stop the flush worker.
    pub async fn shutdown(&self) {
        self.handle_lifecycle(LifecycleEvent::Unload).await;
        self.inner.cancel.cancel();
    }

    /// Report transport reachability. While offline, flushes defer: the
    /// timer re-arms and `on_ready` fires instead of a send.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Release);
    }

    /// Park a payload to be posted automatically at unload. The latest
    /// payload per name wins.
    pub fn stash_payload(&self, name: &str, route: &str, payload: Value) {
        self.inner.stash.lock().set(name, route, payload);
    }

    /// Clear a stashed payload.
    pub fn remove_stashed(&self, name: &str) {
        self.inner.stash.lock().remove(name);
    }

    /// Subscribe to a pipeline action.
    pub fn subscribe(&self, action: OutboxAction, handler: impl FnMut() + Send + 'static) {
        self.inner.bus.on(action, handler);
    }

    /// Subscribe to a pipeline action, replaying held emissions first.
    pub fn subscribe_replay(&self, action: OutboxAction, handler: impl FnMut() + Send + 'static) {
        self.inner.bus.subscribe_replay(action, handler);
    }

    /// Whether a feature gate is enabled in this client's configuration.
    #[must_use]
    pub fn gate_enabled(&self, gate: &str) -> bool {
        self.inner.config.gate_enabled(gate)
    }

    /// This instance's page id.
    #[must_use]
    pub fn page_id(&self) -> &str {
        &self.inner.page_id
    }

    /// Buffered event count, any delivery status.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.outbox.lock().len()
    }

    /// Read-only view of the live session record.
    #[must_use]
    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.inner.session.lock().snapshot()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

impl ClientInner {
    fn post(self: &Arc<Self>, route: &str, payload: Value, options: PostOptions) {
        if route.is_empty() {
            warn!("post called with an empty route");
        }
        if self.config.disabled {
            counter!(POSTS_DROPPED_TOTAL, "reason" => "disabled").increment(1);
            return;
        }
        if self.config.route_blocked(route) {
            debug!(route, "dropping post on a blocked route");
            counter!(POSTS_DROPPED_TOTAL, "reason" => "blocked").increment(1);
            return;
        }

        let event = OutboxEvent {
            id: 0,
            route: route.to_owned(),
            payload,
            created_at: now_ms(),
            attempts: 0,
            meta: EventMeta {
                status: DeliveryStatus::Pending,
                retry: options.retry,
                page_id: self.page_id.clone(),
                user_id: self.identity.viewer_id(),
                on_delivered: options.on_delivered,
            },
        };

        if options.signal {
            counter!(POSTS_TOTAL, "mode" => "signal").increment(1);
            self.post_signal(event, options.retry);
            if !options.retry {
                return;
            }
            // A retry-flagged signal also arms the timer so a failed send
            // gets its scheduled second chance.
        } else {
            counter!(POSTS_TOTAL, "mode" => "queued").increment(1);
            let _ = self.outbox.lock().adopt(event);
        }

        let delay = options.delay_ms.unwrap_or(self.config.base_wait_ms);
        let armed = self.timer.schedule(Duration::from_millis(delay));
        let mut outbox = self.outbox.lock();
        outbox.note_trigger(route, armed);
        gauge!(OUTBOX_DEPTH).set(outbox.len() as f64);
    }

    /// Send one event immediately in its own single-post batch.
    ///
    /// Signal rounds are silent: no actions are emitted and nothing else is
    /// swept along. A retry-flagged signal stays in the outbox as in-flight
    /// so a failed send is requeued for the scheduled pipeline; otherwise
    /// the event lives only inside the send.
    fn post_signal(self: &Arc<Self>, mut event: OutboxEvent, retained: bool) {
        event.meta.status = DeliveryStatus::InFlight;
        let mut callback = None;
        if !retained {
            callback = event.meta.on_delivered.take();
        }
        let route = event.route.clone();
        let user = event.meta.user_id.clone();
        let wire = event.to_wire();
        let event_ids = if retained {
            vec![self.outbox.lock().adopt(event)]
        } else {
            Vec::new()
        };

        let prepared = vec![PreparedBatch {
            batch: WrappedBatch {
                user,
                page_id: self.page_id.clone(),
                app_id: self.config.app_id.clone(),
                device_id: self.identity.device_id(),
                posts: vec![wire],
                trigger: Some(route),
                send_method: None,
            },
            event_ids,
        }];

        let inner = Arc::clone(self);
        let _ = self.runtime.spawn(async move {
            let round = {
                let mut session = inner.session.lock();
                dispatch::plan_delivery(
                    &prepared,
                    &inner.config,
                    &mut session,
                    inner.identity.as_ref(),
                    now_ms(),
                )
            };
            let all_ok = inner.deliver_round(round).await;
            if all_ok {
                if let Some(callback) = callback {
                    callback();
                }
            }
        });
    }

    /// The flush pipeline: re-arm the base timer, check readiness, sweep
    /// and wrap, deliver per provider, and report through the bus.
    async fn run_flush(&self, options: FlushOptions) {
        let FlushOptions { on_empty, on_ready } = options;
        self.timer
            .reset(Duration::from_millis(self.config.base_wait_ms));

        if !self.online.load(Ordering::Acquire) {
            debug!("offline; deferring flush");
            counter!(FLUSHES_TOTAL, "outcome" => "deferred").increment(1);
            if let Some(on_ready) = on_ready {
                on_ready();
            }
            return;
        }

        self.bus.emit_and_hold(OutboxAction::Send);

        let now = now_ms();
        let device_id = self.identity.device_id();
        let prepared = {
            let mut outbox = self.outbox.lock();
            let mut prepared =
                outbox.sweep_and_wrap(now, self.config.expiry_ms, &self.config.app_id, &device_id);
            if let Some(first) = prepared.first_mut() {
                first.batch.trigger = outbox.take_trigger();
                first.batch.send_method = Some(SEND_METHOD_AJAX.to_owned());
            }
            prepared
        };

        if prepared.is_empty() {
            counter!(FLUSHES_TOTAL, "outcome" => "empty").increment(1);
            self.bus.emit_and_hold(OutboxAction::Ok);
            if let Some(on_empty) = on_empty {
                on_empty();
            }
            return;
        }

        let round = {
            let mut session = self.session.lock();
            dispatch::plan_delivery(
                &prepared,
                &self.config,
                &mut session,
                self.identity.as_ref(),
                now,
            )
        };

        if self.deliver_round(round).await {
            counter!(FLUSHES_TOTAL, "outcome" => "ok").increment(1);
            self.bus.emit_and_hold(OutboxAction::Ok);
            if let Some(on_empty) = on_empty {
                on_empty();
            }
        } else {
            counter!(FLUSHES_TOTAL, "outcome" => "error").increment(1);
            self.bus.emit_and_hold(OutboxAction::Error);
            if let Some(on_ready) = on_ready {
                on_ready();
            }
        }
    }

    /// Issue a round's sends concurrently and apply each provider's outcome
    /// independently. Returns true when every send succeeded.
    async fn deliver_round(&self, round: DeliveryRound) -> bool {
        let DeliveryRound { sends, silent_ids } = round;

        let mut callbacks = Vec::new();
        if !silent_ids.is_empty() {
            callbacks.extend(self.outbox.lock().complete_delivered(&silent_ids));
        }

        let results = futures::future::join_all(sends.into_iter().map(|send| {
            let transport = Arc::clone(&self.transport);
            async move {
                let result = transport.post(&send.url, send.body).await;
                (send.provider, send.event_ids, result)
            }
        }))
        .await;

        let mut all_ok = true;
        {
            let mut outbox = self.outbox.lock();
            for (provider, event_ids, result) in results {
                match result {
                    Ok(()) => {
                        counter!(EVENTS_DELIVERED_TOTAL, "provider" => provider.name())
                            .increment(event_ids.len() as u64);
                        callbacks.extend(outbox.complete_delivered(&event_ids));
                    }
                    Err(TransportError::Status { code }) => {
                        all_ok = false;
                        let outcome = outbox.requeue_failed(&event_ids, code);
                        counter!(EVENTS_REQUEUED_TOTAL, "provider" => provider.name())
                            .increment(outcome.requeued as u64);
                        warn!(
                            provider = provider.name(),
                            code,
                            requeued = outcome.requeued,
                            dropped = outcome.dropped,
                            "delivery rejected"
                        );
                    }
                    Err(error) => {
                        all_ok = false;
                        warn!(
                            provider = provider.name(),
                            %error,
                            "delivery failed; events held for teardown"
                        );
                    }
                }
            }
            gauge!(OUTBOX_DEPTH).set(outbox.len() as f64);
        }

        for callback in callbacks {
            callback();
        }
        all_ok
    }

    // ── lifecycle ──

    async fn handle_lifecycle(self: &Arc<Self>, event: LifecycleEvent) {
        {
            let mut state = self.page_state.lock();
            if *state == PageState::Gone {
                debug!(?event, "lifecycle event after unload; ignoring");
                return;
            }
            *state = match event {
                LifecycleEvent::Visible => PageState::Active,
                LifecycleEvent::Hidden => PageState::Hidden,
                LifecycleEvent::Unload => PageState::Gone,
            };
        }
        match event {
            LifecycleEvent::Visible => self.on_visible().await,
            LifecycleEvent::Hidden => self.on_hidden(),
            LifecycleEvent::Unload => self.on_unload(),
        }
    }

    async fn on_visible(&self) {
        self.restore().await;
        self.bus.emit_and_hold(OutboxAction::Restore);
        let _ = self
            .timer
            .schedule(Duration::from_millis(self.config.restore_wait_ms));
    }

    fn on_hidden(&self) {
        self.beacon_teardown();
        self.bus.emit_and_hold(OutboxAction::Store);
        self.store();
    }

    fn on_unload(self: &Arc<Self>) {
        let stashed = self.stash.lock().drain();
        for (route, payload) in stashed {
            self.post(&route, payload, PostOptions::default());
        }
        self.bus.emit_and_hold(OutboxAction::Shutdown);
        if !self.outbox.lock().is_empty() {
            self.beacon_teardown();
        }
        self.bus.emit_and_hold(OutboxAction::Store);
        self.store();
    }

    /// Hand pending events to the beacon transport, one handoff per
    /// provider.
    ///
    /// A refused handoff pushes its events back for persistence and records
    /// a synthetic failure event on [`ROUTE_OPS`]. A refused analytics
    /// handoff also resets the session record: its envelope claimed a
    /// sequence slot that never left.
    fn beacon_teardown(&self) {
        let now = now_ms();
        let device_id = self.identity.device_id();
        let drained = {
            let mut outbox = self.outbox.lock();
            outbox.drain_for_beacon(now, self.config.expiry_ms, &self.config.app_id, &device_id)
        };
        if drained.is_empty() {
            return;
        }

        let sends = {
            let mut session = self.session.lock();
            dispatch::plan_beacon(
                drained,
                &self.config,
                &mut session,
                self.identity.as_ref(),
                now,
            )
        };

        for send in sends {
            if self.transport.send_beacon(&send.url, send.body) {
                counter!(EVENTS_DELIVERED_TOTAL, "provider" => send.provider.name())
                    .increment(send.events.len() as u64);
                continue;
            }
            counter!(BEACON_PUSHBACKS_TOTAL, "provider" => send.provider.name()).increment(1);
            warn!(
                provider = send.provider.name(),
                count = send.events.len(),
                "beacon refused; events pushed back for persistence"
            );
            if send.provider == Provider::Analytics {
                self.session.lock().reset();
            }
            let mut outbox = self.outbox.lock();
            outbox.push_back(send.events);
            let _ = outbox.adopt(beacon_failure_event(
                now,
                &self.page_id,
                self.identity.viewer_id(),
            ));
        }
    }

    // ── persistence ──

    fn store(&self) {
        {
            let session = self.session.lock();
            persist::store_session(&session, self.durable.as_ref(), self.session_area.as_ref());
        }
        let mut outbox = self.outbox.lock();
        let stored =
            persist::store_events(&mut outbox, self.durable.as_ref(), &self.page_id, now_ms());
        if stored > 0 {
            info!(stored, "outbox persisted for a later instance");
        }
        gauge!(OUTBOX_DEPTH).set(outbox.len() as f64);
    }

    async fn restore(&self) {
        let lock = PageLock::new("outbox", Arc::clone(&self.durable), self.page_id.clone());
        let Some(_guard) = lock.acquire(DEFAULT_LEASE_MS).await else {
            debug!("another instance holds the restore lock");
            return;
        };
        let now = now_ms();
        let restored = {
            let mut outbox = self.outbox.lock();
            let restored = persist::restore_events(
                &mut outbox,
                self.durable.as_ref(),
                now,
                self.config.expiry_ms,
            );
            gauge!(OUTBOX_DEPTH).set(outbox.len() as f64);
            restored
        };
        if restored > 0 {
            info!(restored, "restored persisted events");
        }
    }
}

fn beacon_failure_event(now_ms: i64, page_id: &str, user_id: Option<String>) -> OutboxEvent {
    OutboxEvent {
        id: 0,
        route: ROUTE_OPS.to_owned(),
        payload: json!({"send_via_beacon_failure": [1]}),
        created_at: now_ms,
        attempts: 0,
        meta: EventMeta {
            status: DeliveryStatus::Pending,
            retry: false,
            page_id: page_id.to_owned(),
            user_id,
            on_delivered: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_failure_event_is_a_pending_ops_report() {
        let event = beacon_failure_event(42, "p1", Some("u1".into()));
        assert_eq!(event.route, ROUTE_OPS);
        assert_eq!(event.payload, json!({"send_via_beacon_failure": [1]}));
        assert_eq!(event.meta.status, DeliveryStatus::Pending);
        assert!(!event.meta.retry);
    }

    #[test]
    fn options_debug_shows_callback_presence_not_contents() {
        let options = PostOptions {
            on_delivered: Some(Box::new(|| {})),
            ..PostOptions::default()
        };
        let rendered = format!("{options:?}");
        assert!(rendered.contains("on_delivered: true"));
    }
}
