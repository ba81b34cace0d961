//! Event model for the outbox pipeline.
//!
//! An [`OutboxEvent`] is the unit of work: a route string, an arbitrary JSON
//! payload, and bookkeeping metadata that never crosses the network. Two
//! projections exist: [`WirePost`], the positional tuple a delivery batch
//! carries, and [`StoredRecord`], the tuple-plus-sidecar shape teardown
//! persistence writes so a later instance can rehydrate the event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `log_type` value stamped on every session-packaged envelope.
pub const LOG_TYPE_CLIENT_EVENT: &str = "client_event";

// ─────────────────────────────────────────────────────────────────────────────
// Delivery status
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery status of an event while it sits in the outbox.
///
/// Persisted as a bare integer so stored snapshots stay stable across
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DeliveryStatus {
    /// Waiting for the next flush to pick it up.
    Pending,
    /// Wrapped into a batch whose send has not resolved.
    InFlight,
    /// Acknowledged by the receiving endpoint.
    Delivered,
}

impl From<DeliveryStatus> for u8 {
    fn from(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::InFlight => 1,
            DeliveryStatus::Delivered => 2,
        }
    }
}

impl TryFrom<u8> for DeliveryStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::InFlight),
            2 => Ok(Self::Delivered),
            other => Err(format!("unknown delivery status code {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox event
// ─────────────────────────────────────────────────────────────────────────────

/// Callback invoked exactly once when the event is acknowledged.
pub type DeliveredCallback = Box<dyn FnOnce() + Send>;

/// In-process bookkeeping attached to a queued event. Never serialized onto
/// the wire; the persisted sidecar is [`StoredMeta`].
pub struct EventMeta {
    /// Where the event sits in the delivery state machine.
    pub status: DeliveryStatus,
    /// Whether a rejected delivery (HTTP 4xx/5xx) requeues the event.
    pub retry: bool,
    /// Page instance that queued the event.
    pub page_id: String,
    /// Viewer id at post time, when a user was authenticated.
    pub user_id: Option<String>,
    /// Fired on acknowledgement. Dropped, never fired, if the event expires
    /// or is persisted for a later instance.
    pub on_delivered: Option<DeliveredCallback>,
}

impl std::fmt::Debug for EventMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMeta")
            .field("status", &self.status)
            .field("retry", &self.retry)
            .field("page_id", &self.page_id)
            .field("user_id", &self.user_id)
            .field("on_delivered", &self.on_delivered.is_some())
            .finish()
    }
}

/// A single telemetry event queued for delivery.
#[derive(Debug)]
pub struct OutboxEvent {
    /// Process-local identity used to track completion across async sends.
    pub id: u64,
    /// Provider-addressable route, e.g. `"analytics"` or a product channel.
    pub route: String,
    /// Arbitrary JSON payload.
    pub payload: Value,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// In-process bookkeeping.
    pub meta: EventMeta,
}

impl OutboxEvent {
    /// True once the event has fallen out of the durability window.
    #[must_use]
    pub fn expired(&self, now_ms: i64, window_ms: i64) -> bool {
        self.created_at < now_ms - window_ms
    }

    /// Wire projection: the four positional fields a batch carries.
    #[must_use]
    pub fn to_wire(&self) -> WirePost {
        WirePost(
            self.route.clone(),
            self.payload.clone(),
            self.created_at,
            self.attempts,
        )
    }

    /// Persistence projection, including the metadata sidecar.
    #[must_use]
    pub fn to_stored(&self) -> StoredRecord {
        StoredRecord(
            self.route.clone(),
            self.payload.clone(),
            self.created_at,
            self.attempts,
            StoredMeta {
                retry: self.meta.retry,
                page_id: self.meta.page_id.clone(),
                user_id: self.meta.user_id.clone(),
                status: self.meta.status,
            },
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire and persistence shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Positional wire form of an event: `[route, payload, createdAt, attempts]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePost(pub String, pub Value, pub i64, pub u32);

/// Metadata sidecar persisted alongside the positional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMeta {
    /// Requeue-on-rejection flag.
    pub retry: bool,
    /// Page instance that queued the event.
    pub page_id: String,
    /// Viewer id at post time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Status at persistence time. Informational; restore always restarts
    /// events as [`DeliveryStatus::Pending`].
    pub status: DeliveryStatus,
}

/// One persisted outbox entry, serialized as a five-element JSON array:
/// `[route, payload, createdAt, attempts, meta]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord(pub String, pub Value, pub i64, pub u32, pub StoredMeta);

impl StoredRecord {
    /// Rehydrate into an outbox event under a fresh process-local id.
    ///
    /// Restored events always restart as [`DeliveryStatus::Pending`]; an
    /// in-flight send from a dead instance can never complete.
    #[must_use]
    pub fn into_event(self, id: u64) -> OutboxEvent {
        let StoredRecord(route, payload, created_at, attempts, meta) = self;
        OutboxEvent {
            id,
            route,
            payload,
            created_at,
            attempts,
            meta: EventMeta {
                status: DeliveryStatus::Pending,
                retry: meta.retry,
                page_id: meta.page_id,
                user_id: meta.user_id,
                on_delivered: None,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery batches
// ─────────────────────────────────────────────────────────────────────────────

/// A delivery batch grouping posts queued by one `(page, user)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrappedBatch {
    /// Viewer id; omitted for logged-out traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Page instance that queued the posts.
    pub page_id: String,
    /// Application identifier from configuration.
    pub app_id: String,
    /// Stable per-install device id.
    pub device_id: String,
    /// Positional posts in append order.
    pub posts: Vec<WirePost>,
    /// Route that armed the flush timer. Carried on the first batch of an
    /// async flush only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// `"ajax"` for scheduled flushes, `"beacon"` for teardown sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_method: Option<String>,
}

/// A session-packaged envelope for the analytics and metrics surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEnvelope {
    /// Application identifier from configuration.
    pub app_id: String,
    /// Application version from configuration.
    pub app_version: String,
    /// Viewer id; omitted for logged-out traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Stable per-install device id.
    pub device_id: String,
    /// Session the payloads belong to.
    pub session_id: String,
    /// Envelope sequence number within the session, starting at zero.
    pub seq: u64,
    /// Always [`LOG_TYPE_CLIENT_EVENT`].
    pub log_type: String,
    /// Raw event payloads in append order.
    pub data: Vec<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
