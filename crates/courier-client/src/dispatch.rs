//! Provider classification and delivery planning.
//!
//! Posts address providers by route: the reserved [`ROUTE_ANALYTICS`] and
//! [`ROUTE_METRICS`] routes go to the session-packaged surfaces, everything
//! else rides the wrapped-batch surface. Planning turns swept batches into
//! concrete sends, splitting each batch's posts by provider so partial
//! failure in one surface never blocks the others.

use courier_core::{
    IdentitySource, OutboxEvent, SessionEnvelope, TelemetryConfig, GATE_METRICS_CHANNEL,
    LOG_TYPE_CLIENT_EVENT,
};
use courier_transport::{batch_body, envelope_body, join_url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::outbox::{DrainedBatch, PreparedBatch};
use crate::session::SessionState;

/// Route name of the session-packaged analytics surface.
pub const ROUTE_ANALYTICS: &str = "analytics";
/// Route name of the session-packaged metrics surface.
pub const ROUTE_METRICS: &str = "metrics";

pub(crate) const SEND_METHOD_AJAX: &str = "ajax";
pub(crate) const SEND_METHOD_BEACON: &str = "beacon";

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery surface for a classified post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Session-packaged analytics envelope.
    Analytics,
    /// Session-packaged metrics envelope, feature gated.
    Metrics,
    /// Wrapped-batch surface for product routes.
    Batch,
}

impl Provider {
    /// Label used in logs and metric labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Metrics => "metrics",
            Self::Batch => "batch",
        }
    }
}

/// Classify a route onto its delivery surface.
#[must_use]
pub fn classify(route: &str) -> Provider {
    match route {
        ROUTE_ANALYTICS => Provider::Analytics,
        ROUTE_METRICS => Provider::Metrics,
        _ => Provider::Batch,
    }
}

/// URL for a provider surface under the configured endpoints.
#[must_use]
pub fn surface_url(config: &TelemetryConfig, provider: Provider) -> String {
    let path = match provider {
        Provider::Analytics => &config.endpoints.events_path,
        Provider::Metrics => &config.endpoints.metrics_path,
        Provider::Batch => &config.endpoints.batch_path,
    };
    join_url(&config.endpoints.base_url, path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Planning
// ─────────────────────────────────────────────────────────────────────────────

/// One provider-bound request produced by planning.
#[derive(Debug)]
pub struct ProviderSend {
    /// Destination surface.
    pub provider: Provider,
    /// Request URL.
    pub url: String,
    /// Form-encoded request body.
    pub body: String,
    /// Outbox ids whose delivery outcome this send decides.
    pub event_ids: Vec<u64>,
}

/// Planned work for one flush pass.
#[derive(Debug, Default)]
pub struct DeliveryRound {
    /// Requests to issue concurrently.
    pub sends: Vec<ProviderSend>,
    /// Events completed without a send because their surface is gated off.
    pub silent_ids: Vec<u64>,
}

/// One provider-bound teardown handoff, carrying its events so a refused
/// beacon can push them back into the outbox.
#[derive(Debug)]
pub struct BeaconSend {
    /// Destination surface.
    pub provider: Provider,
    /// Request URL.
    pub url: String,
    /// Form-encoded request body.
    pub body: String,
    /// The drained events behind the body.
    pub events: Vec<OutboxEvent>,
}

/// Plan provider sends for an async flush.
///
/// Batch-surface posts keep their wrapped-batch shape, minus the posts that
/// re-route to a session surface. Analytics and metrics posts collapse into
/// one envelope per surface, with device enrichment appended to the
/// analytics payloads before packaging. A gated-off metrics surface reports
/// its events through [`DeliveryRound::silent_ids`] instead of sending.
pub fn plan_delivery(
    prepared: &[PreparedBatch],
    config: &TelemetryConfig,
    session: &mut SessionState,
    identity: &dyn IdentitySource,
    now_ms: i64,
) -> DeliveryRound {
    let mut analytics_data = Vec::new();
    let mut analytics_ids = Vec::new();
    let mut metrics_data = Vec::new();
    let mut metrics_ids = Vec::new();
    let mut batches = Vec::new();
    let mut batch_ids = Vec::new();

    for item in prepared {
        let mut kept_posts = Vec::new();
        let mut kept_ids = Vec::new();
        for (post, id) in item.batch.posts.iter().zip(&item.event_ids) {
            match classify(&post.0) {
                Provider::Analytics => {
                    analytics_data.push(post.1.clone());
                    analytics_ids.push(*id);
                }
                Provider::Metrics => {
                    metrics_data.push(post.1.clone());
                    metrics_ids.push(*id);
                }
                Provider::Batch => {
                    kept_posts.push(post.clone());
                    kept_ids.push(*id);
                }
            }
        }
        if !kept_posts.is_empty() {
            let mut batch = item.batch.clone();
            batch.posts = kept_posts;
            batches.push(batch);
            batch_ids.extend(kept_ids);
        }
    }

    let mut round = DeliveryRound::default();

    if !analytics_data.is_empty() {
        let mut data = analytics_data;
        data.extend(session.device_enrichment(now_ms, &config.app_version));
        let envelope = package(config, session, identity, data, now_ms);
        match envelope_body(&envelope) {
            Ok(body) => round.sends.push(ProviderSend {
                provider: Provider::Analytics,
                url: surface_url(config, Provider::Analytics),
                body,
                event_ids: analytics_ids,
            }),
            Err(error) => warn!(%error, "failed to encode analytics envelope"),
        }
    }

    if !metrics_data.is_empty() {
        if config.gate_enabled(GATE_METRICS_CHANNEL) {
            let envelope = package(config, session, identity, metrics_data, now_ms);
            match envelope_body(&envelope) {
                Ok(body) => round.sends.push(ProviderSend {
                    provider: Provider::Metrics,
                    url: surface_url(config, Provider::Metrics),
                    body,
                    event_ids: metrics_ids,
                }),
                Err(error) => warn!(%error, "failed to encode metrics envelope"),
            }
        } else {
            debug!(
                count = metrics_ids.len(),
                "metrics surface gated off; completing events without a send"
            );
            round.silent_ids.extend(metrics_ids);
        }
    }

    if !batches.is_empty() {
        match batch_body(&batches, now_ms) {
            Ok(body) => round.sends.push(ProviderSend {
                provider: Provider::Batch,
                url: surface_url(config, Provider::Batch),
                body,
                event_ids: batch_ids,
            }),
            Err(error) => warn!(%error, "failed to encode batch body"),
        }
    }

    round
}

/// Plan teardown handoffs for the beacon transport.
///
/// Same provider split as [`plan_delivery`], but every batch keeps the
/// events behind it for pushback, and batch-surface batches are stamped
/// `send_method: "beacon"`. Gated-off metrics events go down with the page.
pub fn plan_beacon(
    drained: Vec<DrainedBatch>,
    config: &TelemetryConfig,
    session: &mut SessionState,
    identity: &dyn IdentitySource,
    now_ms: i64,
) -> Vec<BeaconSend> {
    let mut analytics_data = Vec::new();
    let mut analytics_events = Vec::new();
    let mut metrics_data = Vec::new();
    let mut metrics_events = Vec::new();
    let mut batches = Vec::new();
    let mut batch_events = Vec::new();

    for item in drained {
        let DrainedBatch { mut batch, events } = item;
        let posts = std::mem::take(&mut batch.posts);
        let mut kept_posts = Vec::new();
        let mut kept_events = Vec::new();
        for (post, event) in posts.into_iter().zip(events) {
            match classify(&post.0) {
                Provider::Analytics => {
                    analytics_data.push(post.1);
                    analytics_events.push(event);
                }
                Provider::Metrics => {
                    metrics_data.push(post.1);
                    metrics_events.push(event);
                }
                Provider::Batch => {
                    kept_posts.push(post);
                    kept_events.push(event);
                }
            }
        }
        if !kept_posts.is_empty() {
            batch.posts = kept_posts;
            batch.send_method = Some(SEND_METHOD_BEACON.to_owned());
            batches.push(batch);
            batch_events.extend(kept_events);
        }
    }

    let mut sends = Vec::new();

    if !analytics_data.is_empty() {
        let mut data = analytics_data;
        data.extend(session.device_enrichment(now_ms, &config.app_version));
        let envelope = package(config, session, identity, data, now_ms);
        match envelope_body(&envelope) {
            Ok(body) => sends.push(BeaconSend {
                provider: Provider::Analytics,
                url: surface_url(config, Provider::Analytics),
                body,
                events: analytics_events,
            }),
            Err(error) => warn!(%error, "failed to encode teardown analytics envelope"),
        }
    }

    if !metrics_data.is_empty() {
        if config.gate_enabled(GATE_METRICS_CHANNEL) {
            let envelope = package(config, session, identity, metrics_data, now_ms);
            match envelope_body(&envelope) {
                Ok(body) => sends.push(BeaconSend {
                    provider: Provider::Metrics,
                    url: surface_url(config, Provider::Metrics),
                    body,
                    events: metrics_events,
                }),
                Err(error) => warn!(%error, "failed to encode teardown metrics envelope"),
            }
        } else {
            debug!(
                count = metrics_events.len(),
                "metrics surface gated off; dropping teardown events"
            );
        }
    }

    if !batches.is_empty() {
        match batch_body(&batches, now_ms) {
            Ok(body) => sends.push(BeaconSend {
                provider: Provider::Batch,
                url: surface_url(config, Provider::Batch),
                body,
                events: batch_events,
            }),
            Err(error) => warn!(%error, "failed to encode teardown batch body"),
        }
    }

    sends
}

fn package(
    config: &TelemetryConfig,
    session: &mut SessionState,
    identity: &dyn IdentitySource,
    data: Vec<Value>,
    now_ms: i64,
) -> SessionEnvelope {
    let (session_id, seq) = session.next_seq(now_ms);
    SessionEnvelope {
        app_id: config.app_id.clone(),
        app_version: config.app_version.clone(),
        user_id: identity.viewer_id(),
        device_id: identity.device_id(),
        session_id,
        seq,
        log_type: LOG_TYPE_CLIENT_EVENT.to_owned(),
        data,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
