//! Metric name constants for the client pipeline.
//!
//! Emitted through the `metrics` facade. Installing a recorder (Prometheus
//! or otherwise) is the host's concern; without one these are no-ops.

/// Events accepted by `post` (counter, labels: mode).
pub const POSTS_TOTAL: &str = "courier_posts_total";
/// Posts dropped before buffering (counter, labels: reason).
pub const POSTS_DROPPED_TOTAL: &str = "courier_posts_dropped_total";
/// Flush pipeline runs (counter, labels: outcome).
pub const FLUSHES_TOTAL: &str = "courier_flushes_total";
/// Events confirmed delivered (counter, labels: provider).
pub const EVENTS_DELIVERED_TOTAL: &str = "courier_events_delivered_total";
/// Events requeued after a rejected delivery (counter, labels: provider).
pub const EVENTS_REQUEUED_TOTAL: &str = "courier_events_requeued_total";
/// Events dropped from the pipeline (counter, labels: reason).
pub const EVENTS_DROPPED_TOTAL: &str = "courier_events_dropped_total";
/// Events written to durable storage (counter).
pub const EVENTS_STORED_TOTAL: &str = "courier_events_stored_total";
/// Events recovered from durable storage (counter).
pub const EVENTS_RESTORED_TOTAL: &str = "courier_events_restored_total";
/// Failed attempts to persist the outbox (counter).
pub const STORE_FAILURES_TOTAL: &str = "courier_store_failures_total";
/// Teardown batches refused by the beacon transport (counter, labels: provider).
pub const BEACON_PUSHBACKS_TOTAL: &str = "courier_beacon_pushbacks_total";
/// Events currently buffered in the outbox (gauge).
pub const OUTBOX_DEPTH: &str = "courier_outbox_depth";
