//! # courier-core
//!
//! Shared vocabulary for the courier telemetry pipeline.
//!
//! - **Event model**: [`OutboxEvent`] with wire and persistence projections
//! - **Batches**: [`WrappedBatch`] and [`SessionEnvelope`] delivery shapes
//! - **Actions**: [`OutboxAction`] pipeline stages observable through the bus
//! - **Replay bus**: bounded held-emission emitter for late subscribers
//! - **Identity**: [`IdentitySource`] capability trait with a static impl
//! - **Config**: [`TelemetryConfig`] with serde camelCase defaults
//!
//! ## Crate Position
//!
//! Foundation layer. Depends on nothing internal.
//! Depended on by: courier-transport, courier-client.

#![deny(unsafe_code)]

pub mod action;
pub mod config;
pub mod event;
pub mod identity;
pub mod replay;
pub mod time;

// Re-export main public API
pub use action::OutboxAction;
pub use config::{EndpointConfig, TelemetryConfig, GATE_METRICS_CHANNEL};
pub use event::{
    DeliveredCallback, DeliveryStatus, EventMeta, OutboxEvent, SessionEnvelope, StoredMeta,
    StoredRecord, WirePost, WrappedBatch, LOG_TYPE_CLIENT_EVENT,
};
pub use identity::{generate_device_id, generate_page_id, IdentitySource, StaticIdentity};
pub use replay::{ReplayBuffer, ReplayBus};
pub use time::now_ms;
