//! # courier-client
//!
//! The client-side telemetry pipeline: a posting facade over an in-memory
//! outbox with coalesced flushing, per-provider dispatch, teardown beacons,
//! and cross-instance persistence.
//!
//! - **Facade**: [`TelemetryClient`] with post, log, flush, and lifecycle
//! - **Outbox**: status-tracked buffer swept into per-page-and-user batches
//! - **Scheduler**: single flush timer where the earliest deadline wins
//! - **Dispatch**: route classification onto the analytics, metrics, and
//!   batch surfaces
//! - **Persistence**: page-scoped outbox snapshots and split session state
//! - **Lifecycle**: visible/hidden/unload transitions and the payload stash
//!
//! ## Crate Position
//!
//! Top layer. Depends on: courier-core, courier-storage, courier-transport.

#![deny(unsafe_code)]

pub mod client;
pub mod dispatch;
pub mod lifecycle;
pub mod metrics;
pub mod outbox;
pub mod persist;
pub mod scheduler;
pub mod session;

// Re-export main public API
pub use client::{ClientDeps, FlushOptions, PostOptions, TelemetryClient, ROUTE_OPS};
pub use dispatch::{classify, Provider, ROUTE_ANALYTICS, ROUTE_METRICS};
pub use lifecycle::{LifecycleEvent, PageState};
pub use session::SessionSnapshot;
