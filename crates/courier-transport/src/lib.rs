//! # courier-transport
//!
//! How batches leave the process.
//!
//! - **`Transport`**: capability trait with an awaited `post` and a
//!   fire-and-forget `send_beacon` whose `bool` is the only acknowledgement
//! - **Wire encoding**: form bodies for the batch and session-packaged
//!   surfaces
//! - **`HttpTransport`**: `reqwest` implementation; beacons run through a
//!   bounded queue drained by a detached task
//!
//! ## Crate Position
//!
//! Depends on: courier-core.
//! Depended on by: courier-client.

#![deny(unsafe_code)]

pub mod http;
pub mod transport;
pub mod wire;

// Re-export main public API
pub use http::HttpTransport;
pub use transport::{Result, Transport, TransportError, FORM_CONTENT_TYPE};
pub use wire::{batch_body, envelope_body, join_url};
