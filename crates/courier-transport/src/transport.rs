//! The transport capability trait and its error taxonomy.

use async_trait::async_trait;
use thiserror::Error;

/// Content type of every body this crate produces.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Errors from a transport send.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint answered with a non-success status. The dispatcher's
    /// retry gate keys off this variant.
    #[error("endpoint rejected the send with status {code}")]
    Status {
        /// HTTP status code.
        code: u16,
    },

    /// The endpoint could not be reached or did not answer in time. Opaque:
    /// the send may or may not have landed.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// The transport could not be constructed.
    #[error("transport setup failed: {0}")]
    Setup(String),
}

/// Convenience alias for transport results.
pub type Result<T> = std::result::Result<T, TransportError>;

/// How the pipeline reaches the network.
///
/// Bodies arrive already form-encoded (see [`crate::wire`]); implementations
/// add [`FORM_CONTENT_TYPE`] and nothing else.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `url` and await the outcome. `Ok` on a 2xx answer.
    async fn post(&self, url: &str, body: String) -> Result<()>;

    /// Queue a fire-and-forget send for teardown paths. Returns whether the
    /// transport accepted the body; a refusal is the caller's cue to fall
    /// back to persistence.
    fn send_beacon(&self, url: &str, body: String) -> bool;
}
