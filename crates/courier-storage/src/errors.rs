//! Error types for storage areas.

use thiserror::Error;

/// Errors from a storage area.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The area rejected a write for lack of space.
    #[error("storage quota exceeded writing {key}: {detail}")]
    QuotaExceeded {
        /// Key whose write was rejected.
        key: String,
        /// Backend message, or a usage dump when the write went through
        /// [`set_item_guarded`](crate::set_item_guarded).
        detail: String,
    },

    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
}

/// Convenience alias for storage results.
pub type Result<T> = std::result::Result<T, StorageError>;
