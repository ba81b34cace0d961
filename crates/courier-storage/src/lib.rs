//! # courier-storage
//!
//! Key-value storage areas and the cross-instance page lock.
//!
//! - **`StorageArea`**: the blocking key-value trait persistence writes
//!   through, with a quota-reporting guarded setter
//! - **`MemoryStorage`**: in-process area with an optional byte quota
//! - **`SqliteStorage`**: durable single-table area on `rusqlite`
//! - **`PageLock`**: lease-based advisory mutex over any area, used to keep
//!   two instances from restoring the same persisted events
//!
//! ## Crate Position
//!
//! Foundation layer. Depends on nothing internal.
//! Depended on by: courier-client.

#![deny(unsafe_code)]

pub mod area;
pub mod errors;
pub mod memory;
pub mod mutex;
pub mod sqlite;

// Re-export main public API
pub use area::{set_item_guarded, StorageArea, RESERVED_PREFIX, SCHEME_PREFIX};
pub use errors::{Result, StorageError};
pub use memory::MemoryStorage;
pub use mutex::{LockGuard, PageLock, DEFAULT_LEASE_MS};
pub use sqlite::SqliteStorage;
