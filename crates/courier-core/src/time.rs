//! Wall-clock helpers.
//!
//! Stateful components take `now_ms` values as parameters so their timing
//! rules stay testable without a clock abstraction; this is where callers
//! get the real value.

/// Current wall time in epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
