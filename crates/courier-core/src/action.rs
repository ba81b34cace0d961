//! Pipeline stages observable through the replaying bus.

use serde::{Deserialize, Serialize};

/// Actions the pipeline announces as it moves events along.
///
/// Subscribers registered through the client observe these in emission
/// order; late subscribers can replay held emissions via the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxAction {
    /// A flush cycle started with work to do.
    Send,
    /// A flush cycle resolved with every batch acknowledged, or found the
    /// outbox empty.
    Ok,
    /// A flush cycle resolved with at least one provider rejecting.
    Error,
    /// The client is tearing down.
    Shutdown,
    /// Outbox contents are being persisted.
    Store,
    /// Persisted contents from an earlier instance were reloaded.
    Restore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_serialize_screaming() {
        let text = serde_json::to_string(&OutboxAction::Restore).unwrap();
        assert_eq!(text, "\"RESTORE\"");
    }
}
