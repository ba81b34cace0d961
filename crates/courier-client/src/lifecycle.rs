//! Page lifecycle vocabulary and the unload payload stash.

use std::collections::BTreeMap;

use serde_json::Value;

/// Host-reported page transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The page came back to the foreground.
    Visible,
    /// The page went to the background and may be killed without warning.
    Hidden,
    /// The page is going away for good.
    Unload,
}

/// Where the page sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Foreground, timers running.
    Active,
    /// Backgrounded; pending work has been handed off or persisted.
    Hidden,
    /// Unloaded. Terminal: lifecycle events are ignored from here on.
    Gone,
}

/// Named payload slots posted automatically at unload.
///
/// Hosts park a "this page died doing X" payload under a name, overwrite it
/// as the page state evolves, and clear it when the work completes. Whatever
/// is still stashed at unload drains through the normal post path and rides
/// the final beacon.
#[derive(Debug, Default)]
pub struct PayloadStash {
    slots: BTreeMap<String, (String, Value)>,
}

impl PayloadStash {
    /// Empty stash.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the payload for `name`, replacing any previous one.
    pub fn set(&mut self, name: &str, route: &str, payload: Value) {
        let _ = self
            .slots
            .insert(name.to_owned(), (route.to_owned(), payload));
    }

    /// Drop the slot for `name`, if set.
    pub fn remove(&mut self, name: &str) {
        let _ = self.slots.remove(name);
    }

    /// Number of live slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing is stashed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Take every slot as `(route, payload)` pairs, name-ordered.
    pub fn drain(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.slots).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latest_payload_for_a_name_wins() {
        let mut stash = PayloadStash::new();
        stash.set("nav", "perf:navigation", json!({"stage": 1}));
        stash.set("nav", "perf:navigation", json!({"stage": 2}));
        assert_eq!(stash.len(), 1);

        let drained = stash.drain();
        assert_eq!(drained, vec![("perf:navigation".into(), json!({"stage": 2}))]);
        assert!(stash.is_empty());
    }

    #[test]
    fn removed_slots_do_not_drain() {
        let mut stash = PayloadStash::new();
        stash.set("a", "r1", json!(1));
        stash.set("b", "r2", json!(2));
        stash.remove("a");
        stash.remove("missing");

        assert_eq!(stash.drain(), vec![("r2".into(), json!(2))]);
    }

    #[test]
    fn drain_is_name_ordered() {
        let mut stash = PayloadStash::new();
        stash.set("zz", "late", json!(1));
        stash.set("aa", "early", json!(2));

        let routes: Vec<String> = stash.drain().into_iter().map(|(route, _)| route).collect();
        assert_eq!(routes, vec!["early".to_owned(), "late".to_owned()]);
    }
}
