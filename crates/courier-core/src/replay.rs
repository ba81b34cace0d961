//! Topic-keyed emitter with bounded held-emission replay.
//!
//! Stateful components announce pipeline stages through a [`ReplayBus`].
//! Live subscribers observe emissions in order; late subscribers can ask for
//! a replay of held emissions first. History is a fixed-capacity ring, so a
//! long-lived pipeline never grows an unbounded backlog for a subscriber
//! that never arrives.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Ring buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity history. Pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct ReplayBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> ReplayBuffer<T> {
    /// Buffer holding at most `capacity` entries. Zero capacity drops every
    /// push.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entry when full.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            let _ = self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Oldest-to-newest iteration over retained entries.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Retained entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

type Handler = Box<dyn FnMut() + Send>;

/// Topic-keyed emitter that can hold emissions for late subscribers.
pub struct ReplayBus<E> {
    inner: Mutex<BusInner<E>>,
}

struct BusInner<E> {
    handlers: HashMap<E, Vec<Handler>>,
    held: ReplayBuffer<E>,
}

impl<E: Copy + Eq + Hash> ReplayBus<E> {
    /// Bus whose held history retains at most `replay_capacity` emissions.
    #[must_use]
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                handlers: HashMap::new(),
                held: ReplayBuffer::new(replay_capacity),
            }),
        }
    }

    /// Register a live subscriber for `topic`.
    pub fn on(&self, topic: E, handler: impl FnMut() + Send + 'static) {
        let mut inner = self.inner.lock();
        inner.handlers.entry(topic).or_default().push(Box::new(handler));
    }

    /// Fire every subscriber registered for `topic`.
    ///
    /// Handlers run outside the bus lock, so a handler may subscribe or emit
    /// other topics. Handlers added to `topic` during its own emission are
    /// kept but not fired this round.
    pub fn emit(&self, topic: E) {
        let mut handlers = {
            let mut inner = self.inner.lock();
            inner.handlers.remove(&topic).unwrap_or_default()
        };
        for handler in &mut handlers {
            handler();
        }
        let mut inner = self.inner.lock();
        match inner.handlers.entry(topic) {
            Entry::Occupied(mut slot) => {
                let added = std::mem::take(slot.get_mut());
                *slot.get_mut() = handlers;
                slot.get_mut().extend(added);
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(handlers);
            }
        }
    }

    /// Record the emission in held history, then fire subscribers.
    pub fn emit_and_hold(&self, topic: E) {
        self.inner.lock().held.push(topic);
        self.emit(topic);
    }

    /// Replay held emissions of `topic` in order, then register live.
    ///
    /// Intended for subscriptions made during setup; an emission racing the
    /// subscription itself may not be replayed.
    pub fn subscribe_replay(&self, topic: E, mut handler: impl FnMut() + Send + 'static) {
        let replays = {
            let inner = self.inner.lock();
            inner.held.iter().filter(|&&held| held == topic).count()
        };
        for _ in 0..replays {
            handler();
        }
        self.on(topic, handler);
    }

    /// Held emissions currently retained, oldest first.
    #[must_use]
    pub fn held(&self) -> Vec<E> {
        self.inner.lock().held.iter().copied().collect()
    }
}

impl<E> std::fmt::Debug for ReplayBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayBus").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Topic {
        Ping,
        Pong,
    }

    fn counter_handler(hits: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let hits = Arc::clone(hits);
        move || {
            let _ = hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ── ring buffer ──

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let mut ring = ReplayBuffer::new(3);
        for n in 0..5 {
            ring.push(n);
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn zero_capacity_ring_stays_empty() {
        let mut ring = ReplayBuffer::new(0);
        ring.push(1);
        assert!(ring.is_empty());
    }

    proptest! {
        #[test]
        fn ring_always_keeps_the_newest_window(
            capacity in 0_usize..24,
            pushes in proptest::collection::vec(any::<u32>(), 0..64),
        ) {
            let mut ring = ReplayBuffer::new(capacity);
            for &value in &pushes {
                ring.push(value);
            }
            let window_start = pushes.len().saturating_sub(capacity);
            prop_assert_eq!(
                ring.iter().copied().collect::<Vec<_>>(),
                pushes[window_start..].to_vec()
            );
        }
    }

    // ── bus ──

    #[test]
    fn emit_reaches_only_matching_topic() {
        let bus = ReplayBus::new(4);
        let pings = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));
        bus.on(Topic::Ping, counter_handler(&pings));
        bus.on(Topic::Pong, counter_handler(&pongs));

        bus.emit(Topic::Ping);
        bus.emit(Topic::Ping);

        assert_eq!(pings.load(Ordering::SeqCst), 2);
        assert_eq!(pongs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retroactive_subscriber_replays_held_emissions_in_order() {
        let bus = ReplayBus::new(4);
        bus.emit_and_hold(Topic::Ping);
        bus.emit_and_hold(Topic::Pong);
        bus.emit_and_hold(Topic::Ping);

        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe_replay(Topic::Ping, counter_handler(&seen));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        bus.emit(Topic::Ping);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn held_history_is_bounded() {
        let bus = ReplayBus::new(2);
        for _ in 0..5 {
            bus.emit_and_hold(Topic::Ping);
        }
        bus.emit_and_hold(Topic::Pong);

        assert_eq!(bus.held(), vec![Topic::Ping, Topic::Pong]);

        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe_replay(Topic::Ping, counter_handler(&seen));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn plain_emit_is_not_held() {
        let bus = ReplayBus::new(4);
        bus.emit(Topic::Ping);
        assert!(bus.held().is_empty());
    }

    #[test]
    fn handler_registered_during_emit_survives_for_next_round() {
        let bus = Arc::new(ReplayBus::new(4));
        let late = Arc::new(AtomicUsize::new(0));

        let bus_for_handler = Arc::clone(&bus);
        let late_for_handler = Arc::clone(&late);
        bus.on(Topic::Ping, move || {
            bus_for_handler.on(Topic::Ping, counter_handler(&late_for_handler));
        });

        bus.emit(Topic::Ping);
        assert_eq!(late.load(Ordering::SeqCst), 0);

        bus.emit(Topic::Ping);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }
}
