//! Coalescing flush timer.
//!
//! One timer serves the whole outbox. Arming it with a delay only ever moves
//! the deadline earlier; posts with long delays ride along with whatever
//! flush was already scheduled. The worker in [`run_timer`] sleeps on the
//! armed deadline, clears it, and runs the flush, so a flush can re-arm the
//! timer without the worker spinning on a stale deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Handle for arming and disarming the shared flush deadline.
///
/// Clones share one deadline. Created together with the receiver half that
/// [`run_timer`] consumes.
#[derive(Debug, Clone)]
pub struct FlushTimer {
    deadline: Arc<watch::Sender<Option<Instant>>>,
}

impl FlushTimer {
    /// New disarmed timer plus the deadline feed for its worker.
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<Option<Instant>>) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                deadline: Arc::new(tx),
            },
            rx,
        )
    }

    /// Arm the timer for `delay` from now, unless an earlier deadline is
    /// already armed. Returns true when this call moved the deadline.
    pub fn schedule(&self, delay: Duration) -> bool {
        let target = Instant::now() + delay;
        self.deadline.send_if_modified(|current| match current {
            Some(existing) if *existing <= target => false,
            _ => {
                *current = Some(target);
                true
            }
        })
    }

    /// Re-arm for `delay` from now, regardless of the current deadline.
    pub fn reset(&self, delay: Duration) {
        let _ = self.deadline.send_replace(Some(Instant::now() + delay));
    }

    /// Disarm the timer.
    pub fn clear(&self) {
        let _ = self.deadline.send_replace(None);
    }

    /// The armed deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.borrow()
    }
}

/// Why [`run_timer`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEnd {
    /// The cancellation token fired.
    Cancelled,
    /// Every deadline sender was dropped.
    Closed,
}

/// Drive the timer until cancellation: sleep on the armed deadline, clear
/// it, run `on_fire`, repeat.
///
/// Deadline changes interrupt the sleep, so re-arms during a flush take
/// effect on the next pass instead of waiting out the stale deadline.
pub async fn run_timer<F, Fut>(
    timer: FlushTimer,
    mut deadline_rx: watch::Receiver<Option<Instant>>,
    cancel: CancellationToken,
    mut on_fire: F,
) -> TimerEnd
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    loop {
        let deadline = *deadline_rx.borrow_and_update();
        tokio::select! {
            () = cancel.cancelled() => return TimerEnd::Cancelled,
            changed = deadline_rx.changed() => {
                if changed.is_err() {
                    return TimerEnd::Closed;
                }
            }
            () = wait_for(deadline) => {
                timer.clear();
                on_fire().await;
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
