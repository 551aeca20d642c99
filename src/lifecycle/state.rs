//! Process-wide shutdown state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::observability::metrics;

/// Broadcast channel that long-running tasks subscribe to so they can stop
/// once the teardown sequence is over.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a notifier with no subscribers yet.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Get a receiver that resolves when [`Shutdown::trigger`] is called.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Wake every subscriber. Having none is not an error.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    shutting_down: AtomicBool,
    notifier: Shutdown,
}

/// Shared `is_shutting_down` flag plus the stop notifier.
///
/// The flag starts false and flips to true exactly once. It is never reset.
#[derive(Clone)]
pub struct ShutdownState {
    inner: Arc<Inner>,
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownState {
    /// Create a state with the flag cleared and the gauge reset.
    pub fn new() -> Self {
        metrics::set_shutting_down(false);
        Self {
            inner: Arc::new(Inner {
                shutting_down: AtomicBool::new(false),
                notifier: Shutdown::new(),
            }),
        }
    }

    /// True from the moment shutdown begins, forever after.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Flip the flag. Returns true only for the caller that flipped it.
    ///
    /// This only affects readers of the flag. The teardown sequence itself
    /// is started by [`ShutdownCoordinator::on_termination_signal`].
    ///
    /// [`ShutdownCoordinator::on_termination_signal`]: super::ShutdownCoordinator::on_termination_signal
    pub fn begin(&self) -> bool {
        let first = !self.inner.shutting_down.swap(true, Ordering::AcqRel);
        if first {
            metrics::set_shutting_down(true);
        }
        first
    }

    /// Get a receiver that resolves once the teardown sequence has finished.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.notifier.subscribe()
    }

    /// Tell subscribers the teardown sequence has finished.
    pub fn notify_stopped(&self) {
        self.inner.notifier.trigger();
    }

    /// Number of receivers still waiting for the stop notification.
    pub fn subscriber_count(&self) -> usize {
        self.inner.notifier.receiver_count()
    }
}
