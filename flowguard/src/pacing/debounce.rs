//! Trailing-edge debounce.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Wraps `f` so that a burst of calls results in one invocation, `wait`
/// after the last call of the burst, with that call's arguments.
///
/// [`Debounced::call`] must be made from within a tokio runtime.
pub fn debounce<A, F>(f: F, wait: Duration) -> Debounced<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Debounced {
        f: Arc::new(f),
        wait,
        pending: Arc::new(Mutex::new(None)),
    }
}

/// A debounced callback. Clones share the pending call.
pub struct Debounced<A> {
    f: Arc<dyn Fn(A) + Send + Sync>,
    wait: Duration,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<A> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            wait: self.wait,
            pending: self.pending.clone(),
        }
    }
}

impl<A: Send + 'static> Debounced<A> {
    /// Replaces any pending invocation with one for `args`, `wait` from now.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn call(&self, args: A) {
        let f = self.f.clone();
        let wait = self.wait;

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            if !previous.is_finished() {
                trace!("Debounce superseded pending call");
            }
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            f(args);
        }));
    }
}

impl<A> Debounced<A> {
    /// Drops the pending invocation, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    /// Returns true while an invocation is scheduled and has not run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns the quiet period.
    #[must_use]
    pub const fn wait(&self) -> Duration {
        self.wait
    }
}

impl<A> std::fmt::Debug for Debounced<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounced")
            .field("wait", &self.wait)
            .field("pending", &self.is_pending())
            .finish()
    }
}
