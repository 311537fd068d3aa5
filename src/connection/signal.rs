//! Fan-out of the worker's data-ready notifications.
//!
//! Each notification bumps a generation counter. Blocking waiters sleep on a
//! condvar; async waiters and streams watch the same counter through a
//! `tokio::sync::watch` channel.

use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Longest a blocking wait sleeps before re-checking an external token,
/// which cannot wake the condvar itself.
const CANCEL_POLL: Duration = Duration::from_millis(10);

pub(crate) struct DataReadySignal {
    generation: Mutex<u64>,
    ready: Condvar,
    updates: watch::Sender<u64>,
}

impl DataReadySignal {
    pub(crate) fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self { generation: Mutex::new(0), ready: Condvar::new(), updates }
    }

    /// Publishes one data-ready notification.
    pub(crate) fn notify(&self) {
        let generation = {
            let mut generation = self.generation.lock();
            *generation = generation.wrapping_add(1);
            *generation
        };
        self.ready.notify_all();
        self.updates.send_replace(generation);
        trace!(generation, "Data ready");
    }

    /// Wakes blocking waiters so they re-check cancellation.
    pub(crate) fn wake_all(&self) {
        let _guard = self.generation.lock();
        self.ready.notify_all();
    }

    /// Blocks until the next notification. Returns false on timeout or when
    /// either token is cancelled.
    pub(crate) fn wait(
        &self,
        timeout: Duration,
        closing: &CancellationToken,
        external: Option<&CancellationToken>,
    ) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = self.generation.lock();
        let start = *generation;

        loop {
            if *generation != start {
                return true;
            }
            if closing.is_cancelled() || external.is_some_and(CancellationToken::is_cancelled) {
                return false;
            }

            let mut slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    deadline - now
                }
                None => Duration::MAX,
            };
            if external.is_some() {
                slice = slice.min(CANCEL_POLL);
            }

            if slice == Duration::MAX {
                self.ready.wait(&mut generation);
            } else {
                self.ready.wait_for(&mut generation, slice);
            }
        }
    }

    /// Async form of [`wait`](Self::wait); suspends without holding a thread.
    pub(crate) async fn wait_async(
        &self,
        timeout: Duration,
        closing: &CancellationToken,
        external: Option<&CancellationToken>,
    ) -> bool {
        let mut updates = self.updates.subscribe();
        if closing.is_cancelled() {
            return false;
        }

        let external_cancelled = async {
            match external {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            changed = updates.changed() => changed.is_ok(),
            _ = closing.cancelled() => false,
            _ = external_cancelled => false,
            _ = tokio::time::sleep(timeout) => false,
        }
    }

    /// Generations published after the call, ending when `closing` fires.
    pub(crate) fn updates(
        &self,
        closing: &CancellationToken,
    ) -> impl Stream<Item = u64> + Send + 'static {
        WatchStream::from_changes(self.updates.subscribe())
            .take_until(closing.clone().cancelled_owned())
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        *self.generation.lock()
    }
}
