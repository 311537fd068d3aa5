//! Background thread that turns the producer's data-ready event into
//! connection notifications.
//!
//! One worker runs per open connection. Each iteration waits on the event for
//! at most the owner's current idle timeout (sliced so cancellation is seen
//! promptly). A signal is forwarded to the owner. A timeout checks the live
//! status field and the idle budget; either one failing ends the run. The
//! owner hears about the end through exactly one [`WorkerOwner::on_worker_exit`]
//! call, and nothing the worker does can panic or error across that boundary.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::source::{Clock, DataReadyEvent, DataSource, WaitResult};
use crate::schema::STATUS_CONNECTED;
use crate::{Result, TelemetryError};

/// Longest single wait, so cancellation never waits out a full idle timeout.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Why a worker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The connection cancelled the worker.
    Canceled,
    /// The producer cleared its connected status bit.
    SimulatorInactive,
    /// No signal arrived within the idle timeout.
    IdleTimeout,
    /// The wait handle could not be created or waited on.
    WaitFailed,
}

impl WorkerExit {
    /// True when the connection ended the run itself.
    pub fn is_canceled(&self) -> bool {
        matches!(self, WorkerExit::Canceled)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            WorkerExit::Canceled => "canceled",
            WorkerExit::SimulatorInactive => "simulator inactive",
            WorkerExit::IdleTimeout => "idle timeout",
            WorkerExit::WaitFailed => "data-ready wait failed",
        };
        f.write_str(reason)
    }
}

/// What the worker needs from the connection it serves.
pub(crate) trait WorkerOwner: Send {
    /// Current idle timeout, re-read every iteration.
    fn idle_timeout(&self) -> Duration;

    /// Live status field of the mapped header.
    fn simulator_status(&self) -> i32;

    fn on_data_ready(&self);

    fn on_worker_exit(&self, exit: WorkerExit);
}

/// Starts a worker thread. The event is built on the new thread.
pub(crate) fn spawn_worker(
    owner: Box<dyn WorkerOwner>,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("simlink-worker".to_string())
        .spawn(move || {
            info!("Connection worker started");
            let exit = match source.create_data_ready_event() {
                Ok(mut event) => {
                    run_worker(owner.as_ref(), event.as_mut(), clock.as_ref(), &cancel)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open data-ready event");
                    WorkerExit::WaitFailed
                }
            };
            info!(%exit, "Connection worker exited");
            owner.on_worker_exit(exit);
        })
        .map_err(|e| {
            TelemetryError::connection_failed_with_source(
                "failed to spawn worker thread",
                Box::new(e),
            )
        })
}

/// The worker loop. Returns the exit reason without reporting it.
pub(crate) fn run_worker(
    owner: &dyn WorkerOwner,
    event: &mut dyn DataReadyEvent,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> WorkerExit {
    let mut last_signal = clock.now();
    let mut signals = 0u64;

    loop {
        if cancel.is_cancelled() {
            debug!(signals, "Worker cancelled");
            return WorkerExit::Canceled;
        }

        let idle_timeout = owner.idle_timeout();
        match event.wait(idle_timeout.min(WAIT_SLICE)) {
            Ok(WaitResult::Signaled) => {
                signals += 1;
                last_signal = clock.now();
                owner.on_data_ready();
            }
            Ok(WaitResult::Timeout) => {
                if cancel.is_cancelled() {
                    debug!(signals, "Worker cancelled");
                    return WorkerExit::Canceled;
                }

                let status = owner.simulator_status();
                if status & STATUS_CONNECTED == 0 {
                    debug!(status, "Simulator no longer connected");
                    return WorkerExit::SimulatorInactive;
                }

                let idle = clock.now().saturating_duration_since(last_signal);
                if idle >= owner.idle_timeout() {
                    debug!(?idle, "No data within idle timeout");
                    return WorkerExit::IdleTimeout;
                }
                trace!(?idle, "Data-ready wait timed out");
            }
            Err(e) => {
                warn!(error = %e, "Data-ready wait failed");
                return WorkerExit::WaitFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ManualClock, ScriptedEvent, ScriptedStep};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        idle_ms: AtomicU64,
        status: AtomicI32,
        ready: AtomicUsize,
        exits: Mutex<Vec<WorkerExit>>,
    }

    impl Recorder {
        fn connected(idle: Duration) -> Arc<Self> {
            let recorder = Self::default();
            recorder.idle_ms.store(idle.as_millis() as u64, Ordering::SeqCst);
            recorder.status.store(STATUS_CONNECTED, Ordering::SeqCst);
            Arc::new(recorder)
        }
    }

    impl WorkerOwner for Arc<Recorder> {
        fn idle_timeout(&self) -> Duration {
            Duration::from_millis(self.idle_ms.load(Ordering::SeqCst))
        }

        fn simulator_status(&self) -> i32 {
            self.status.load(Ordering::SeqCst)
        }

        fn on_data_ready(&self) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }

        fn on_worker_exit(&self, exit: WorkerExit) {
            self.exits.lock().push(exit);
        }
    }

    #[test]
    fn signals_are_forwarded_until_idle_budget_runs_out() {
        let owner = Recorder::connected(Duration::from_secs(1));
        let clock = ManualClock::new();
        let mut event = ScriptedEvent::new([
            ScriptedStep::Signal,
            ScriptedStep::Signal,
            ScriptedStep::Advance(clock.clone(), Duration::from_millis(400)),
            ScriptedStep::Advance(clock.clone(), Duration::from_millis(700)),
        ]);

        let exit = run_worker(&owner, &mut event, &clock, &CancellationToken::new());
        assert_eq!(exit, WorkerExit::IdleTimeout);
        assert_eq!(owner.ready.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cleared_status_ends_the_run() {
        let owner = Recorder::connected(Duration::from_secs(30));
        owner.status.store(0, Ordering::SeqCst);
        let clock = ManualClock::new();
        let mut event = ScriptedEvent::new([ScriptedStep::Timeout]);

        let exit = run_worker(&owner, &mut event, &clock, &CancellationToken::new());
        assert_eq!(exit, WorkerExit::SimulatorInactive);
    }

    #[test]
    fn idle_timeout_is_reread_each_iteration() {
        let owner = Recorder::connected(Duration::from_secs(30));
        let clock = ManualClock::new();
        let shrink = Arc::clone(&owner);
        let mut event = ScriptedEvent::new([
            ScriptedStep::Advance(clock.clone(), Duration::from_secs(5)),
            ScriptedStep::Run(Box::new(move || {
                shrink.idle_ms.store(1_000, Ordering::SeqCst);
            })),
        ]);

        let exit = run_worker(&owner, &mut event, &clock, &CancellationToken::new());
        assert_eq!(exit, WorkerExit::IdleTimeout);
    }

    #[test]
    fn cancellation_wins_over_timeout_checks() {
        let owner = Recorder::connected(Duration::from_secs(30));
        owner.status.store(0, Ordering::SeqCst);
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut event =
            ScriptedEvent::new([ScriptedStep::Run(Box::new(move || trigger.cancel()))]);

        assert_eq!(run_worker(&owner, &mut event, &clock, &cancel), WorkerExit::Canceled);
        assert_eq!(owner.ready.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_errors_end_the_run() {
        let owner = Recorder::connected(Duration::from_secs(30));
        let clock = ManualClock::new();
        let mut event = ScriptedEvent::new([ScriptedStep::Fail]);
        let exit = run_worker(&owner, &mut event, &clock, &CancellationToken::new());
        assert_eq!(exit, WorkerExit::WaitFailed);
    }

    struct NoEvent;

    impl DataSource for NoEvent {
        fn open_region(&self) -> Result<Option<crate::memory::MappedRegion>> {
            Ok(None)
        }

        fn create_data_ready_event(&self) -> Result<Box<dyn DataReadyEvent>> {
            Err(TelemetryError::connection_failed("no event"))
        }
    }

    #[test]
    fn spawned_worker_reports_exactly_one_exit() {
        let owner = Recorder::connected(Duration::from_secs(30));
        let handle = spawn_worker(
            Box::new(Arc::clone(&owner)),
            Arc::new(NoEvent),
            Arc::new(crate::connection::SystemClock),
            CancellationToken::new(),
        )
        .expect("spawn");
        handle.join().expect("worker");

        assert_eq!(*owner.exits.lock(), vec![WorkerExit::WaitFailed]);
    }
}
