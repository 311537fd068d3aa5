//! Shared state behind every outer handle of one connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::inner::{ConnectionState, InnerConnection, OpenConnection};
use super::options::ConnectionOptions;
use super::signal::DataReadySignal;
use super::source::{Clock, DataSource};
use super::tracker::OuterConnectionTracker;
use super::worker::{WorkerExit, WorkerOwner, spawn_worker};
use crate::memory::{DataHandle, MappedRegion};
use crate::schema::DataFileHeader;
use crate::schema::header::{offsets, read_i32_volatile};
use crate::{Result, TelemetryError};

/// Longest a blocked opener sleeps before re-checking an external token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

pub(crate) struct ConnectionCore {
    options: ConnectionOptions,
    idle_timeout_ms: AtomicU64,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
    inner: Mutex<InnerConnection>,
    state_changed: Condvar,
    pub(crate) tracker: OuterConnectionTracker,
    cancel: CancellationToken,
    cancelled: AtomicBool,
    pub(crate) signal: DataReadySignal,
    next_attempt: AtomicU64,
}

impl ConnectionCore {
    pub(crate) fn new(
        options: ConnectionOptions,
        source: Arc<dyn DataSource>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let idle_timeout_ms = AtomicU64::new(duration_to_ms(options.idle_timeout));
        Arc::new(Self {
            options,
            idle_timeout_ms,
            source,
            clock,
            inner: Mutex::new(InnerConnection::Idle),
            state_changed: Condvar::new(),
            tracker: OuterConnectionTracker::new(),
            cancel: CancellationToken::new(),
            cancelled: AtomicBool::new(false),
            signal: DataReadySignal::new(),
            next_attempt: AtomicU64::new(1),
        })
    }

    pub(crate) fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state()
    }

    pub(crate) fn closing_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.load(Ordering::Acquire))
    }

    pub(crate) fn set_idle_timeout(&self, timeout: Duration) {
        self.idle_timeout_ms.store(duration_to_ms(timeout), Ordering::Release);
    }

    /// The open connection's resources, or an invalid-operation fault.
    pub(crate) fn open_connection(&self) -> Result<Arc<OpenConnection>> {
        match &*self.inner.lock() {
            InnerConnection::Open(open) => Ok(Arc::clone(open)),
            other => Err(TelemetryError::invalid_operation(format!(
                "connection is {}, not open",
                other.state()
            ))),
        }
    }

    /// Drives the connection to `Open`, blocking for up to `timeout`.
    pub(crate) fn open(
        self: &Arc<Self>,
        timeout: Duration,
        external: Option<&CancellationToken>,
    ) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let Some(attempt) = self.begin_attempt(timeout, deadline, external)? else {
            return Ok(());
        };

        let established = self
            .find_producer(timeout, deadline, external)
            .and_then(|region| self.on_connection_established(attempt, region));
        if let Err(e) = &established {
            debug!(attempt, error = %e, "Open attempt failed");
            self.abandon_attempt(attempt);
        }
        established
    }

    /// Moves `Idle` to `Connecting` and returns the attempt id, or `None`
    /// when the connection is already open. Waits out another caller's
    /// in-flight attempt.
    fn begin_attempt(
        &self,
        timeout: Duration,
        deadline: Option<Instant>,
        external: Option<&CancellationToken>,
    ) -> Result<Option<u64>> {
        let mut inner = self.inner.lock();
        loop {
            match &*inner {
                InnerConnection::Open(_) => return Ok(None),
                InnerConnection::Closed { .. } => {
                    return Err(TelemetryError::invalid_operation(
                        "connection is closed and cannot be reopened",
                    ));
                }
                InnerConnection::Idle => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    *inner = InnerConnection::Connecting { attempt };
                    info!(
                        attempt,
                        from = %ConnectionState::None,
                        to = %ConnectionState::Connecting,
                        "Connection state changed"
                    );
                    return Ok(Some(attempt));
                }
                InnerConnection::Connecting { attempt } => {
                    trace!(attempt, "Waiting for in-flight open attempt");
                    if external.is_some_and(CancellationToken::is_cancelled) {
                        return Err(TelemetryError::Cancelled);
                    }
                    self.pause(&mut inner, timeout, deadline, external.is_some())?;
                }
            }
        }
    }

    /// Polls the data source until the producer's region is mapped, has the
    /// expected version and reports itself connected.
    fn find_producer(
        &self,
        timeout: Duration,
        deadline: Option<Instant>,
        external: Option<&CancellationToken>,
    ) -> Result<MappedRegion> {
        let mut polls = 0u32;
        loop {
            if self.cancel.is_cancelled() || external.is_some_and(CancellationToken::is_cancelled) {
                return Err(TelemetryError::Cancelled);
            }

            polls += 1;
            match self.source.open_region()? {
                Some(region) => {
                    let header = DataFileHeader::read_from(region.as_bytes())?;
                    header.validate_version(self.options.expected_version)?;
                    if header.is_connected() {
                        debug!(polls, region = region.name(), "Producer found");
                        return Ok(region);
                    }
                    debug!(polls, status = header.status, "Producer mapped but not connected");
                }
                None => trace!(polls, "Producer not running"),
            }

            let mut inner = self.inner.lock();
            let pause = self.options.connect_poll_interval;
            self.pause_for(&mut inner, pause, timeout, deadline, external.is_some())?;
        }
    }

    /// Sleeps on the state condvar until woken or `deadline`, failing with
    /// `Timeout` once the deadline has passed.
    fn pause(
        &self,
        inner: &mut MutexGuard<'_, InnerConnection>,
        timeout: Duration,
        deadline: Option<Instant>,
        poll_external: bool,
    ) -> Result<()> {
        self.pause_for(inner, Duration::MAX, timeout, deadline, poll_external)
    }

    fn pause_for(
        &self,
        inner: &mut MutexGuard<'_, InnerConnection>,
        pause: Duration,
        timeout: Duration,
        deadline: Option<Instant>,
        poll_external: bool,
    ) -> Result<()> {
        let mut slice = pause;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(TelemetryError::Timeout { duration: timeout });
            }
            slice = slice.min(deadline - now);
        }
        if poll_external {
            slice = slice.min(CANCEL_POLL);
        }

        if slice == Duration::MAX {
            self.state_changed.wait(inner);
        } else {
            self.state_changed.wait_for(inner, slice);
        }
        Ok(())
    }

    /// Completion of an open attempt. Ignored unless `attempt` is the one in
    /// flight and the connection has not been closed meanwhile.
    pub(crate) fn on_connection_established(
        self: &Arc<Self>,
        attempt: u64,
        region: MappedRegion,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let current =
            matches!(&*inner, InnerConnection::Connecting { attempt: a } if *a == attempt);
        if !current || self.cancel.is_cancelled() {
            let state = inner.state();
            debug!(attempt, %state, "Ignoring stale connection completion");
            return match state {
                ConnectionState::Open => Ok(()),
                ConnectionState::Closed => Err(TelemetryError::Cancelled),
                _ => Err(TelemetryError::invalid_operation(format!(
                    "open attempt {} is no longer in flight",
                    attempt
                ))),
            };
        }

        let open = Arc::new(OpenConnection::establish(region)?);
        let worker = open.memory_pool.rent().and_then(|lease| {
            let link = WorkerLink { core: Arc::downgrade(self), lease };
            spawn_worker(
                Box::new(link),
                Arc::clone(&self.source),
                Arc::clone(&self.clock),
                self.cancel.clone(),
            )
        });
        match worker {
            Ok(worker) => open.set_worker(worker),
            Err(e) => {
                open.dispose();
                return Err(e);
            }
        }

        *inner = InnerConnection::Open(Arc::clone(&open));
        info!(
            attempt,
            region = open.data_file.name(),
            len = open.data_file.len(),
            from = %ConnectionState::Connecting,
            to = %ConnectionState::Open,
            "Connection state changed"
        );
        self.state_changed.notify_all();
        Ok(())
    }

    fn abandon_attempt(&self, attempt: u64) {
        let mut inner = self.inner.lock();
        if matches!(&*inner, InnerConnection::Connecting { attempt: a } if *a == attempt) {
            *inner = InnerConnection::Idle;
            info!(
                attempt,
                from = %ConnectionState::Connecting,
                to = %ConnectionState::None,
                "Connection state changed"
            );
            self.state_changed.notify_all();
        }
    }

    /// Moves any non-terminal state to `Closed`. Idempotent.
    pub(crate) fn on_connection_closed(&self, reason: &str) {
        {
            let mut inner = self.inner.lock();
            let from = inner.state();
            if from == ConnectionState::Closed {
                trace!(reason, "Connection already closed");
                return;
            }
            let retained = match std::mem::replace(&mut *inner, InnerConnection::Idle) {
                InnerConnection::Open(open) => Some(open),
                _ => None,
            };
            *inner = InnerConnection::Closed { retained };
            info!(reason, %from, to = %ConnectionState::Closed, "Connection state changed");
            self.state_changed.notify_all();
        }

        self.cancel_once();
        self.signal.wake_all();
        if self.tracker.close() {
            self.release_data();
        }
    }

    /// Cancels the connection's token; later calls do nothing.
    fn cancel_once(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("Cancelling connection");
            self.cancel.cancel();
        }
    }

    /// Releases the data of a closed connection once no outer handle can
    /// reach it any more.
    pub(crate) fn release_data(&self) {
        let retained = match &mut *self.inner.lock() {
            InnerConnection::Closed { retained } => retained.take(),
            _ => None,
        };
        if let Some(open) = retained {
            open.dispose();
            open.join_worker();
        }
    }

    /// Blocks for the next data-ready notification.
    pub(crate) fn wait_for_data_ready(
        &self,
        timeout: Duration,
        external: Option<&CancellationToken>,
    ) -> bool {
        self.signal.wait(timeout, &self.cancel, external)
    }

    pub(crate) async fn wait_for_data_ready_async(
        &self,
        timeout: Duration,
        external: Option<&CancellationToken>,
    ) -> bool {
        self.signal.wait_async(timeout, &self.cancel, external).await
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Worker's view of its connection. Holds a lease so the status field stays
/// readable for the whole run.
struct WorkerLink {
    core: Weak<ConnectionCore>,
    lease: DataHandle,
}

impl WorkerOwner for WorkerLink {
    fn idle_timeout(&self) -> Duration {
        self.core.upgrade().map_or(Duration::ZERO, |core| core.idle_timeout())
    }

    fn simulator_status(&self) -> i32 {
        self.lease.bytes().and_then(|bytes| read_i32_volatile(bytes, offsets::STATUS)).unwrap_or(0)
    }

    fn on_data_ready(&self) {
        if let Some(core) = self.core.upgrade() {
            core.signal.notify();
        }
    }

    fn on_worker_exit(&self, exit: WorkerExit) {
        if exit.is_canceled() {
            return;
        }
        match self.core.upgrade() {
            Some(core) => {
                warn!(%exit, "Producer went away, closing connection");
                core.on_connection_closed(&exit.to_string());
            }
            None => trace!(%exit, "Worker outlived its connection"),
        }
    }
}
