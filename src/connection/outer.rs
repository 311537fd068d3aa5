//! The public connection handle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::inner::ConnectionState;
use super::options::ConnectionOptions;
use super::shared::ConnectionCore;
use super::source::{Clock, DataSource, NamedDataSource, SystemClock};
use super::tracker::OuterId;
use crate::memory::{DataHandle, DataSpanHandle};
use crate::reader::DataReader;
use crate::{Result, TelemetryError};

/// Read-only connection to the producer's shared memory.
///
/// A `Connection` is one outer handle onto a shared inner connection;
/// [`try_clone`](Self::try_clone) attaches another. The inner connection
/// moves through `None → Connecting → Open → Closed` and never reopens.
/// Data stays mapped until the connection is closed **and** every handle
/// attached at that point has been disposed, and then until every lease
/// taken from it has been returned.
///
/// Dropping a handle disposes it. Disposing the last handle closes the
/// connection.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use simlink::{Connection, ConnectionOptions};
///
/// # fn main() -> simlink::Result<()> {
/// let connection = Connection::new(ConnectionOptions::default())?;
/// connection.open(Duration::from_secs(10))?;
///
/// let reader = connection.create_data_reader()?;
/// let mut sample = vec![0u8; reader.read_header()?.telemetry_buffer_element_length as usize];
/// while connection.wait_for_data_ready(Duration::from_secs(1), None)? {
///     if let Some(read) = reader.read_consistent_telemetry_buffer(&mut sample, 3)? {
///         println!("tick {}", read.tick_count);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    id: OuterId,
    core: Arc<ConnectionCore>,
    disposed: AtomicBool,
}

impl Connection {
    /// Creates a connection to the producer's named OS objects.
    pub fn new(options: ConnectionOptions) -> Result<Self> {
        let source = Arc::new(NamedDataSource::new(&options));
        Self::with_source(options, source, Arc::new(SystemClock))
    }

    /// Creates a connection over any [`DataSource`].
    pub fn with_source(
        options: ConnectionOptions,
        source: Arc<dyn DataSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::attach(ConnectionCore::new(options, source, clock))
    }

    fn attach(core: Arc<ConnectionCore>) -> Result<Self> {
        let id = OuterId::next();
        core.tracker.attach(id)?;
        Ok(Self { id, core, disposed: AtomicBool::new(false) })
    }

    /// Attaches another handle to the same inner connection.
    pub fn try_clone(&self) -> Result<Self> {
        self.check_live()?;
        Self::attach(Arc::clone(&self.core))
    }

    fn check_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TelemetryError::disposed("Connection"));
        }
        Ok(())
    }

    /// Identity of this handle on the shared tracker.
    pub fn id(&self) -> OuterId {
        self.id
    }

    /// Options the connection was created with.
    pub fn options(&self) -> Result<&ConnectionOptions> {
        self.check_live()?;
        Ok(self.core.options())
    }

    /// Current state of the shared inner connection.
    pub fn state(&self) -> Result<ConnectionState> {
        self.check_live()?;
        Ok(self.core.state())
    }

    /// Blocks until the connection is open.
    ///
    /// A no-op when already open; fails with `InvalidOperation` once closed.
    /// While the producer is not running, polls every
    /// [`connect_poll_interval`](ConnectionOptions::connect_poll_interval)
    /// and fails with `Timeout` after `timeout`. A failed attempt returns the
    /// connection to `None` so `open` can be retried.
    pub fn open(&self, timeout: Duration) -> Result<()> {
        self.check_live()?;
        self.core.open(timeout, None)
    }

    /// Like [`open`](Self::open), additionally failing with `Cancelled` when
    /// `cancel` fires.
    pub fn open_with_cancel(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        self.check_live()?;
        self.core.open(timeout, Some(cancel))
    }

    /// Opens on the blocking pool without holding an async worker.
    ///
    /// Takes the token by value because the attempt runs on a
    /// `spawn_blocking` thread that may outlive the caller's borrow.
    pub async fn open_async(
        &self,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        self.check_live()?;
        let core = Arc::clone(&self.core);
        tokio::task::spawn_blocking(move || core.open(timeout, cancel.as_ref()))
            .await
            .map_err(|e| {
                TelemetryError::connection_failed_with_source("open task failed", Box::new(e))
            })?
    }

    /// Closes the connection for every attached handle. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.check_live()?;
        self.core.on_connection_closed("closed by caller");
        Ok(())
    }

    /// Leases the mapped bytes as an owned, thread-safe handle.
    pub fn acquire_data_handle(&self) -> Result<DataHandle> {
        self.check_live()?;
        self.core.open_connection()?.memory_pool.rent()
    }

    /// Leases the mapped bytes as a handle bound to the current thread.
    pub fn acquire_data_span_handle(&self) -> Result<DataSpanHandle> {
        self.check_live()?;
        self.core.open_connection()?.span_pool.rent()
    }

    /// Creates a reader owning a fresh lease.
    pub fn create_data_reader(&self) -> Result<DataReader> {
        self.check_live()?;
        let open = self
            .core
            .open_connection()
            .map_err(|e| TelemetryError::invalid_argument("connection", e.to_string()))?;
        DataReader::new(open.memory_pool.rent()?)
    }

    /// Blocks until the producer signals new data.
    ///
    /// Returns `Ok(false)` on timeout, when the connection closes, or when
    /// `cancel` fires.
    pub fn wait_for_data_ready(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        self.check_live()?;
        Ok(self.core.wait_for_data_ready(timeout, cancel))
    }

    /// Async form of [`wait_for_data_ready`](Self::wait_for_data_ready).
    pub async fn wait_for_data_ready_async(
        &self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        self.check_live()?;
        Ok(self.core.wait_for_data_ready_async(timeout, cancel).await)
    }

    /// Stream of data-ready notifications published after the call. Each
    /// item is a running count; gaps mean notifications were coalesced. Ends
    /// when the connection closes.
    pub fn data_ready_updates(&self) -> Result<impl Stream<Item = u64> + Send + 'static> {
        self.check_live()?;
        Ok(self.core.signal.updates(self.core.closing_token()))
    }

    /// Idle timeout the worker currently applies.
    pub fn idle_timeout(&self) -> Result<Duration> {
        self.check_live()?;
        Ok(self.core.idle_timeout())
    }

    /// Changes the idle timeout; a running worker picks it up on its next
    /// wait.
    pub fn set_idle_timeout(&self, timeout: Duration) -> Result<()> {
        self.check_live()?;
        self.core.set_idle_timeout(timeout);
        Ok(())
    }

    /// True once this handle has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Detaches this handle. Repeated calls are no-ops.
    ///
    /// Disposing the last attached handle closes the connection; disposing
    /// the last handle of an already-closed connection releases its data.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(outer = %self.id, "Disposing connection handle");

        if self.core.tracker.detach(self.id) {
            self.core.release_data();
        } else if self.core.tracker.is_empty() && !self.core.tracker.is_closed() {
            self.core.on_connection_closed("last handle disposed");
        }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<ConnectionCore> {
        &self.core
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.core.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.dispose();
    }
}
