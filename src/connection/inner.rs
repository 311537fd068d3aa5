//! State-specific halves of a connection.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::memory::{ConnectionDataFile, DataMemoryPool, DataSpanPool, MappedRegion};

/// Lifecycle of a connection. Transitions only move forward and `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, not opened yet.
    None,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::None => "none",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The variant behind the stable outer handle, swapped under the core's lock.
pub(crate) enum InnerConnection {
    Idle,
    /// An open attempt is in flight; completions for any other attempt are
    /// stale.
    Connecting { attempt: u64 },
    Open(Arc<OpenConnection>),
    /// Data stays here until the last outer handle lets go of it.
    Closed { retained: Option<Arc<OpenConnection>> },
}

impl InnerConnection {
    pub(crate) fn state(&self) -> ConnectionState {
        match self {
            InnerConnection::Idle => ConnectionState::None,
            InnerConnection::Connecting { .. } => ConnectionState::Connecting,
            InnerConnection::Open(_) => ConnectionState::Open,
            InnerConnection::Closed { .. } => ConnectionState::Closed,
        }
    }
}

/// Everything an open connection owns: the lifetime broker, both lease
/// pools, and the worker thread.
pub(crate) struct OpenConnection {
    pub(crate) data_file: Arc<ConnectionDataFile>,
    pub(crate) memory_pool: Arc<DataMemoryPool>,
    pub(crate) span_pool: Arc<DataSpanPool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OpenConnection {
    pub(crate) fn establish(region: MappedRegion) -> Result<Self> {
        let data_file = ConnectionDataFile::new(region);
        let pools = DataMemoryPool::new(&data_file)
            .and_then(|memory| DataSpanPool::new(&data_file).map(|span| (memory, span)));

        match pools {
            Ok((memory_pool, span_pool)) => {
                Ok(Self { data_file, memory_pool, span_pool, worker: Mutex::new(None) })
            }
            Err(e) => {
                data_file.close();
                Err(e)
            }
        }
    }

    pub(crate) fn set_worker(&self, worker: JoinHandle<()>) {
        *self.worker.lock() = Some(worker);
    }

    /// Waits for the worker to exit. Does nothing on the worker's own thread
    /// or once the worker has been joined.
    pub(crate) fn join_worker(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("Connection worker panicked");
        }
    }

    /// Closes both pools and the broker. The mapping is freed once every
    /// outstanding lease has been returned.
    pub(crate) fn dispose(&self) {
        debug!(region = self.data_file.name(), "Releasing connection data");
        self.memory_pool.dispose();
        self.span_pool.dispose();
        self.data_file.dispose();
    }
}

impl fmt::Debug for OpenConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenConnection")
            .field("data_file", &self.data_file)
            .field("memory_pool", &self.memory_pool)
            .field("span_pool", &self.span_pool)
            .finish()
    }
}
