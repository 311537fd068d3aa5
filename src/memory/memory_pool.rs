//! Pool of owned, thread-safe leases over the mapped region.

use std::fmt;
use std::sync::Arc;

use super::data_file::ConnectionDataFile;
use super::pool::LeasePool;
use super::region::RegionView;
use super::token::OwnerToken;
use crate::{Result, TelemetryError};

/// Issues [`DataHandle`] leases that can be stored and sent across threads.
pub struct DataMemoryPool {
    core: LeasePool,
}

impl DataMemoryPool {
    /// Creates a pool holding one lifetime handle on `data_file`.
    pub fn new(data_file: &Arc<ConnectionDataFile>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self { core: LeasePool::new("DataMemoryPool", data_file)? }))
    }

    /// Checks out a lease. Fails once the pool is closed.
    pub fn rent(self: &Arc<Self>) -> Result<DataHandle> {
        let (token, view) = self.core.rent()?;
        Ok(DataHandle { pool: Some(Arc::clone(self)), token, view })
    }

    /// Stops new rentals; the pool is disposed when its last lease returns.
    pub fn close(&self) {
        self.core.close();
    }

    /// Closes the pool and releases its lifetime handle once no lease is
    /// active. Repeated calls are no-ops.
    pub fn dispose(&self) {
        self.core.close();
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// True once closed and drained.
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Number of leases not yet returned.
    pub fn active_leases(&self) -> usize {
        self.core.active_leases()
    }
}

impl fmt::Debug for DataMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMemoryPool")
            .field("closed", &self.is_closed())
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// Owned lease over the mapped bytes.
///
/// While a handle is live the mapping cannot be freed. The lease goes back to
/// its pool exactly once, on [`dispose`](Self::dispose) or drop; every
/// accessor fails with [`TelemetryError::Disposed`] afterwards.
pub struct DataHandle {
    /// `None` once the lease has been returned.
    pool: Option<Arc<DataMemoryPool>>,
    token: OwnerToken,
    view: RegionView,
}

impl DataHandle {
    fn check_live(&self) -> Result<()> {
        match &self.pool {
            Some(_) => Ok(()),
            None => Err(TelemetryError::disposed("DataHandle")),
        }
    }

    /// Token this lease was issued under.
    pub fn token(&self) -> Result<OwnerToken> {
        self.check_live()?;
        Ok(self.token)
    }

    /// The mapped bytes.
    pub fn bytes(&self) -> Result<&[u8]> {
        self.check_live()?;
        // SAFETY: the lease is live, so the pool still holds its lifetime
        // handle and the mapping cannot be freed while `self` is borrowed.
        Ok(unsafe { self.view.as_slice() })
    }

    /// Length of the mapped bytes.
    pub fn len(&self) -> Result<usize> {
        self.check_live()?;
        Ok(self.view.len())
    }

    /// True when the mapping is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// True once the lease has been returned.
    pub fn is_disposed(&self) -> bool {
        self.pool.is_none()
    }

    /// Returns the lease to its pool. Repeated calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.core.return_lease(self.token);
        }
    }
}

impl fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHandle")
            .field("token", &self.token)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for DataHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
