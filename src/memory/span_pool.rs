//! Pool of thread-bound span leases over the mapped region.
//!
//! Span leases are meant for short, synchronous reads on the thread that
//! rented them. They are deliberately `!Send` so a lease cannot outlive the
//! call stack that asked for it by escaping to another thread.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::data_file::ConnectionDataFile;
use super::pool::LeasePool;
use super::region::RegionView;
use super::token::OwnerToken;
use crate::{Result, TelemetryError};

/// Issues [`DataSpanHandle`] leases.
pub struct DataSpanPool {
    core: LeasePool,
}

impl DataSpanPool {
    /// Creates a pool holding one lifetime handle on `data_file`.
    pub fn new(data_file: &Arc<ConnectionDataFile>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self { core: LeasePool::new("DataSpanPool", data_file)? }))
    }

    /// Checks out a span lease. Fails once the pool is closed.
    pub fn rent(self: &Arc<Self>) -> Result<DataSpanHandle> {
        let (token, view) = self.core.rent()?;
        Ok(DataSpanHandle { pool: Some(Arc::clone(self)), token, view, _thread_bound: PhantomData })
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

impl fmt::Debug for DataSpanPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSpanPool")
            .field("closed", &self.is_closed())
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// Thread-bound lease over the mapped bytes.
pub struct DataSpanHandle {
    pool: Option<Arc<DataSpanPool>>,
    token: OwnerToken,
    view: RegionView,
    _thread_bound: PhantomData<*const ()>,
}

impl DataSpanHandle {
    /// Token this lease was issued under.
    pub fn token(&self) -> Result<OwnerToken> {
        if self.pool.is_none() {
            return Err(TelemetryError::disposed("DataSpanHandle"));
        }
        Ok(self.token)
    }

    /// The mapped bytes.
    pub fn span(&self) -> Result<&[u8]> {
        if self.pool.is_none() {
            return Err(TelemetryError::disposed("DataSpanHandle"));
        }
        // SAFETY: the lease is live, so its pool still holds the lifetime
        // handle that keeps the mapping alive for the borrow of `self`.
        Ok(unsafe { self.view.as_slice() })
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

impl fmt::Debug for DataSpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSpanHandle")
            .field("token", &self.token)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for DataSpanHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HeapRegion, MappedRegion};

    fn setup() -> (Arc<HeapRegion>, Arc<ConnectionDataFile>, Arc<DataSpanPool>) {
        let heap = Arc::new(HeapRegion::zeroed(32));
        let file = ConnectionDataFile::new(MappedRegion::new("span-test", Arc::clone(&heap)));
        let pool = DataSpanPool::new(&file).expect("pool");
        (heap, file, pool)
    }

    #[test]
    fn span_reads_mapped_bytes() {
        let (heap, _file, pool) = setup();
        heap.write(4, b"span").expect("write");

        let handle = pool.rent().expect("rent");
        assert_eq!(&handle.span().expect("span")[4..8], b"span");
    }

    #[test]
    fn tokens_are_unique_among_live_leases() {
        let (_heap, _file, pool) = setup();
        let handles: Vec<_> = (0..16).map(|_| pool.rent().expect("rent")).collect();
        let mut tokens: Vec<_> = handles.iter().map(|h| h.token().expect("token")).collect();
        tokens.sort();
        tokens.dedup();
        assert_eq!(tokens.len(), 16);
        assert!(tokens.iter().all(|t| !t.is_none()));
    }

    #[test]
    fn dispose_happens_inside_the_emptying_return() {
        let (_heap, file, pool) = setup();
        let mut handles: Vec<_> = (0..3).map(|_| pool.rent().expect("rent")).collect();
        pool.close();
        file.close();

        while let Some(mut handle) = handles.pop() {
            assert!(!pool.is_disposed());
            assert!(!file.is_disposed());
            handle.dispose();
        }
        assert!(pool.is_disposed());
        assert!(file.is_disposed());
    }

    #[test]
    fn pool_dispose_without_leases_releases_immediately() {
        let (_heap, file, pool) = setup();
        pool.dispose();
        assert!(pool.is_disposed());
        assert_eq!(file.outstanding_handles(), 0);

        file.dispose();
        pool.dispose();
        assert!(file.is_disposed());
    }

    #[test]
    fn disposed_span_handle_rejects_access() {
        let (_heap, _file, pool) = setup();
        let mut handle = pool.rent().expect("rent");
        handle.dispose();
        handle.dispose();
        assert!(matches!(handle.span(), Err(TelemetryError::Disposed { .. })));
        assert_eq!(pool.active_leases(), 0);
    }
}
