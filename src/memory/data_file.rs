//! Lifetime broker for the single mapped region of a connection.
//!
//! The broker owns the [`MappedRegion`] and hands out [`LifetimeHandle`]s.
//! The mapping is freed only once the broker has been closed **and** every
//! handle has been released; whichever of those two events happens last
//! performs the unmap, under the broker's lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::region::{MappedRegion, RegionView};
use super::token::{OwnerToken, TokenSet};
use crate::{Result, TelemetryError};

/// Owner of a connection's mapped region.
pub struct ConnectionDataFile {
    name: String,
    view: RegionView,
    state: Mutex<DataFileState>,
}

struct DataFileState {
    region: Option<MappedRegion>,
    handles: TokenSet,
    closed: bool,
}

impl ConnectionDataFile {
    /// Takes ownership of a mapped region.
    pub fn new(region: MappedRegion) -> Arc<Self> {
        let name = region.name().to_string();
        let view = region.view();
        Arc::new(Self {
            name,
            view,
            state: Mutex::new(DataFileState {
                region: Some(region),
                handles: TokenSet::new(),
                closed: false,
            }),
        })
    }

    /// Registers a new lifetime handle that keeps the mapping alive.
    ///
    /// Fails once the broker has been closed.
    pub fn acquire_lifetime_handle(self: &Arc<Self>) -> Result<LifetimeHandle> {
        let mut state = self.state.lock();
        if state.region.is_none() {
            return Err(TelemetryError::disposed("ConnectionDataFile"));
        }
        if state.closed {
            return Err(TelemetryError::invalid_operation(
                "cannot acquire a lifetime handle from a closed data file",
            ));
        }

        let token = state.handles.issue();
        trace!(
            region = %self.name,
            %token,
            outstanding = state.handles.len(),
            "Lifetime handle acquired"
        );
        Ok(LifetimeHandle { owner: Arc::clone(self), token, released: false })
    }

    /// Forbids new lifetime handles. Frees the mapping now if none are
    /// outstanding, otherwise on the release that drains the set.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(region = %self.name, outstanding = state.handles.len(), "Data file closed");

        if state.handles.is_empty() {
            self.free_locked(&mut state);
        }
    }

    /// Closes the broker and frees the mapping as soon as no lifetime handle
    /// is outstanding. Repeated calls are no-ops.
    ///
    /// Outstanding handles still defer the unmap to the release that drains
    /// them; this is [`close`](Self::close) under its disposal name.
    pub fn dispose(&self) {
        self.close();
    }

    fn release(&self, token: OwnerToken) {
        let mut state = self.state.lock();
        if !state.handles.remove(token) {
            return;
        }
        trace!(
            region = %self.name,
            %token,
            outstanding = state.handles.len(),
            "Lifetime handle released"
        );

        if state.closed && state.handles.is_empty() {
            self.free_locked(&mut state);
        }
    }

    fn free_locked(&self, state: &mut DataFileState) {
        if let Some(region) = state.region.take() {
            info!(region = %self.name, "Releasing shared memory mapping");
            drop(region);
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// True once the mapping has been freed.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().region.is_none()
    }

    /// Number of lifetime handles not yet released.
    pub fn outstanding_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Display name of the underlying mapping.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// True for an empty mapping.
    pub fn is_empty(&self) -> bool {
        self.view.len() == 0
    }
}

impl fmt::Debug for ConnectionDataFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionDataFile")
            .field("name", &self.name)
            .field("closed", &state.closed)
            .field("disposed", &state.region.is_none())
            .field("outstanding_handles", &state.handles.len())
            .finish()
    }
}

/// Presence marker that keeps a [`ConnectionDataFile`]'s mapping alive.
///
/// Released exactly once, either explicitly or on drop.
pub struct LifetimeHandle {
    owner: Arc<ConnectionDataFile>,
    token: OwnerToken,
    released: bool,
}

impl LifetimeHandle {
    /// Token identifying this handle on its owner.
    pub fn token(&self) -> OwnerToken {
        self.token
    }

    /// The data file this handle keeps alive.
    pub fn data_file(&self) -> &Arc<ConnectionDataFile> {
        &self.owner
    }

    /// Releases the handle. Repeated calls are no-ops.
    pub fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.owner.release(self.token);
    }

    /// True once released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// View over the mapping, valid while this handle is unreleased.
    pub(crate) fn view(&self) -> RegionView {
        self.owner.view
    }
}

impl fmt::Debug for LifetimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeHandle")
            .field("data_file", &self.owner.name)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LifetimeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapRegion;

    fn data_file() -> Arc<ConnectionDataFile> {
        let heap = Arc::new(HeapRegion::zeroed(256));
        ConnectionDataFile::new(MappedRegion::new("test", heap))
    }

    #[test]
    fn close_without_handles_frees_immediately() {
        let file = data_file();
        assert!(!file.is_disposed());
        file.close();
        assert!(file.is_closed());
        assert!(file.is_disposed());
    }

    #[test]
    fn close_defers_until_last_handle_released() {
        let file = data_file();
        let mut first = file.acquire_lifetime_handle().expect("first handle");
        let second = file.acquire_lifetime_handle().expect("second handle");
        assert_ne!(first.token(), second.token());

        file.close();
        assert!(!file.is_disposed(), "handles outstanding, mapping must stay");

        first.release();
        assert!(!file.is_disposed());
        assert_eq!(file.outstanding_handles(), 1);

        drop(second);
        assert!(file.is_disposed());
    }

    #[test]
    fn acquire_after_close_faults() {
        let file = data_file();
        let _held = file.acquire_lifetime_handle().expect("handle");
        file.close();

        let err = file.acquire_lifetime_handle().expect_err("closed broker");
        assert!(matches!(err, TelemetryError::InvalidOperation { .. }));
    }

    #[test]
    fn acquire_after_dispose_reports_disposed() {
        let file = data_file();
        file.close();
        let err = file.acquire_lifetime_handle().expect_err("disposed broker");
        assert!(matches!(err, TelemetryError::Disposed { .. }));
    }

    #[test]
    fn release_and_close_are_idempotent() {
        let file = data_file();
        let mut handle = file.acquire_lifetime_handle().expect("handle");
        let _other = file.acquire_lifetime_handle().expect("other");

        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert_eq!(file.outstanding_handles(), 1);

        file.close();
        file.close();
        assert!(file.is_closed());
        assert!(!file.is_disposed());
    }

    #[test]
    fn dispose_is_idempotent_and_waits_for_handles() {
        let file = data_file();
        let handle = file.acquire_lifetime_handle().expect("handle");

        file.dispose();
        file.dispose();
        assert!(file.is_closed());
        assert!(!file.is_disposed());

        drop(handle);
        assert!(file.is_disposed());
        file.dispose();
        assert!(file.is_disposed());
    }
}
