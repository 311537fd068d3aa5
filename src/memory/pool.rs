//! Bookkeeping shared by the memory and span pools.
//!
//! A pool holds one lifetime handle on the [`ConnectionDataFile`] and tracks
//! its own outstanding leases by token. Closing stops new rentals; the pool
//! gives its lifetime handle back once it is closed and the last lease has
//! been returned.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::data_file::{ConnectionDataFile, LifetimeHandle};
use super::region::RegionView;
use super::token::{OwnerToken, TokenSet};
use crate::{Result, TelemetryError};

pub(crate) struct LeasePool {
    kind: &'static str,
    view: RegionView,
    state: Mutex<PoolState>,
}

struct PoolState {
    leases: TokenSet,
    closed: bool,
    /// `None` once the pool has been disposed.
    lifetime: Option<LifetimeHandle>,
}

impl LeasePool {
    pub(crate) fn new(kind: &'static str, data_file: &Arc<ConnectionDataFile>) -> Result<Self> {
        let lifetime = data_file.acquire_lifetime_handle()?;
        let view = lifetime.view();
        debug!(pool = kind, region = %data_file.name(), "Lease pool created");
        Ok(Self {
            kind,
            view,
            state: Mutex::new(PoolState {
                leases: TokenSet::new(),
                closed: false,
                lifetime: Some(lifetime),
            }),
        })
    }

    pub(crate) fn rent(&self) -> Result<(OwnerToken, RegionView)> {
        let mut state = self.state.lock();
        if state.lifetime.is_none() {
            return Err(TelemetryError::disposed(self.kind));
        }
        if state.closed {
            return Err(TelemetryError::invalid_operation(format!(
                "{} is closed and cannot issue new leases",
                self.kind
            )));
        }

        let token = state.leases.issue();
        trace!(pool = self.kind, %token, active = state.leases.len(), "Lease rented");
        Ok((token, self.view))
    }

    /// Returns a lease. The return that empties a closed pool disposes it.
    pub(crate) fn return_lease(&self, token: OwnerToken) {
        let mut state = self.state.lock();
        if !state.leases.remove(token) {
            return;
        }
        trace!(pool = self.kind, %token, active = state.leases.len(), "Lease returned");

        if state.closed && state.leases.is_empty() {
            self.dispose_locked(&mut state);
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(pool = self.kind, active = state.leases.len(), "Lease pool closed");

        if state.leases.is_empty() {
            self.dispose_locked(&mut state);
        }
    }

    fn dispose_locked(&self, state: &mut PoolState) {
        if let Some(mut lifetime) = state.lifetime.take() {
            debug!(pool = self.kind, "Lease pool drained, releasing lifetime handle");
            lifetime.release();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().lifetime.is_none()
    }

    pub(crate) fn active_leases(&self) -> usize {
        self.state.lock().leases.len()
    }
}
