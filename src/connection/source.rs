//! Where the mapped region and data-ready signal come from.
//!
//! The connection never talks to the OS directly. A [`DataSource`] opens the
//! producer's region and builds the wait handle the worker blocks on, and a
//! [`Clock`] measures idle time, so both can be replaced in tests.

use std::fmt;
use std::time::{Duration, Instant};

use super::options::ConnectionOptions;
use crate::Result;
use crate::memory::MappedRegion;

/// Outcome of one wait on a [`DataReadyEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    Timeout,
}

/// Auto-reset event the producer signals after publishing a buffer.
pub trait DataReadyEvent: Send {
    /// Blocks for up to `timeout`; a signal is consumed by the wait that
    /// observes it.
    fn wait(&mut self, timeout: Duration) -> Result<WaitResult>;
}

/// Opens the producer's shared memory.
pub trait DataSource: Send + Sync {
    /// Maps the region, or returns `Ok(None)` while the producer is not
    /// running.
    fn open_region(&self) -> Result<Option<MappedRegion>>;

    /// Builds the data-ready wait handle. Called once per worker run.
    fn create_data_ready_event(&self) -> Result<Box<dyn DataReadyEvent>>;
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The producer's named OS objects.
///
/// Only Windows has them; elsewhere every call fails with
/// [`TelemetryError::UnsupportedPlatform`](crate::TelemetryError::UnsupportedPlatform).
#[derive(Clone)]
pub struct NamedDataSource {
    memory_map_name: String,
    data_ready_event_name: String,
}

impl NamedDataSource {
    /// Source for the object names in `options`.
    pub fn new(options: &ConnectionOptions) -> Self {
        Self {
            memory_map_name: options.memory_map_name.clone(),
            data_ready_event_name: options.data_ready_event_name.clone(),
        }
    }
}

impl fmt::Debug for NamedDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedDataSource")
            .field("memory_map_name", &self.memory_map_name)
            .field("data_ready_event_name", &self.data_ready_event_name)
            .finish()
    }
}

#[cfg(windows)]
impl DataSource for NamedDataSource {
    fn open_region(&self) -> Result<Option<MappedRegion>> {
        let mapping = crate::windows::NamedMapping::open(&self.memory_map_name)?;
        Ok(mapping.map(|m| MappedRegion::new(self.memory_map_name.clone(), m)))
    }

    fn create_data_ready_event(&self) -> Result<Box<dyn DataReadyEvent>> {
        let event = crate::windows::NamedEvent::open(&self.data_ready_event_name)?;
        Ok(Box::new(event))
    }
}

#[cfg(not(windows))]
impl DataSource for NamedDataSource {
    fn open_region(&self) -> Result<Option<MappedRegion>> {
        Err(crate::TelemetryError::unsupported_platform("Live shared memory", "Windows"))
    }

    fn create_data_ready_event(&self) -> Result<Box<dyn DataReadyEvent>> {
        Err(crate::TelemetryError::unsupported_platform("Data-ready event", "Windows"))
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::TelemetryError;

    #[test]
    fn named_source_is_windows_only() {
        let source = NamedDataSource::new(&ConnectionOptions::default());
        assert!(matches!(source.open_region(), Err(TelemetryError::UnsupportedPlatform { .. })));
        assert!(matches!(
            source.create_data_ready_event().map(|_| ()),
            Err(TelemetryError::UnsupportedPlatform { .. })
        ));
    }
}
