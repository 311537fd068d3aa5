//! Reference-counted access to the producer's mapped region.
//!
//! # Layers
//!
//! - [`MappedRegion`] owns the mapping and unmaps it on drop.
//! - [`ConnectionDataFile`] owns the region and brokers [`LifetimeHandle`]s.
//!   The mapping is freed when the broker is closed *and* its handle set is
//!   empty, whichever happens last.
//! - [`DataMemoryPool`] and [`DataSpanPool`] each hold one lifetime handle and
//!   issue short-lived leases ([`DataHandle`], [`DataSpanHandle`]) tracked by
//!   [`OwnerToken`]. A closed pool releases its lifetime handle inside the
//!   return that drains it.
//!
//! Teardown therefore cascades bottom-up: last lease returned → pool disposed
//! → last lifetime handle released → mapping freed.
//!
//! ```rust
//! use std::sync::Arc;
//! use simlink::memory::{ConnectionDataFile, DataMemoryPool, HeapRegion, MappedRegion};
//!
//! # fn main() -> simlink::Result<()> {
//! let heap = Arc::new(HeapRegion::zeroed(4096));
//! let file = ConnectionDataFile::new(MappedRegion::new("demo", heap));
//! let pool = DataMemoryPool::new(&file)?;
//!
//! let lease = pool.rent()?;
//! pool.close();
//! file.close();
//! assert!(!file.is_disposed());
//!
//! drop(lease);
//! assert!(file.is_disposed());
//! # Ok(())
//! # }
//! ```

mod data_file;
mod memory_pool;
mod pool;
mod region;
mod span_pool;
mod token;

pub use data_file::{ConnectionDataFile, LifetimeHandle};
pub use memory_pool::{DataHandle, DataMemoryPool};
pub use region::{HeapRegion, MappedRegion, RegionBacking};
pub use span_pool::{DataSpanHandle, DataSpanPool};
pub use token::OwnerToken;
