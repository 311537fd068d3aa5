//! Read-only client for racing-simulator shared-memory telemetry.
//!
//! The simulator publishes its state into a named shared-memory region that
//! it alone writes. simlink maps that region, keeps it mapped exactly as long
//! as something still reads from it, follows the producer as it starts and
//! stops, and copies out the most recently written telemetry buffer.
//!
//! # Layers
//!
//! - [`memory`]: the mapping, its lifetime broker and the lease pools. The
//!   mapping is freed only after the connection is closed *and* every lease
//!   has been returned.
//! - [`connection`]: the `None → Connecting → Open → Closed` state machine
//!   shared by any number of [`Connection`] handles, plus the worker thread
//!   that turns the producer's data-ready event into waits and streams.
//! - [`schema`] and [`reader`]: the fixed binary layout and the active-buffer
//!   selection and copy protocol.
//! - [`simulation`]: an in-process producer for tests, demos and benchmarks
//!   on any platform.
//!
//! # Consistency
//!
//! The producer takes no locks. A copy can race a write, which shows up as a
//! changed tick count; see [`TelemetryBufferRead::is_consistent`] and
//! [`SpanDataReader::read_consistent_telemetry_buffer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use simlink::{Connection, ConnectionOptions};
//!
//! # fn main() -> simlink::Result<()> {
//! let connection = Connection::new(ConnectionOptions::default())?;
//! connection.open(Duration::from_secs(30))?;
//!
//! let reader = connection.create_data_reader()?;
//! let (session, version) = reader.read_session_info_string()?;
//! println!("session info v{}: {} bytes", version, session.len());
//!
//! for variable in reader.read_telemetry_variable_headers()? {
//!     println!("{} @ {} ({:?})", variable.name, variable.offset, variable.variable_type());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub mod connection;
pub mod memory;
pub mod reader;
pub mod schema;
pub mod simulation;

// Platform-specific modules
#[cfg(windows)]
pub mod windows;

pub use error::*;
pub use types::*;

pub use connection::{
    Clock, Connection, ConnectionOptions, ConnectionState, DataReadyEvent, DataSource,
    NamedDataSource, OuterConnectionTracker, OuterId, SystemClock, WaitResult, WorkerExit,
};
pub use memory::{
    ConnectionDataFile, DataHandle, DataMemoryPool, DataSpanHandle, DataSpanPool, HeapRegion,
    LifetimeHandle, MappedRegion, OwnerToken, RegionBacking,
};
pub use reader::{DataReader, SpanDataReader, TelemetryBufferRead, select_active_buffer};
pub use schema::{
    DATA_FILE_HEADER_SIZE, DATA_VARIABLE_HEADER_SIZE, DataFileHeader, DataVariableHeader,
    MAX_TELEMETRY_BUFFERS, STATUS_CONNECTED, TelemetryBufferHeader,
};
