//! Readers over the producer's layout.
//!
//! [`SpanDataReader`] borrows bytes and is the zero-copy path; [`DataReader`]
//! owns a [`DataHandle`](crate::memory::DataHandle) lease and can be stored.
//! Both are lock-free and never retry on their own. Use
//! [`TelemetryBufferRead::is_consistent`] or
//! [`SpanDataReader::read_consistent_telemetry_buffer`] to guard against the
//! producer rewriting a buffer mid-copy.

mod buffer;
mod handle;
mod span;

pub use buffer::{TelemetryBufferRead, select_active_buffer};
pub use handle::DataReader;
pub use span::SpanDataReader;
