//! Binary layout of the producer's shared memory.
//!
//! ```text
//! 0        DataFileHeader (112 bytes, 4 buffer descriptors inline)
//! ...      session info text   (session_info_offset, session_info_length)
//! ...      DataVariableHeader[variable_count] at variable_header_offset
//! ...      telemetry buffer N at telemetry_buffers[N].buffer_offset,
//!          telemetry_buffer_element_length bytes each
//! ```
//!
//! Everything here is read-only from the consumer side.

pub mod header;
pub mod variables;

pub use header::{
    DATA_FILE_HEADER_SIZE, DataFileHeader, MAX_TELEMETRY_BUFFERS, STATUS_CONNECTED,
    TelemetryBufferHeader,
};
pub use variables::{DATA_VARIABLE_HEADER_SIZE, DataVariableHeader};
