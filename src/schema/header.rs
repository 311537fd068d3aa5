//! Data file header parsing.
//!
//! The producer's header follows the C structure layout of the iRacing SDK:
//! ```c
//! typedef struct irsdk_header
//! {
//!     int ver;                    // api version
//!     int status;                 // bitfield for status
//!     int tickRate;               // ticks per second
//!     int sessionInfoUpdate;      // incremented when session info changes
//!     int sessionInfoLen;         // length in bytes of session info string
//!     int sessionInfoOffset;      // offset to session info string
//!     int numVars;                // length of the variable header array
//!     int varHeaderOffset;        // offset to varHeader[0]
//!     int numBuf;                 // declared number of buffers (<= 4)
//!     int bufLen;                 // length in bytes of each buffer
//!     int pad1[2];                // 16-byte alignment
//!     irsdk_varBuf varBuf[4];     // buffers
//! } irsdk_header;
//! ```
//!
//! - Header size: 112 bytes (40 bytes of fields, 8 bytes padding, 4 × 16
//!   bytes of buffer descriptors)
//! - All fields are little-endian `i32`
//! - Buffer offsets are relative to the start of the mapping

use crate::{Result, TelemetryError};
use std::mem;
use tracing::trace;

/// Status flag set while the producer is actively publishing telemetry.
pub const STATUS_CONNECTED: i32 = 0x1;

/// Physical number of buffer descriptors in the header.
pub const MAX_TELEMETRY_BUFFERS: usize = 4;

/// Size of [`DataFileHeader`] in bytes; the minimum size of any mapping.
pub const DATA_FILE_HEADER_SIZE: usize = 112;

/// Size of one [`TelemetryBufferHeader`] in bytes.
pub const TELEMETRY_BUFFER_HEADER_SIZE: usize = 16;

/// Byte offsets of the header fields.
pub mod offsets {
    pub const VERSION: usize = 0;
    pub const STATUS: usize = 4;
    pub const TICK_RATE: usize = 8;
    pub const SESSION_INFO_VERSION: usize = 12;
    pub const SESSION_INFO_LENGTH: usize = 16;
    pub const SESSION_INFO_OFFSET: usize = 20;
    pub const VARIABLE_COUNT: usize = 24;
    pub const VARIABLE_HEADER_OFFSET: usize = 28;
    pub const TELEMETRY_BUFFER_COUNT: usize = 32;
    pub const TELEMETRY_BUFFER_ELEMENT_LENGTH: usize = 36;
    pub const TELEMETRY_BUFFERS: usize = 48;

    /// Offset of the tick count of buffer descriptor `index`.
    pub const fn buffer_tick_count(index: usize) -> usize {
        TELEMETRY_BUFFERS + index * super::TELEMETRY_BUFFER_HEADER_SIZE
    }

    /// Offset of the buffer offset of buffer descriptor `index`.
    pub const fn buffer_offset(index: usize) -> usize {
        buffer_tick_count(index) + 4
    }
}

/// Descriptor of one telemetry buffer slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryBufferHeader {
    /// Producer tick at which the slot was last written.
    pub tick_count: i32,
    /// Offset of the slot from the start of the mapping.
    pub buffer_offset: i32,
    /// Padding to 16 bytes.
    pub pad: [i32; 2],
}

impl TelemetryBufferHeader {
    /// Descriptor with the given tick count and offset.
    pub const fn new(tick_count: i32, buffer_offset: i32) -> Self {
        Self { tick_count, buffer_offset, pad: [0; 2] }
    }
}

/// Fixed header at offset 0 of the mapping.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataFileHeader {
    /// Layout version.
    pub version: i32,
    /// Status bitfield, see [`STATUS_CONNECTED`].
    pub status: i32,
    /// Ticks per second.
    pub tick_rate: i32,
    /// Incremented whenever the session info text changes.
    pub session_info_version: i32,
    /// Length in bytes of the session info text.
    pub session_info_length: i32,
    /// Offset of the session info text.
    pub session_info_offset: i32,
    /// Number of variable headers.
    pub variable_count: i32,
    /// Offset of the first variable header.
    pub variable_header_offset: i32,
    /// Number of declared buffer slots (at most four).
    pub telemetry_buffer_count: i32,
    /// Length of each buffer in bytes.
    pub telemetry_buffer_element_length: i32,
    /// Padding for 16-byte alignment.
    pub pad: [i32; 2],
    /// Buffer descriptors; only the first `telemetry_buffer_count` are live.
    pub telemetry_buffers: [TelemetryBufferHeader; MAX_TELEMETRY_BUFFERS],
}

const _: () = assert!(mem::size_of::<DataFileHeader>() == DATA_FILE_HEADER_SIZE);
const _: () = assert!(mem::size_of::<TelemetryBufferHeader>() == TELEMETRY_BUFFER_HEADER_SIZE);
const _: () = assert!(mem::align_of::<DataFileHeader>() == 4);

impl DataFileHeader {
    /// Copies the header out of `memory` by value.
    pub fn read_from(memory: &[u8]) -> Result<Self> {
        if memory.len() < DATA_FILE_HEADER_SIZE {
            return Err(TelemetryError::memory_access_error(0, DATA_FILE_HEADER_SIZE));
        }

        let mut telemetry_buffers = [TelemetryBufferHeader::default(); MAX_TELEMETRY_BUFFERS];
        for (index, slot) in telemetry_buffers.iter_mut().enumerate() {
            *slot = TelemetryBufferHeader::new(
                read_i32(memory, offsets::buffer_tick_count(index))?,
                read_i32(memory, offsets::buffer_offset(index))?,
            );
        }

        let header = Self {
            version: read_i32(memory, offsets::VERSION)?,
            status: read_i32(memory, offsets::STATUS)?,
            tick_rate: read_i32(memory, offsets::TICK_RATE)?,
            session_info_version: read_i32(memory, offsets::SESSION_INFO_VERSION)?,
            session_info_length: read_i32(memory, offsets::SESSION_INFO_LENGTH)?,
            session_info_offset: read_i32(memory, offsets::SESSION_INFO_OFFSET)?,
            variable_count: read_i32(memory, offsets::VARIABLE_COUNT)?,
            variable_header_offset: read_i32(memory, offsets::VARIABLE_HEADER_OFFSET)?,
            telemetry_buffer_count: read_i32(memory, offsets::TELEMETRY_BUFFER_COUNT)?,
            telemetry_buffer_element_length: read_i32(
                memory,
                offsets::TELEMETRY_BUFFER_ELEMENT_LENGTH,
            )?,
            pad: [0; 2],
            telemetry_buffers,
        };

        trace!(
            version = header.version,
            status = header.status,
            buffer_count = header.telemetry_buffer_count,
            "Read data file header"
        );
        Ok(header)
    }

    /// Serialises the header into the first 112 bytes of `memory`.
    pub fn write_to(&self, memory: &mut [u8]) -> Result<()> {
        if memory.len() < DATA_FILE_HEADER_SIZE {
            return Err(TelemetryError::memory_access_error(0, DATA_FILE_HEADER_SIZE));
        }

        let fields = [
            (offsets::VERSION, self.version),
            (offsets::STATUS, self.status),
            (offsets::TICK_RATE, self.tick_rate),
            (offsets::SESSION_INFO_VERSION, self.session_info_version),
            (offsets::SESSION_INFO_LENGTH, self.session_info_length),
            (offsets::SESSION_INFO_OFFSET, self.session_info_offset),
            (offsets::VARIABLE_COUNT, self.variable_count),
            (offsets::VARIABLE_HEADER_OFFSET, self.variable_header_offset),
            (offsets::TELEMETRY_BUFFER_COUNT, self.telemetry_buffer_count),
            (offsets::TELEMETRY_BUFFER_ELEMENT_LENGTH, self.telemetry_buffer_element_length),
        ];
        for (offset, value) in fields {
            memory[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        memory[40..48].fill(0);

        for (index, slot) in self.telemetry_buffers.iter().enumerate() {
            let tick = offsets::buffer_tick_count(index);
            let offset = offsets::buffer_offset(index);
            memory[tick..tick + 4].copy_from_slice(&slot.tick_count.to_le_bytes());
            memory[offset..offset + 4].copy_from_slice(&slot.buffer_offset.to_le_bytes());
            memory[offset + 4..offset + 12].fill(0);
        }
        Ok(())
    }

    /// Reinterprets the start of `memory` as a header in place.
    ///
    /// Unlike [`read_from`](Self::read_from) the returned reference observes
    /// the producer's later writes. Requires 4-byte alignment, which OS
    /// mappings always satisfy.
    pub fn from_memory(memory: &[u8]) -> Result<&Self> {
        if memory.len() < DATA_FILE_HEADER_SIZE {
            return Err(TelemetryError::memory_access_error(0, DATA_FILE_HEADER_SIZE));
        }
        if memory.as_ptr().align_offset(mem::align_of::<Self>()) != 0 {
            return Err(TelemetryError::Parse {
                context: "Header reference".to_string(),
                details: "mapped memory is not 4-byte aligned".to_string(),
            });
        }

        // SAFETY: length and alignment are checked above, every bit pattern
        // is a valid DataFileHeader, and the borrow is tied to `memory`.
        Ok(unsafe { &*(memory.as_ptr() as *const Self) })
    }

    /// True while the producer reports it is publishing.
    pub fn is_connected(&self) -> bool {
        (self.status & STATUS_CONNECTED) != 0
    }

    /// True when the session info text changed since `last_version`.
    pub fn session_info_changed(&self, last_version: i32) -> bool {
        self.session_info_version != last_version
    }

    /// Declared buffer count clamped to the physical slot count.
    pub fn declared_buffer_count(&self) -> usize {
        usize::try_from(self.telemetry_buffer_count).unwrap_or(0).min(MAX_TELEMETRY_BUFFERS)
    }

    /// Descriptors of the declared buffer slots only.
    pub fn telemetry_buffer_headers(&self) -> &[TelemetryBufferHeader] {
        &self.telemetry_buffers[..self.declared_buffer_count()]
    }

    /// Checks the version against `expected`.
    pub fn validate_version(&self, expected: i32) -> Result<()> {
        if self.version != expected {
            return Err(TelemetryError::Version { expected, found: self.version });
        }
        Ok(())
    }
}

/// Reads a little-endian `i32` with bounds checking.
pub(crate) fn read_i32(data: &[u8], offset: usize) -> Result<i32> {
    let bytes = offset
        .checked_add(4)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| TelemetryError::memory_access_error(offset, 4))?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Re-reads a little-endian `i32` straight from memory the producer may be
/// writing, so the load is not folded into an earlier read.
pub(crate) fn read_i32_volatile(data: &[u8], offset: usize) -> Result<i32> {
    let bytes = offset
        .checked_add(4)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| TelemetryError::memory_access_error(offset, 4))?;
    // SAFETY: `bytes` is exactly four readable bytes and [u8; 4] has
    // alignment 1.
    let raw = unsafe { std::ptr::read_volatile(bytes.as_ptr() as *const [u8; 4]) };
    Ok(i32::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_header() -> DataFileHeader {
        DataFileHeader {
            version: 2,
            status: STATUS_CONNECTED,
            tick_rate: 60,
            session_info_version: 7,
            session_info_length: 1024,
            session_info_offset: 112,
            variable_count: 3,
            variable_header_offset: 2048,
            telemetry_buffer_count: 3,
            telemetry_buffer_element_length: 256,
            pad: [0; 2],
            telemetry_buffers: [
                TelemetryBufferHeader::new(10, 4096),
                TelemetryBufferHeader::new(11, 4352),
                TelemetryBufferHeader::new(12, 4608),
                TelemetryBufferHeader::new(13, 4864),
            ],
        }
    }

    #[test]
    fn header_layout_matches_sdk() {
        assert_eq!(mem::size_of::<DataFileHeader>(), 112);
        assert_eq!(mem::size_of::<TelemetryBufferHeader>(), 16);
        assert_eq!(offsets::buffer_tick_count(3), 96);
        assert_eq!(offsets::buffer_offset(1), 68);
    }

    #[test]
    fn fields_live_at_documented_offsets() {
        let mut memory = vec![0u8; DATA_FILE_HEADER_SIZE];
        sample_header().write_to(&mut memory).expect("write");

        assert_eq!(read_i32(&memory, 0).expect("version"), 2);
        assert_eq!(read_i32(&memory, 8).expect("tick rate"), 60);
        assert_eq!(read_i32(&memory, 32).expect("buffer count"), 3);
        assert_eq!(read_i32(&memory, 36).expect("element length"), 256);
        assert_eq!(read_i32(&memory, 48 + 16 * 2).expect("tick 2"), 12);
        assert_eq!(read_i32(&memory, 48 + 16 * 3 + 4).expect("offset 3"), 4864);
    }

    #[test]
    fn declared_slots_are_clamped() {
        let mut header = sample_header();
        header.telemetry_buffer_count = 9;
        assert_eq!(header.telemetry_buffer_headers().len(), 4);
        header.telemetry_buffer_count = -1;
        assert!(header.telemetry_buffer_headers().is_empty());
    }

    #[test]
    fn short_memory_is_rejected() {
        let memory = vec![0u8; DATA_FILE_HEADER_SIZE - 1];
        assert!(DataFileHeader::read_from(&memory).is_err());
        assert!(DataFileHeader::from_memory(&memory).is_err());
    }

    #[test]
    fn version_validation() {
        let header = sample_header();
        assert!(header.validate_version(2).is_ok());
        let err = header.validate_version(3).expect_err("mismatch");
        assert!(matches!(err, TelemetryError::Version { expected: 3, found: 2 }));
    }

    prop_compose! {
        fn arb_header()(
            fields in prop::array::uniform10(any::<i32>()),
            ticks in prop::array::uniform4(any::<i32>()),
            buffer_offsets in prop::array::uniform4(any::<i32>()),
        ) -> DataFileHeader {
            let mut telemetry_buffers = [TelemetryBufferHeader::default(); MAX_TELEMETRY_BUFFERS];
            for (i, slot) in telemetry_buffers.iter_mut().enumerate() {
                *slot = TelemetryBufferHeader::new(ticks[i], buffer_offsets[i]);
            }
            DataFileHeader {
                version: fields[0],
                status: fields[1],
                tick_rate: fields[2],
                session_info_version: fields[3],
                session_info_length: fields[4],
                session_info_offset: fields[5],
                variable_count: fields[6],
                variable_header_offset: fields[7],
                telemetry_buffer_count: fields[8],
                telemetry_buffer_element_length: fields[9],
                pad: [0; 2],
                telemetry_buffers,
            }
        }
    }

    proptest! {
        #[test]
        fn written_fields_read_back_identically(header in arb_header()) {
            let mut memory = vec![0xEEu8; DATA_FILE_HEADER_SIZE + 8];
            header.write_to(&mut memory).expect("write");
            let parsed = DataFileHeader::read_from(&memory).expect("read");
            prop_assert_eq!(parsed, header);
        }
    }
}
