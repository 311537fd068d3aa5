//! Reader over a borrowed byte span.

use tracing::{trace, warn};

use super::buffer::{TelemetryBufferRead, select_active_buffer};
use crate::memory::DataSpanHandle;
use crate::schema::header::{offsets, read_i32_volatile};
use crate::schema::variables::parse_variable_headers;
use crate::schema::{
    DATA_FILE_HEADER_SIZE, DataFileHeader, DataVariableHeader, TelemetryBufferHeader,
};
use crate::{Result, TelemetryError};

/// Reads the producer's layout from bytes whose lifetime the caller
/// guarantees for the duration of the borrow.
///
/// The reader never blocks and never retries. A copy can race the external
/// writer; [`read_active_telemetry_buffer_checked`] reports the slot's tick
/// count before and after the copy so callers can detect that.
///
/// [`read_active_telemetry_buffer_checked`]: Self::read_active_telemetry_buffer_checked
#[derive(Debug, Clone, Copy)]
pub struct SpanDataReader<'a> {
    bytes: &'a [u8],
}

impl<'a> SpanDataReader<'a> {
    /// Creates a reader. Fails when `bytes` cannot hold a header.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < DATA_FILE_HEADER_SIZE {
            return Err(TelemetryError::invalid_argument(
                "bytes",
                format!(
                    "span of {} bytes is shorter than the {}-byte header",
                    bytes.len(),
                    DATA_FILE_HEADER_SIZE
                ),
            ));
        }
        Ok(Self { bytes })
    }

    /// Creates a reader over a live span lease.
    pub fn from_span_handle(handle: &'a DataSpanHandle) -> Result<Self> {
        Self::new(handle.span()?)
    }

    /// The underlying bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Copies the header by value.
    pub fn read_header(&self) -> Result<DataFileHeader> {
        DataFileHeader::read_from(self.bytes)
    }

    /// Borrows the header in place; fields reflect the producer's later
    /// writes.
    pub fn header_ref(&self) -> Result<&'a DataFileHeader> {
        DataFileHeader::from_memory(self.bytes)
    }

    /// Live status field, read straight from the mapping.
    pub fn simulator_status(&self) -> Result<i32> {
        read_i32_volatile(self.bytes, offsets::STATUS)
    }

    /// Raw session info bytes, cut at the first NUL within the declared
    /// length. Empty when the producer has not published any.
    pub fn session_info_span(&self) -> Result<&'a [u8]> {
        let header = self.read_header()?;
        self.session_info_span_for(&header)
    }

    fn session_info_span_for(&self, header: &DataFileHeader) -> Result<&'a [u8]> {
        let Ok(length) = usize::try_from(header.session_info_length) else {
            return Ok(&[]);
        };
        if length == 0 {
            return Ok(&[]);
        }
        let offset = usize::try_from(header.session_info_offset)
            .map_err(|_| TelemetryError::memory_access_error(0, length))?;
        let span = self.slice(offset, length)?;

        let end = span.iter().position(|&b| b == 0).unwrap_or(span.len());
        Ok(&span[..end])
    }

    /// Session info text and the version it was published under.
    ///
    /// The producer writes ISO-8859-1, so each byte maps to one `char`.
    pub fn read_session_info_string(&self) -> Result<(String, i32)> {
        let header = self.read_header()?;
        let span = self.session_info_span_for(&header)?;
        let text = span.iter().map(|&b| char::from(b)).collect();
        Ok((text, header.session_info_version))
    }

    /// All variable header records.
    pub fn read_telemetry_variable_headers(&self) -> Result<Vec<DataVariableHeader>> {
        let header = self.read_header()?;
        parse_variable_headers(self.bytes, header.variable_header_offset, header.variable_count)
    }

    /// Index and descriptor of the active buffer slot.
    pub fn active_telemetry_buffer_header(&self) -> Result<(usize, TelemetryBufferHeader)> {
        let header = self.read_header()?;
        select_active_buffer(&header).ok_or_else(|| {
            TelemetryError::buffer_operation_error("header declares no telemetry buffers", None)
        })
    }

    /// Copies the active buffer into a new allocation.
    pub fn read_active_telemetry_buffer(&self) -> Result<Vec<u8>> {
        let header = self.read_header()?;
        let length = element_length(&header)?;
        let mut buffer = vec![0u8; length];
        self.copy_active(&header, &mut buffer)?;
        Ok(buffer)
    }

    /// Copies the active buffer into the front of `destination`.
    pub fn read_active_telemetry_buffer_into(
        &self,
        destination: &mut [u8],
    ) -> Result<TelemetryBufferHeader> {
        let header = self.read_header()?;
        let (_, slot, _) = self.copy_active(&header, destination)?;
        Ok(slot)
    }

    /// Copies the active buffer and re-reads the slot's tick count afterwards.
    pub fn read_active_telemetry_buffer_checked(
        &self,
        destination: &mut [u8],
    ) -> Result<TelemetryBufferRead> {
        let header = self.read_header()?;
        let (buffer_index, slot, length) = self.copy_active(&header, destination)?;
        let tick_count_after_read =
            read_i32_volatile(self.bytes, offsets::buffer_tick_count(buffer_index))?;

        Ok(TelemetryBufferRead {
            buffer_index,
            tick_count: slot.tick_count,
            tick_count_after_read,
            length,
        })
    }

    /// Repeats [`read_active_telemetry_buffer_checked`] until a copy is
    /// consistent, giving up after `max_attempts`.
    ///
    /// [`read_active_telemetry_buffer_checked`]: Self::read_active_telemetry_buffer_checked
    pub fn read_consistent_telemetry_buffer(
        &self,
        destination: &mut [u8],
        max_attempts: usize,
    ) -> Result<Option<TelemetryBufferRead>> {
        for attempt in 1..=max_attempts {
            let read = self.read_active_telemetry_buffer_checked(destination)?;
            if read.is_consistent() {
                return Ok(Some(read));
            }
            trace!(
                attempt,
                before = read.tick_count,
                after = read.tick_count_after_read,
                "Buffer rewritten during copy"
            );
        }

        warn!(max_attempts, "No consistent telemetry buffer copy");
        Ok(None)
    }

    fn copy_active(
        &self,
        header: &DataFileHeader,
        destination: &mut [u8],
    ) -> Result<(usize, TelemetryBufferHeader, usize)> {
        let length = element_length(header)?;
        if destination.len() < length {
            return Err(TelemetryError::invalid_argument(
                "destination",
                format!("needs {} bytes, has {}", length, destination.len()),
            ));
        }

        let (index, slot) = select_active_buffer(header).ok_or_else(|| {
            TelemetryError::buffer_operation_error("header declares no telemetry buffers", None)
        })?;
        let offset = usize::try_from(slot.buffer_offset).map_err(|_| {
            TelemetryError::buffer_operation_error(
                format!("negative buffer offset {}", slot.buffer_offset),
                Some(index),
            )
        })?;

        destination[..length].copy_from_slice(self.slice(offset, length)?);
        trace!(buffer_index = index, tick_count = slot.tick_count, length, "Copied active buffer");
        Ok((index, slot, length))
    }

    fn slice(&self, offset: usize, length: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(length)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| TelemetryError::memory_access_error(offset, length))
    }
}

fn element_length(header: &DataFileHeader) -> Result<usize> {
    usize::try_from(header.telemetry_buffer_element_length).map_err(|_| TelemetryError::Parse {
        context: "Telemetry buffer".to_string(),
        details: format!(
            "negative buffer element length {}",
            header.telemetry_buffer_element_length
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ConnectionDataFile, DataSpanPool, HeapRegion, MappedRegion};
    use crate::schema::STATUS_CONNECTED;
    use crate::{VariableType, schema::DATA_VARIABLE_HEADER_SIZE};
    use std::sync::Arc;

    const BUFFER_LEN: usize = 16;
    const SESSION_OFFSET: usize = 112;
    const VARIABLES_OFFSET: usize = 256;
    const BUFFERS_OFFSET: usize = 512;

    fn layout(ticks: [i32; 4], declared: i32, session: &[u8]) -> Vec<u8> {
        let mut memory = vec![0u8; BUFFERS_OFFSET + 4 * BUFFER_LEN];
        let mut header = DataFileHeader {
            version: 2,
            status: STATUS_CONNECTED,
            tick_rate: 60,
            session_info_version: 3,
            session_info_length: session.len() as i32,
            session_info_offset: SESSION_OFFSET as i32,
            variable_count: 1,
            variable_header_offset: VARIABLES_OFFSET as i32,
            telemetry_buffer_count: declared,
            telemetry_buffer_element_length: BUFFER_LEN as i32,
            ..Default::default()
        };
        for (index, tick) in ticks.into_iter().enumerate() {
            let offset = BUFFERS_OFFSET + index * BUFFER_LEN;
            header.telemetry_buffers[index] = TelemetryBufferHeader::new(tick, offset as i32);
            memory[offset..offset + BUFFER_LEN].fill(index as u8 + 1);
        }
        header.write_to(&mut memory).expect("header");
        memory[SESSION_OFFSET..SESSION_OFFSET + session.len()].copy_from_slice(session);

        DataVariableHeader {
            type_tag: VariableType::Int32.tag(),
            offset: 0,
            count: 1,
            count_as_time: false,
            name: "SessionTick".to_string(),
            description: "Current tick".to_string(),
            unit: String::new(),
        }
        .write_to(&mut memory[VARIABLES_OFFSET..VARIABLES_OFFSET + DATA_VARIABLE_HEADER_SIZE])
        .expect("variable");
        memory
    }

    #[test]
    fn short_spans_are_rejected() {
        let bytes = [0u8; 111];
        let err = SpanDataReader::new(&bytes).expect_err("too short");
        assert!(matches!(err, TelemetryError::InvalidArgument { argument: "bytes", .. }));
    }

    #[test]
    fn copies_the_declared_buffer_with_highest_tick() {
        let memory = layout([5, 9, 7, 100], 3, b"");
        let reader = SpanDataReader::new(&memory).expect("reader");

        let (index, slot) = reader.active_telemetry_buffer_header().expect("active");
        assert_eq!((index, slot.tick_count), (1, 9));
        assert_eq!(reader.read_active_telemetry_buffer().expect("copy"), vec![2u8; BUFFER_LEN]);
    }

    #[test]
    fn destination_must_fit_the_buffer() {
        let memory = layout([1, 0, 0, 0], 1, b"");
        let reader = SpanDataReader::new(&memory).expect("reader");

        let mut short = [0u8; BUFFER_LEN - 1];
        let err = reader.read_active_telemetry_buffer_into(&mut short).expect_err("short");
        assert!(matches!(err, TelemetryError::InvalidArgument { argument: "destination", .. }));

        let mut roomy = [0xEEu8; BUFFER_LEN + 4];
        let slot = reader.read_active_telemetry_buffer_into(&mut roomy).expect("copy");
        assert_eq!(slot.tick_count, 1);
        assert_eq!(&roomy[..BUFFER_LEN], &[1u8; BUFFER_LEN]);
        assert_eq!(&roomy[BUFFER_LEN..], &[0xEE; 4]);
    }

    #[test]
    fn zero_declared_buffers_is_a_buffer_error() {
        let memory = layout([1, 2, 3, 4], 0, b"");
        let reader = SpanDataReader::new(&memory).expect("reader");
        assert!(matches!(
            reader.read_active_telemetry_buffer(),
            Err(TelemetryError::Buffer { buffer_index: None, .. })
        ));
    }

    #[test]
    fn buffer_outside_the_span_is_a_memory_error() {
        let mut memory = layout([1, 0, 0, 0], 1, b"");
        let mut header = DataFileHeader::read_from(&memory).expect("header");
        header.telemetry_buffers[0].buffer_offset = (memory.len() - 4) as i32;
        header.write_to(&mut memory).expect("rewrite");

        let reader = SpanDataReader::new(&memory).expect("reader");
        assert!(matches!(
            reader.read_active_telemetry_buffer(),
            Err(TelemetryError::Memory { .. })
        ));
    }

    #[test]
    fn checked_read_reports_stable_tick() {
        let memory = layout([42, 0, 0, 0], 1, b"");
        let reader = SpanDataReader::new(&memory).expect("reader");

        let mut dest = [0u8; BUFFER_LEN];
        let read = reader.read_active_telemetry_buffer_checked(&mut dest).expect("copy");
        assert_eq!(read.buffer_index, 0);
        assert_eq!(read.length, BUFFER_LEN);
        assert!(read.is_consistent());

        let consistent = reader.read_consistent_telemetry_buffer(&mut dest, 3).expect("copy");
        assert_eq!(consistent, Some(read));
        assert_eq!(reader.read_consistent_telemetry_buffer(&mut dest, 0).expect("none"), None);
    }

    #[test]
    fn session_info_is_latin1_and_stops_at_nul() {
        let memory = layout([0; 4], 1, b"Driver: J\xfcrgen\n\0garbage");
        let reader = SpanDataReader::new(&memory).expect("reader");

        let (text, version) = reader.read_session_info_string().expect("session");
        assert_eq!(text, "Driver: J\u{fc}rgen\n");
        assert_eq!(version, 3);
        assert_eq!(reader.session_info_span().expect("span"), b"Driver: J\xfcrgen\n");
    }

    #[test]
    fn missing_session_info_is_empty() {
        let memory = layout([0; 4], 1, b"");
        let reader = SpanDataReader::new(&memory).expect("reader");
        assert_eq!(reader.read_session_info_string().expect("session").0, "");
    }

    #[test]
    fn variable_headers_are_parsed() {
        let memory = layout([0; 4], 1, b"");
        let reader = SpanDataReader::new(&memory).expect("reader");

        let variables = reader.read_telemetry_variable_headers().expect("variables");
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].name, "SessionTick");
        assert_eq!(variables[0].variable_type(), Some(VariableType::Int32));
    }

    #[test]
    fn header_reference_tracks_live_writes() {
        let heap = Arc::new(HeapRegion::zeroed(BUFFERS_OFFSET + 4 * BUFFER_LEN));
        heap.write(0, &layout([7, 0, 0, 0], 1, b"")).expect("seed");
        let data_file = ConnectionDataFile::new(MappedRegion::new("span-test", heap.clone()));
        let pool = DataSpanPool::new(&data_file).expect("pool");
        let lease = pool.rent().expect("lease");

        let reader = SpanDataReader::from_span_handle(&lease).expect("reader");
        let header = reader.header_ref().expect("aligned");
        assert_eq!(header.telemetry_buffers[0].tick_count, 7);
        assert_eq!(reader.simulator_status().expect("status"), STATUS_CONNECTED);

        heap.write(offsets::STATUS, &0i32.to_le_bytes()).expect("status");
        assert_eq!(reader.simulator_status().expect("status"), 0);
    }
}
