//! Reader that owns its lease.

use std::fmt;

use super::buffer::TelemetryBufferRead;
use super::span::SpanDataReader;
use crate::memory::DataHandle;
use crate::schema::{
    DATA_FILE_HEADER_SIZE, DataFileHeader, DataVariableHeader, TelemetryBufferHeader,
};
use crate::{Result, TelemetryError};

/// Owns a [`DataHandle`] and reads through it.
///
/// Unlike [`SpanDataReader`] this can be stored, moved between threads and
/// kept across awaits. Disposing the reader returns the lease; every method
/// fails with [`TelemetryError::Disposed`] afterwards.
pub struct DataReader {
    handle: DataHandle,
}

impl DataReader {
    /// Takes ownership of `handle`. Fails when the lease is already returned
    /// or the mapping cannot hold a header.
    pub fn new(handle: DataHandle) -> Result<Self> {
        let len = handle.len()?;
        if len < DATA_FILE_HEADER_SIZE {
            return Err(TelemetryError::invalid_argument(
                "handle",
                format!("mapping of {} bytes cannot hold a header", len),
            ));
        }
        Ok(Self { handle })
    }

    /// Borrowing reader over the same bytes.
    pub fn view(&self) -> Result<SpanDataReader<'_>> {
        self.handle
            .bytes()
            .map_err(|_| TelemetryError::disposed("DataReader"))
            .and_then(SpanDataReader::new)
    }

    /// The underlying lease.
    pub fn handle(&self) -> &DataHandle {
        &self.handle
    }

    /// Copies the header out by value.
    pub fn read_header(&self) -> Result<DataFileHeader> {
        self.view()?.read_header()
    }

    /// The header in place, observing the producer's later writes.
    pub fn header_ref(&self) -> Result<&DataFileHeader> {
        self.view()?.header_ref()
    }

    /// Live status field of the header.
    pub fn simulator_status(&self) -> Result<i32> {
        self.view()?.simulator_status()
    }

    /// Session info text (Latin-1) and its version.
    pub fn read_session_info_string(&self) -> Result<(String, i32)> {
        self.view()?.read_session_info_string()
    }

    /// Raw session info bytes up to the first NUL.
    pub fn session_info_span(&self) -> Result<&[u8]> {
        self.view()?.session_info_span()
    }

    /// All declared variable headers.
    pub fn read_telemetry_variable_headers(&self) -> Result<Vec<DataVariableHeader>> {
        self.view()?.read_telemetry_variable_headers()
    }

    /// Index and descriptor of the active buffer slot.
    pub fn active_telemetry_buffer_header(&self) -> Result<(usize, TelemetryBufferHeader)> {
        self.view()?.active_telemetry_buffer_header()
    }

    /// Copies the active buffer into a new vector.
    pub fn read_active_telemetry_buffer(&self) -> Result<Vec<u8>> {
        self.view()?.read_active_telemetry_buffer()
    }

    /// Copies the active buffer into `destination`.
    pub fn read_active_telemetry_buffer_into(
        &self,
        destination: &mut [u8],
    ) -> Result<TelemetryBufferHeader> {
        self.view()?.read_active_telemetry_buffer_into(destination)
    }

    /// Copies the active buffer and re-reads its tick count afterwards.
    pub fn read_active_telemetry_buffer_checked(
        &self,
        destination: &mut [u8],
    ) -> Result<TelemetryBufferRead> {
        self.view()?.read_active_telemetry_buffer_checked(destination)
    }

    /// Retries the checked copy until the tick count is stable.
    pub fn read_consistent_telemetry_buffer(
        &self,
        destination: &mut [u8],
        max_attempts: usize,
    ) -> Result<Option<TelemetryBufferRead>> {
        self.view()?.read_consistent_telemetry_buffer(destination, max_attempts)
    }

    /// True once the lease has been returned.
    pub fn is_disposed(&self) -> bool {
        self.handle.is_disposed()
    }

    /// Returns the lease. Repeated calls are no-ops.
    pub fn dispose(&mut self) {
        self.handle.dispose();
    }
}

impl fmt::Debug for DataReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataReader").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ConnectionDataFile, DataMemoryPool, HeapRegion, MappedRegion};
    use crate::schema::TelemetryBufferHeader;
    use std::sync::Arc;

    fn pool_over(len: usize) -> (Arc<HeapRegion>, Arc<ConnectionDataFile>, Arc<DataMemoryPool>) {
        let heap = Arc::new(HeapRegion::zeroed(len));
        let file = ConnectionDataFile::new(MappedRegion::new("reader-test", Arc::clone(&heap)));
        let pool = DataMemoryPool::new(&file).expect("pool");
        (heap, file, pool)
    }

    #[test]
    fn rejects_mappings_smaller_than_a_header() {
        let (_heap, _file, pool) = pool_over(64);
        let err = DataReader::new(pool.rent().expect("lease")).expect_err("too small");
        assert!(matches!(err, TelemetryError::InvalidArgument { argument: "handle", .. }));
        assert_eq!(pool.active_leases(), 0);
    }

    #[test]
    fn reads_through_the_lease() {
        let (heap, _file, pool) = pool_over(256);
        let mut header = DataFileHeader {
            version: 2,
            telemetry_buffer_count: 1,
            telemetry_buffer_element_length: 4,
            ..Default::default()
        };
        header.telemetry_buffers[0] = TelemetryBufferHeader::new(97147, 200);
        let mut bytes = heap.snapshot();
        header.write_to(&mut bytes).expect("header");
        bytes[200..204].copy_from_slice(&[0xAD; 4]);
        heap.write(0, &bytes).expect("seed");

        let reader = DataReader::new(pool.rent().expect("lease")).expect("reader");
        assert_eq!(reader.read_header().expect("header").telemetry_buffers[0].tick_count, 97147);
        assert_eq!(reader.read_active_telemetry_buffer().expect("copy"), vec![0xAD; 4]);
    }

    #[test]
    fn dispose_returns_the_lease_once() {
        let (_heap, file, pool) = pool_over(256);
        let mut reader = DataReader::new(pool.rent().expect("lease")).expect("reader");
        pool.close();
        file.close();
        assert!(!file.is_disposed());

        reader.dispose();
        reader.dispose();
        assert!(reader.is_disposed());
        assert!(pool.is_disposed());
        assert!(file.is_disposed());
        assert!(matches!(
            reader.read_header(),
            Err(TelemetryError::Disposed { object: "DataReader" })
        ));
    }

    #[test]
    fn readers_move_across_threads() {
        let (_heap, _file, pool) = pool_over(256);
        let reader = DataReader::new(pool.rent().expect("lease")).expect("reader");
        let version = std::thread::spawn(move || reader.read_header().map(|h| h.version))
            .join()
            .expect("thread");
        assert_eq!(version.expect("header"), 0);
        assert_eq!(pool.active_leases(), 0);
    }
}
