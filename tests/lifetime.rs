//! Drain-before-free behaviour of the memory layer, seen from outside the
//! crate.

use std::sync::Arc;
use std::thread;

use simlink::simulation::MemoryBuilder;
use simlink::{
    ConnectionDataFile, DataMemoryPool, DataReader, DataSpanPool, MappedRegion, SpanDataReader,
    TelemetryError,
};

fn data_file() -> Arc<ConnectionDataFile> {
    let memory = MemoryBuilder::new().build().expect("memory");
    ConnectionDataFile::new(MappedRegion::new("lifetime", memory))
}

#[test]
fn mapping_outlives_close_until_every_lease_returns() {
    let file = data_file();
    let memory_pool = DataMemoryPool::new(&file).expect("memory pool");
    let span_pool = DataSpanPool::new(&file).expect("span pool");

    let readers: Vec<_> = (0..8)
        .map(|_| DataReader::new(memory_pool.rent().expect("lease")).expect("reader"))
        .collect();
    let span = span_pool.rent().expect("span");

    memory_pool.close();
    span_pool.close();
    file.close();
    assert!(matches!(memory_pool.rent(), Err(TelemetryError::InvalidOperation { .. })));
    assert!(matches!(file.acquire_lifetime_handle(), Err(TelemetryError::InvalidOperation { .. })));

    let workers: Vec<_> = readers
        .into_iter()
        .map(|reader| thread::spawn(move || reader.read_header().map(|h| h.version)))
        .collect();
    for worker in workers {
        assert_eq!(worker.join().expect("reader thread").expect("header"), 2);
    }
    assert!(memory_pool.is_disposed());
    assert!(!file.is_disposed());

    let reader = SpanDataReader::from_span_handle(&span).expect("span reader");
    assert_eq!(reader.read_header().expect("header").tick_rate, 60);
    drop(span);

    assert!(span_pool.is_disposed());
    assert!(file.is_disposed());
    assert!(matches!(file.acquire_lifetime_handle(), Err(TelemetryError::Disposed { .. })));
}

#[test]
fn recorded_dump_can_be_mapped_from_disk() {
    use std::io::Write;

    let bytes = MemoryBuilder::new().with_buffer_count(2).build_bytes().expect("bytes");
    let mut dump = tempfile::NamedTempFile::new().expect("temp file");
    dump.write_all(&bytes).expect("write");
    dump.flush().expect("flush");

    let region = MappedRegion::open_file(dump.path()).expect("map");
    let file = ConnectionDataFile::new(region);
    let pool = DataMemoryPool::new(&file).expect("pool");
    let reader = DataReader::new(pool.rent().expect("lease")).expect("reader");

    let header = reader.read_header().expect("header");
    assert_eq!(header.telemetry_buffer_count, 2);
    assert_eq!(reader.header_ref().expect("aligned").version, 2);
}
