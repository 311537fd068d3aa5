//! In-process stand-in for the simulator.
//!
//! [`MemoryBuilder`] lays out a region exactly the way the producer does and
//! [`SimulatedProducer`] writes into it from the "outside", signalling an
//! auto-reset event after each publish. The producer implements
//! [`DataSource`], so a [`Connection`](crate::Connection) runs against it
//! unchanged on any platform.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use simlink::simulation::{MemoryBuilder, SimulatedProducer};
//! use simlink::{Connection, ConnectionOptions, SystemClock};
//!
//! # fn main() -> simlink::Result<()> {
//! let producer = SimulatedProducer::new(&MemoryBuilder::new().with_buffer_len(8))?;
//! producer.start()?;
//!
//! let options = ConnectionOptions::default();
//! let connection = Connection::with_source(options, producer.clone(), Arc::new(SystemClock))?;
//! connection.open(Duration::from_secs(1))?;
//!
//! producer.publish(0, 1, &[7; 8])?;
//! let reader = connection.create_data_reader()?;
//! assert_eq!(reader.read_active_telemetry_buffer()?, vec![7; 8]);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::connection::{DataReadyEvent, DataSource, WaitResult};
use crate::memory::{HeapRegion, MappedRegion};
use crate::schema::header::offsets;
use crate::schema::{
    DATA_FILE_HEADER_SIZE, DATA_VARIABLE_HEADER_SIZE, DataFileHeader, DataVariableHeader,
    MAX_TELEMETRY_BUFFERS, STATUS_CONNECTED, TelemetryBufferHeader,
};
use crate::{Result, TelemetryError};

const ALIGNMENT: usize = 16;

/// Byte positions of every section in a built region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    pub session_info_offset: usize,
    pub session_info_capacity: usize,
    pub variable_header_offset: usize,
    pub variable_count: usize,
    pub buffer_offsets: [usize; MAX_TELEMETRY_BUFFERS],
    pub buffer_len: usize,
    pub total_len: usize,
}

/// Builds a region in the producer's layout.
///
/// All four physical buffer slots are always allocated; `buffer_count` only
/// sets the declared count in the header.
#[derive(Debug, Clone)]
pub struct MemoryBuilder {
    version: i32,
    status: i32,
    tick_rate: i32,
    buffer_count: i32,
    buffer_len: usize,
    session_info_capacity: usize,
    variables: Vec<DataVariableHeader>,
}

impl Default for MemoryBuilder {
    fn default() -> Self {
        Self {
            version: 2,
            status: STATUS_CONNECTED,
            tick_rate: 60,
            buffer_count: MAX_TELEMETRY_BUFFERS as i32,
            buffer_len: 64,
            session_info_capacity: 1024,
            variables: Vec::new(),
        }
    }
}

impl MemoryBuilder {
    /// Builder with the defaults of a live producer.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    pub fn with_tick_rate(mut self, tick_rate: i32) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Declared buffer count written to the header.
    pub fn with_buffer_count(mut self, count: i32) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn with_buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = len;
        self
    }

    pub fn with_session_info_capacity(mut self, capacity: usize) -> Self {
        self.session_info_capacity = capacity;
        self
    }

    pub fn with_variable(mut self, variable: DataVariableHeader) -> Self {
        self.variables.push(variable);
        self
    }

    /// Offsets of every region the builder writes.
    pub fn layout(&self) -> MemoryLayout {
        let session_info_offset = DATA_FILE_HEADER_SIZE;
        let variable_header_offset =
            (session_info_offset + self.session_info_capacity).next_multiple_of(ALIGNMENT);
        let variables_end =
            variable_header_offset + self.variables.len() * DATA_VARIABLE_HEADER_SIZE;

        let stride = self.buffer_len.next_multiple_of(ALIGNMENT).max(ALIGNMENT);
        let first_buffer = variables_end.next_multiple_of(ALIGNMENT);
        let buffer_offsets = std::array::from_fn(|index| first_buffer + index * stride);

        MemoryLayout {
            session_info_offset,
            session_info_capacity: self.session_info_capacity,
            variable_header_offset,
            variable_count: self.variables.len(),
            buffer_offsets,
            buffer_len: self.buffer_len,
            total_len: first_buffer + MAX_TELEMETRY_BUFFERS * stride,
        }
    }

    /// Header describing the built region, with every tick count at zero.
    pub fn header(&self) -> Result<DataFileHeader> {
        let layout = self.layout();
        let mut header = DataFileHeader {
            version: self.version,
            status: self.status,
            tick_rate: self.tick_rate,
            session_info_version: 0,
            session_info_length: 0,
            session_info_offset: to_i32("session_info_offset", layout.session_info_offset)?,
            variable_count: to_i32("variable_count", layout.variable_count)?,
            variable_header_offset: to_i32(
                "variable_header_offset",
                layout.variable_header_offset,
            )?,
            telemetry_buffer_count: self.buffer_count,
            telemetry_buffer_element_length: to_i32("buffer_len", layout.buffer_len)?,
            ..Default::default()
        };
        for (slot, offset) in header.telemetry_buffers.iter_mut().zip(layout.buffer_offsets) {
            *slot = TelemetryBufferHeader::new(0, to_i32("buffer_offset", offset)?);
        }
        Ok(header)
    }

    /// Writes header and variable table into `memory`.
    pub fn write_into(&self, memory: &mut [u8]) -> Result<()> {
        let layout = self.layout();
        if memory.len() < layout.total_len {
            return Err(TelemetryError::memory_access_error(0, layout.total_len));
        }

        self.header()?.write_to(memory)?;
        for (index, variable) in self.variables.iter().enumerate() {
            let start = layout.variable_header_offset + index * DATA_VARIABLE_HEADER_SIZE;
            variable.write_to(&mut memory[start..start + DATA_VARIABLE_HEADER_SIZE])?;
        }
        Ok(())
    }

    /// Builds a byte vector holding the layout.
    pub fn build_bytes(&self) -> Result<Vec<u8>> {
        let mut memory = vec![0u8; self.layout().total_len];
        self.write_into(&mut memory)?;
        Ok(memory)
    }

    /// Builds an aligned heap region holding the layout.
    pub fn build(&self) -> Result<Arc<HeapRegion>> {
        let bytes = self.build_bytes()?;
        let region = Arc::new(HeapRegion::zeroed(bytes.len()));
        region.write(0, &bytes)?;
        Ok(region)
    }
}

fn to_i32(field: &'static str, value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| TelemetryError::invalid_argument(field, format!("{} exceeds i32", value)))
}

/// Auto-reset event shared by the producer and every worker reading it.
#[derive(Default)]
struct AutoResetEvent {
    signaled: Mutex<bool>,
    changed: Condvar,
}

impl AutoResetEvent {
    fn set(&self) {
        *self.signaled.lock() = true;
        self.changed.notify_one();
    }

    fn wait(&self, timeout: Duration) -> WaitResult {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.changed.wait_for(&mut signaled, timeout);
        }
        if std::mem::replace(&mut *signaled, false) {
            WaitResult::Signaled
        } else {
            WaitResult::Timeout
        }
    }
}

struct SimulatedEvent {
    event: Arc<AutoResetEvent>,
}

impl DataReadyEvent for SimulatedEvent {
    fn wait(&mut self, timeout: Duration) -> Result<WaitResult> {
        Ok(self.event.wait(timeout))
    }
}

/// A producer living in this process.
///
/// Starts stopped; [`open_region`](DataSource::open_region) returns `None`
/// until [`start`](Self::start).
pub struct SimulatedProducer {
    name: String,
    layout: MemoryLayout,
    memory: Arc<HeapRegion>,
    running: AtomicBool,
    event: Arc<AutoResetEvent>,
}

impl SimulatedProducer {
    /// Builds the memory; the producer starts stopped.
    pub fn new(builder: &MemoryBuilder) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            name: "simulated".to_string(),
            layout: builder.layout(),
            memory: builder.build()?,
            running: AtomicBool::new(false),
            event: Arc::new(AutoResetEvent::default()),
        }))
    }

    /// Offsets of the simulated memory.
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// The region as the producer sees it.
    pub fn memory(&self) -> &Arc<HeapRegion> {
        &self.memory
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Makes the region visible and sets the connected status bit.
    pub fn start(&self) -> Result<()> {
        self.set_status(STATUS_CONNECTED)?;
        self.running.store(true, Ordering::Release);
        debug!(producer = %self.name, "Simulated producer started");
        Ok(())
    }

    /// Hides the region from new connections and clears the status field.
    /// Existing mappings stay readable.
    pub fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        self.set_status(0)?;
        debug!(producer = %self.name, "Simulated producer stopped");
        Ok(())
    }

    /// Overwrites the status field.
    pub fn set_status(&self, status: i32) -> Result<()> {
        self.memory.write(offsets::STATUS, &status.to_le_bytes())
    }

    /// Overwrites the version field.
    pub fn set_version(&self, version: i32) -> Result<()> {
        self.memory.write(offsets::VERSION, &version.to_le_bytes())
    }

    /// Rewrites the declared buffer count.
    pub fn set_buffer_count(&self, count: i32) -> Result<()> {
        self.memory.write(offsets::TELEMETRY_BUFFER_COUNT, &count.to_le_bytes())
    }

    /// Sets one slot's tick count without touching its data.
    pub fn set_tick_count(&self, index: usize, tick_count: i32) -> Result<()> {
        self.check_slot(index)?;
        self.memory.write(offsets::buffer_tick_count(index), &tick_count.to_le_bytes())
    }

    /// Fills one slot's data with `value`.
    pub fn fill_buffer(&self, index: usize, value: u8) -> Result<()> {
        self.check_slot(index)?;
        self.memory.fill(self.layout.buffer_offsets[index], self.layout.buffer_len, value)
    }

    /// Writes `data` into slot `index`, stamps it with `tick_count` and
    /// signals the data-ready event.
    pub fn publish(&self, index: usize, tick_count: i32, data: &[u8]) -> Result<()> {
        self.check_slot(index)?;
        if data.len() > self.layout.buffer_len {
            return Err(TelemetryError::invalid_argument(
                "data",
                format!("{} bytes exceed the {}-byte buffer", data.len(), self.layout.buffer_len),
            ));
        }
        self.memory.write(self.layout.buffer_offsets[index], data)?;
        self.set_tick_count(index, tick_count)?;
        trace!(index, tick_count, "Published telemetry buffer");
        self.signal();
        Ok(())
    }

    /// Replaces the session info text and bumps its version.
    ///
    /// `text` is written as raw bytes followed by a NUL; the declared length
    /// covers the whole capacity, as the real producer's does.
    pub fn write_session_info(&self, text: &[u8], version: i32) -> Result<()> {
        let capacity = self.layout.session_info_capacity;
        if text.len() >= capacity {
            return Err(TelemetryError::invalid_argument(
                "text",
                format!("{} bytes do not fit {} bytes with terminator", text.len(), capacity),
            ));
        }
        self.memory.fill(self.layout.session_info_offset, capacity, 0)?;
        self.memory.write(self.layout.session_info_offset, text)?;
        let length = to_i32("capacity", capacity)?;
        self.memory.write(offsets::SESSION_INFO_LENGTH, &length.to_le_bytes())?;
        self.memory.write(offsets::SESSION_INFO_VERSION, &version.to_le_bytes())
    }

    /// Signals the data-ready event without publishing.
    pub fn signal(&self) {
        self.event.set();
    }

    fn check_slot(&self, index: usize) -> Result<()> {
        if index >= MAX_TELEMETRY_BUFFERS {
            return Err(TelemetryError::buffer_operation_error("no such buffer slot", Some(index)));
        }
        Ok(())
    }
}

impl DataSource for SimulatedProducer {
    fn open_region(&self) -> Result<Option<MappedRegion>> {
        if !self.is_running() {
            return Ok(None);
        }
        Ok(Some(MappedRegion::new(self.name.clone(), Arc::clone(&self.memory))))
    }

    fn create_data_ready_event(&self) -> Result<Box<dyn DataReadyEvent>> {
        Ok(Box::new(SimulatedEvent { event: Arc::clone(&self.event) }))
    }
}
