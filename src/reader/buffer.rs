//! Active telemetry buffer selection.
//!
//! The producer rotates through up to four buffer slots and stamps each with
//! the tick at which it was written. The active buffer is the one with the
//! highest tick count among the *declared* slots only: a slot at an index at
//! or beyond `telemetry_buffer_count` is ignored even when its tick count is
//! larger. Ties go to the lowest index.

use crate::schema::{DataFileHeader, TelemetryBufferHeader};

/// Picks the active buffer slot from a header copy.
///
/// Returns `None` when the header declares no buffers.
pub fn select_active_buffer(header: &DataFileHeader) -> Option<(usize, TelemetryBufferHeader)> {
    header.telemetry_buffer_headers().iter().copied().enumerate().fold(
        None,
        |best, (index, slot)| match best {
            Some((_, winner)) if winner.tick_count >= slot.tick_count => best,
            _ => Some((index, slot)),
        },
    )
}

/// Outcome of copying the active buffer.
///
/// `tick_count` comes from the header copy used to pick the slot;
/// `tick_count_after_read` is that slot's tick count re-read after the bytes
/// were copied. If they differ the producer rewrote the slot mid-copy and the
/// caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryBufferRead {
    /// Index of the slot that was copied.
    pub buffer_index: usize,
    /// Tick count of the slot when it was selected.
    pub tick_count: i32,
    /// Tick count of the slot after the copy finished.
    pub tick_count_after_read: i32,
    /// Number of bytes copied.
    pub length: usize,
}

impl TelemetryBufferRead {
    /// True when the slot was not rewritten while it was being copied.
    pub fn is_consistent(&self) -> bool {
        self.tick_count == self.tick_count_after_read
    }
}
