//! Variable header records.
//!
//! Each record is 144 bytes:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 4    | type tag                      |
//! | 4      | 4    | byte offset within a buffer   |
//! | 8      | 4    | element count                 |
//! | 12     | 1    | count-as-time flag            |
//! | 13     | 3    | padding                       |
//! | 16     | 32   | name (NUL-terminated)         |
//! | 48     | 64   | description (NUL-terminated)  |
//! | 112    | 32   | unit (NUL-terminated)         |

use serde::{Deserialize, Serialize};

use super::header::read_i32;
use crate::{Result, TelemetryError, VariableType};

/// Size of one variable header record.
pub const DATA_VARIABLE_HEADER_SIZE: usize = 144;

const NAME_OFFSET: usize = 16;
const NAME_SIZE: usize = 32;
const DESCRIPTION_OFFSET: usize = 48;
const DESCRIPTION_SIZE: usize = 64;
const UNIT_OFFSET: usize = 112;
const UNIT_SIZE: usize = 32;

/// One telemetry variable's layout within a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVariableHeader {
    /// Raw type tag, see [`VariableType::from_tag`].
    pub type_tag: i32,
    /// Byte offset of the first element within each telemetry buffer.
    pub offset: i32,
    /// Number of elements.
    pub count: i32,
    /// Elements form a time series sampled within one tick.
    pub count_as_time: bool,
    pub name: String,
    pub description: String,
    pub unit: String,
}

impl DataVariableHeader {
    /// Parses one record.
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < DATA_VARIABLE_HEADER_SIZE {
            return Err(TelemetryError::Parse {
                context: "Variable header".to_string(),
                details: format!(
                    "need {} bytes, have {}",
                    DATA_VARIABLE_HEADER_SIZE,
                    record.len()
                ),
            });
        }

        Ok(Self {
            type_tag: read_i32(record, 0)?,
            offset: read_i32(record, 4)?,
            count: read_i32(record, 8)?,
            count_as_time: record[12] != 0,
            name: extract_null_terminated_string(&record[NAME_OFFSET..NAME_OFFSET + NAME_SIZE]),
            description: extract_null_terminated_string(
                &record[DESCRIPTION_OFFSET..DESCRIPTION_OFFSET + DESCRIPTION_SIZE],
            ),
            unit: extract_null_terminated_string(&record[UNIT_OFFSET..UNIT_OFFSET + UNIT_SIZE]),
        })
    }

    /// Serialises the record into `record`. Strings longer than their field
    /// are truncated so the terminating NUL always fits.
    pub fn write_to(&self, record: &mut [u8]) -> Result<()> {
        if record.len() < DATA_VARIABLE_HEADER_SIZE {
            return Err(TelemetryError::memory_access_error(0, DATA_VARIABLE_HEADER_SIZE));
        }

        let record = &mut record[..DATA_VARIABLE_HEADER_SIZE];
        record.fill(0);
        record[0..4].copy_from_slice(&self.type_tag.to_le_bytes());
        record[4..8].copy_from_slice(&self.offset.to_le_bytes());
        record[8..12].copy_from_slice(&self.count.to_le_bytes());
        record[12] = u8::from(self.count_as_time);
        write_null_terminated_string(&mut record[NAME_OFFSET..NAME_OFFSET + NAME_SIZE], &self.name);
        write_null_terminated_string(
            &mut record[DESCRIPTION_OFFSET..DESCRIPTION_OFFSET + DESCRIPTION_SIZE],
            &self.description,
        );
        write_null_terminated_string(&mut record[UNIT_OFFSET..UNIT_OFFSET + UNIT_SIZE], &self.unit);
        Ok(())
    }

    /// Decoded type tag.
    pub fn variable_type(&self) -> Option<VariableType> {
        VariableType::from_tag(self.type_tag)
    }

    /// Bytes occupied in each telemetry buffer, when the tag is known.
    pub fn byte_len(&self) -> Option<usize> {
        let count = usize::try_from(self.count).ok()?;
        self.variable_type().map(|t| t.size() * count)
    }
}

/// Parses `count` consecutive records starting at `offset`.
pub(crate) fn parse_variable_headers(
    memory: &[u8],
    offset: i32,
    count: i32,
) -> Result<Vec<DataVariableHeader>> {
    let count = usize::try_from(count).map_err(|_| TelemetryError::Parse {
        context: "Variable headers".to_string(),
        details: format!("negative variable count {}", count),
    })?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let offset = usize::try_from(offset).map_err(|_| TelemetryError::Parse {
        context: "Variable headers".to_string(),
        details: format!("negative variable header offset {}", offset),
    })?;

    let table_len = count
        .checked_mul(DATA_VARIABLE_HEADER_SIZE)
        .ok_or_else(|| TelemetryError::memory_access_error(offset, usize::MAX))?;
    let table = offset
        .checked_add(table_len)
        .and_then(|end| memory.get(offset..end))
        .ok_or_else(|| TelemetryError::memory_access_error(offset, table_len))?;

    table.chunks_exact(DATA_VARIABLE_HEADER_SIZE).map(DataVariableHeader::parse).collect()
}

/// Extract null-terminated string from byte slice
fn extract_null_terminated_string(bytes: &[u8]) -> String {
    let null_pos = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..null_pos]).into_owned()
}

fn write_null_terminated_string(field: &mut [u8], value: &str) {
    let len = value.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed() -> DataVariableHeader {
        DataVariableHeader {
            type_tag: VariableType::Float32.tag(),
            offset: 16,
            count: 1,
            count_as_time: false,
            name: "Speed".to_string(),
            description: "GPS vehicle speed".to_string(),
            unit: "m/s".to_string(),
        }
    }

    #[test]
    fn record_fields_at_documented_offsets() {
        let mut record = [0u8; DATA_VARIABLE_HEADER_SIZE];
        speed().write_to(&mut record).expect("write");

        assert_eq!(read_i32(&record, 0).expect("tag"), 4);
        assert_eq!(read_i32(&record, 4).expect("offset"), 16);
        assert_eq!(&record[16..21], b"Speed");
        assert_eq!(record[21], 0);
        assert_eq!(&record[112..115], b"m/s");

        assert_eq!(DataVariableHeader::parse(&record).expect("parse"), speed());
    }

    #[test]
    fn overlong_names_are_truncated_with_terminator() {
        let mut header = speed();
        header.name = "X".repeat(40);
        let mut record = [0u8; DATA_VARIABLE_HEADER_SIZE];
        header.write_to(&mut record).expect("write");

        let parsed = DataVariableHeader::parse(&record).expect("parse");
        assert_eq!(parsed.name.len(), 31);
    }

    #[test]
    fn byte_len_uses_type_width() {
        let mut header = speed();
        header.type_tag = VariableType::Float64.tag();
        header.count = 6;
        header.count_as_time = true;
        assert_eq!(header.byte_len(), Some(48));

        header.type_tag = 42;
        assert_eq!(header.variable_type(), None);
        assert_eq!(header.byte_len(), None);
    }

    #[test]
    fn table_outside_memory_is_rejected() {
        let memory = vec![0u8; 200];
        let err = parse_variable_headers(&memory, 100, 1).expect_err("table overruns");
        assert!(matches!(err, TelemetryError::Memory { offset: 100, .. }));
        assert!(parse_variable_headers(&memory, 100, 0).expect("empty table").is_empty());
        assert!(parse_variable_headers(&memory, 0, -1).is_err());
    }
}
