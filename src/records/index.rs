//! Fixed-width metadata table.
//!
//! Row `i` of the table describes record `i` of the payload log; the two
//! are correlated by position only. The whole table is loaded into memory
//! on open and doubles as the timestamp index for range queries.

use crate::error::{LinkError, Result};
use crate::types::Record;
use std::io::Write;
use std::ops::Range;

/// Magic bytes for the metadata table.
const TABLE_MAGIC: &[u8; 4] = b"MTB\0";

/// Current table format version.
const TABLE_VERSION: u8 = 1;

/// Header size: magic + version + flags.
pub const TABLE_HEADER_SIZE: usize = 4 + 1 + 1;

/// Row size without checksum: timestamp + subsec + version.
pub const ROW_SIZE: usize = 4 + 4 + 1;

/// Header flag set when every row carries a CRC32.
const FLAG_CHECKSUM: u8 = 0x01;

/// Metadata for one stored record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RowMeta {
    pub timestamp: u32,
    pub timestamp_subsec: f32,
    pub version: u8,
}

impl RowMeta {
    /// On-disk width of a row.
    pub fn width(checksum: bool) -> usize {
        if checksum {
            ROW_SIZE + 4
        } else {
            ROW_SIZE
        }
    }

    /// Serialize the row, appending a CRC32 when `checksum` is set.
    pub fn write_to(&self, out: &mut impl Write, checksum: bool) -> Result<()> {
        let mut row = [0u8; ROW_SIZE];
        row[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        row[4..8].copy_from_slice(&self.timestamp_subsec.to_le_bytes());
        row[8] = self.version;
        out.write_all(&row)?;

        if checksum {
            out.write_all(&crc32fast::hash(&row).to_le_bytes())?;
        }
        Ok(())
    }

    fn decode(bytes: &[u8], checksum: bool, row_index: usize) -> Result<Self> {
        let row = &bytes[..ROW_SIZE];

        if checksum {
            let mut stored = [0u8; 4];
            stored.copy_from_slice(&bytes[ROW_SIZE..ROW_SIZE + 4]);
            let stored = u32::from_le_bytes(stored);
            let computed = crc32fast::hash(row);
            if stored != computed {
                return Err(LinkError::ChecksumMismatch {
                    location: format!("metadata row {}", row_index),
                    expected: stored,
                    got: computed,
                });
            }
        }

        let mut ts = [0u8; 4];
        ts.copy_from_slice(&row[0..4]);
        let mut subsec = [0u8; 4];
        subsec.copy_from_slice(&row[4..8]);

        Ok(Self {
            timestamp: u32::from_le_bytes(ts),
            timestamp_subsec: f32::from_le_bytes(subsec),
            version: row[8],
        })
    }

    /// Rebuild a full record around a payload.
    pub fn to_record(self, payload: Vec<u8>) -> Record {
        Record {
            timestamp: self.timestamp,
            timestamp_subsec: self.timestamp_subsec,
            version: self.version,
            payload,
        }
    }
}

impl From<&Record> for RowMeta {
    fn from(record: &Record) -> Self {
        Self {
            timestamp: record.timestamp,
            timestamp_subsec: record.timestamp_subsec,
            version: record.version,
        }
    }
}

/// Write the table header.
pub fn write_header(out: &mut impl Write, checksum: bool) -> Result<()> {
    out.write_all(TABLE_MAGIC)?;
    out.write_all(&[TABLE_VERSION])?;
    out.write_all(&[if checksum { FLAG_CHECKSUM } else { 0 }])?;
    Ok(())
}

/// In-memory copy of the metadata table.
pub struct RecordIndex {
    rows: Vec<RowMeta>,

    /// Whether timestamps never decrease, enabling binary search.
    monotonic: bool,
}

impl RecordIndex {
    /// Create an empty index.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            monotonic: true,
        }
    }

    /// Parse a complete table image (header included).
    pub fn load(bytes: &[u8], checksum: bool) -> Result<Self> {
        let (index, stray) = Self::load_whole_rows(bytes, checksum)?;
        if stray != 0 {
            return Err(LinkError::Corruption(format!(
                "Metadata table has a partial trailing row ({} stray bytes)",
                stray
            )));
        }
        Ok(index)
    }

    /// Parse every whole row of a table image, returning the number of
    /// bytes left over after the last one.
    ///
    /// A writer that stopped mid-row leaves such a tail behind.
    pub fn load_whole_rows(bytes: &[u8], checksum: bool) -> Result<(Self, usize)> {
        if bytes.len() < TABLE_HEADER_SIZE || &bytes[0..4] != TABLE_MAGIC {
            return Err(LinkError::InvalidFormat("Invalid metadata table magic".into()));
        }
        if bytes[4] != TABLE_VERSION {
            return Err(LinkError::InvalidFormat(format!(
                "Unsupported metadata table version: {}",
                bytes[4]
            )));
        }
        if (bytes[5] & FLAG_CHECKSUM != 0) != checksum {
            return Err(LinkError::InvalidFormat(
                "Metadata table checksum flag disagrees with manifest".into(),
            ));
        }

        let body = &bytes[TABLE_HEADER_SIZE..];
        let width = RowMeta::width(checksum);

        let mut index = Self::with_capacity(body.len() / width);
        for (i, chunk) in body.chunks_exact(width).enumerate() {
            index.push(RowMeta::decode(chunk, checksum, i)?);
        }
        Ok((index, body.len() % width))
    }

    /// Keep only the first `len` rows.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
        self.monotonic = self.rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
    }

    /// Add a row at the end.
    pub fn push(&mut self, row: RowMeta) {
        if let Some(last) = self.rows.last() {
            if row.timestamp < last.timestamp {
                self.monotonic = false;
            }
        }
        self.rows.push(row);
    }

    pub fn get(&self, i: usize) -> Option<RowMeta> {
        self.rows.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<RowMeta> {
        self.rows.first().copied()
    }

    pub fn last(&self) -> Option<RowMeta> {
        self.rows.last().copied()
    }

    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }

    /// Select rows with `start <= timestamp < stop`, in table order.
    pub fn select(&self, start: Option<u32>, stop: Option<u32>) -> RowSelection<'_> {
        if self.monotonic {
            let lo = match start {
                Some(s) => self.rows.partition_point(|r| r.timestamp < s),
                None => 0,
            };
            let hi = match stop {
                Some(s) => self.rows.partition_point(|r| r.timestamp < s),
                None => self.rows.len(),
            };
            RowSelection::Window(lo..hi.max(lo))
        } else {
            RowSelection::Scan {
                rows: &self.rows,
                pos: 0,
                start,
                stop,
            }
        }
    }
}

/// Lazy selection of row numbers produced by [`RecordIndex::select`].
pub enum RowSelection<'a> {
    /// Contiguous window found by binary search.
    Window(Range<usize>),

    /// Filtered linear scan for tables with out-of-order timestamps.
    Scan {
        rows: &'a [RowMeta],
        pos: usize,
        start: Option<u32>,
        stop: Option<u32>,
    },
}

impl Iterator for RowSelection<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self {
            RowSelection::Window(range) => range.next(),
            RowSelection::Scan {
                rows,
                pos,
                start,
                stop,
            } => {
                while *pos < rows.len() {
                    let i = *pos;
                    *pos += 1;
                    let ts = rows[i].timestamp;
                    if start.map_or(true, |s| ts >= s) && stop.map_or(true, |s| ts < s) {
                        return Some(i);
                    }
                }
                None
            }
        }
    }
}
