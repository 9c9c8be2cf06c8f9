//! Chunked payload log.
//!
//! Payloads are grouped into chunks of consecutive rows. Each chunk is
//! written as one frame, optionally zstd-compressed and checksummed:
//!
//! ```text
//! magic "CHK\0" | flags u8 | rows u32 | raw_len u32 | stored_len u32 | data | crc32?
//! ```
//!
//! The decompressed data is a run of `u32 length | payload` entries.

use crate::error::{LinkError, Result};
use std::io::Write;

/// Magic bytes for the payload log.
const LOG_MAGIC: &[u8; 4] = b"PLD\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Log header size: magic + version.
pub const LOG_HEADER_SIZE: usize = 4 + 1;

/// Magic bytes opening every chunk frame.
const CHUNK_MAGIC: &[u8; 4] = b"CHK\0";

/// Chunk frame header size (fixed part).
const CHUNK_HEADER_SIZE: usize = 4 + 1 + 4 + 4 + 4; // magic + flags + rows + raw_len + stored_len

const FLAG_COMPRESSED: u8 = 0x01;

/// Location of one chunk inside the mapped log.
#[derive(Clone, Debug)]
pub struct ChunkEntry {
    /// Store row of the chunk's first payload.
    pub first_row: u64,
    pub rows: u32,
    /// Offset of the stored data within the log.
    pub data_offset: usize,
    pub stored_len: usize,
    pub raw_len: usize,
    pub compressed: bool,
}

impl ChunkEntry {
    /// One past the last row held by this chunk.
    pub fn end_row(&self) -> u64 {
        self.first_row + self.rows as u64
    }
}

/// Payloads collected for the chunk currently being filled.
pub struct ChunkBuilder {
    rows: u32,
    data: Vec<u8>,
}

impl ChunkBuilder {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            rows: 0,
            data: Vec::with_capacity(bytes),
        }
    }

    pub fn push(&mut self, payload: &[u8]) {
        self.data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.data.extend_from_slice(payload);
        self.rows += 1;
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Encode the pending payloads as a frame and reset the builder.
    ///
    /// Compression is skipped when it does not shrink the chunk.
    pub fn seal(&mut self, compression_level: u8, checksum: bool) -> Result<Vec<u8>> {
        let raw_len = self.data.len();

        let compressed = if compression_level > 0 {
            let packed = zstd::bulk::compress(&self.data, compression_level as i32)?;
            if packed.len() < raw_len {
                Some(packed)
            } else {
                None
            }
        } else {
            None
        };

        let (flags, stored): (u8, &[u8]) = match &compressed {
            Some(packed) => (FLAG_COMPRESSED, packed),
            None => (0, &self.data),
        };

        let mut frame = Vec::with_capacity(CHUNK_HEADER_SIZE + stored.len() + 4);
        frame.write_all(CHUNK_MAGIC)?;
        frame.write_all(&[flags])?;
        frame.write_all(&self.rows.to_le_bytes())?;
        frame.write_all(&(raw_len as u32).to_le_bytes())?;
        frame.write_all(&(stored.len() as u32).to_le_bytes())?;
        frame.write_all(stored)?;
        if checksum {
            frame.write_all(&crc32fast::hash(stored).to_le_bytes())?;
        }

        self.rows = 0;
        self.data.clear();
        Ok(frame)
    }
}

/// Write the log header.
pub fn write_header(out: &mut impl Write) -> Result<()> {
    out.write_all(LOG_MAGIC)?;
    out.write_all(&[LOG_VERSION])?;
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

/// Frame headers found by [`scan`].
#[derive(Debug)]
pub struct LogScan {
    pub chunks: Vec<ChunkEntry>,

    /// Bytes after the last whole frame, left by a write that never
    /// completed. Zero for a cleanly closed log.
    pub torn_bytes: usize,
}

/// Walk the frame headers of a log image.
///
/// Only headers are read; chunk data is verified when decoded. A frame
/// cut short at the end of the log is reported in `torn_bytes` rather
/// than as an error; anything else that is not a frame is corruption.
pub fn scan(bytes: &[u8], checksum: bool) -> Result<LogScan> {
    if bytes.len() < LOG_HEADER_SIZE || &bytes[0..4] != LOG_MAGIC {
        return Err(LinkError::InvalidFormat("Invalid payload log magic".into()));
    }
    if bytes[4] != LOG_VERSION {
        return Err(LinkError::InvalidFormat(format!(
            "Unsupported payload log version: {}",
            bytes[4]
        )));
    }

    let trailer = if checksum { 4 } else { 0 };
    let mut chunks = Vec::new();
    let mut offset = LOG_HEADER_SIZE;
    let mut next_row = 0u64;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        let magic_len = remaining.min(CHUNK_MAGIC.len());
        if bytes[offset..offset + magic_len] != CHUNK_MAGIC[..magic_len] {
            return Err(LinkError::Corruption(format!(
                "Invalid chunk magic at offset {}",
                offset
            )));
        }
        if remaining < CHUNK_HEADER_SIZE {
            break;
        }

        let flags = bytes[offset + 4];
        let rows = read_u32(bytes, offset + 5);
        let raw_len = read_u32(bytes, offset + 9) as usize;
        let stored_len = read_u32(bytes, offset + 13) as usize;
        let data_offset = offset + CHUNK_HEADER_SIZE;
        let frame_end = data_offset + stored_len + trailer;

        if frame_end > bytes.len() {
            break;
        }

        chunks.push(ChunkEntry {
            first_row: next_row,
            rows,
            data_offset,
            stored_len,
            raw_len,
            compressed: flags & FLAG_COMPRESSED != 0,
        });

        next_row += rows as u64;
        offset = frame_end;
    }

    Ok(LogScan {
        chunks,
        torn_bytes: bytes.len() - offset,
    })
}

/// Payloads of one chunk, decompressed and split.
pub struct DecodedChunk {
    data: Vec<u8>,
    spans: Vec<(usize, usize)>,
}

impl DecodedChunk {
    /// Payload of the `i`-th row within the chunk.
    pub fn payload(&self, i: usize) -> Option<&[u8]> {
        self.spans.get(i).map(|&(start, end)| &self.data[start..end])
    }

    pub fn rows(&self) -> usize {
        self.spans.len()
    }
}

/// Verify, decompress and split one chunk.
pub fn decode_chunk(bytes: &[u8], entry: &ChunkEntry, checksum: bool) -> Result<DecodedChunk> {
    let stored = &bytes[entry.data_offset..entry.data_offset + entry.stored_len];

    if checksum {
        let expected = read_u32(bytes, entry.data_offset + entry.stored_len);
        let got = crc32fast::hash(stored);
        if expected != got {
            return Err(LinkError::ChecksumMismatch {
                location: format!("payload chunk starting at row {}", entry.first_row),
                expected,
                got,
            });
        }
    }

    let data = if entry.compressed {
        zstd::bulk::decompress(stored, entry.raw_len).map_err(|e| {
            LinkError::Corruption(format!(
                "Chunk starting at row {} failed to decompress: {}",
                entry.first_row, e
            ))
        })?
    } else {
        stored.to_vec()
    };

    if data.len() != entry.raw_len {
        return Err(LinkError::Corruption(format!(
            "Chunk starting at row {} holds {} bytes, header says {}",
            entry.first_row,
            data.len(),
            entry.raw_len
        )));
    }

    let mut spans = Vec::with_capacity(entry.rows as usize);
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 4 {
            return Err(LinkError::Corruption("Truncated payload length".into()));
        }
        let len = read_u32(&data, pos) as usize;
        pos += 4;
        if data.len() - pos < len {
            return Err(LinkError::Corruption("Truncated payload".into()));
        }
        spans.push((pos, pos + len));
        pos += len;
    }

    if spans.len() != entry.rows as usize {
        return Err(LinkError::Corruption(format!(
            "Chunk starting at row {} holds {} payloads, header says {}",
            entry.first_row,
            spans.len(),
            entry.rows
        )));
    }

    Ok(DecodedChunk { data, spans })
}
