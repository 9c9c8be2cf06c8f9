//! On-disk record layout.
//!
//! A store keeps two positionally-correlated structures: a fixed-width
//! metadata table (the index) and a chunked payload log.

mod index;
mod log;

pub use index::{RecordIndex, RowMeta, RowSelection};
pub(crate) use index::write_header as write_table_header;
pub(crate) use log::{decode_chunk, scan as scan_chunks, write_header as write_log_header};
pub use log::{ChunkBuilder, ChunkEntry, DecodedChunk, LogScan};
