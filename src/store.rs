//! Writable and read-only handles on a record store directory.
//!
//! A store directory holds:
//!
//! - `MANIFEST`: format magic plus the options the store was created with
//! - `metadata.tbl`: fixed-width metadata rows (see [`RecordIndex`])
//! - `payload.log`: chunked payloads (see [`ChunkBuilder`])
//! - `LOCK`: advisory lock, exclusive for the writer, shared for readers

use crate::error::{LinkError, Result};
use crate::records::{
    decode_chunk, scan_chunks, write_log_header, write_table_header, ChunkBuilder, ChunkEntry,
    DecodedChunk, RecordIndex, RowMeta, RowSelection,
};
use crate::types::Record;
use fs2::FileExt;
use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"LRS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const MANIFEST_FILE: &str = "MANIFEST";
const METADATA_FILE: &str = "metadata.tbl";
const PAYLOAD_FILE: &str = "payload.log";
const LOCK_FILE: &str = "LOCK";

/// Decoded chunks kept per reader.
pub const DEFAULT_CACHE_CHUNKS: usize = 16;

/// Store creation options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 0 disables compression, 9 is the maximum level.
    pub compression_level: u8,

    /// Checksum every metadata row and payload chunk.
    pub checksum: bool,

    /// Expected recording length, used to size chunks and buffers.
    /// Stores grow past it transparently.
    pub expected_hours: f64,

    /// Rows per payload chunk. Derived from `expected_hours` when unset.
    pub chunk_rows: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression_level: 9,
            checksum: true,
            expected_hours: 8.0,
            chunk_rows: None,
        }
    }
}

impl StoreConfig {
    /// Observed metadata rate of the link.
    pub const ROWS_PER_SECOND: f64 = 5.0;

    /// Observed payload rate of the link.
    pub const PAYLOAD_BYTES_PER_SECOND: f64 = 300.0;

    const MIN_CHUNK_ROWS: usize = 64;
    const MAX_CHUNK_ROWS: usize = 4096;

    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(LinkError::Config(format!(
                "compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        if !self.expected_hours.is_finite() || self.expected_hours < 0.0 {
            return Err(LinkError::Config(format!(
                "expected hours must be a non-negative number, got {}",
                self.expected_hours
            )));
        }
        if self.chunk_rows == Some(0) {
            return Err(LinkError::Config("chunk rows must be at least 1".into()));
        }
        Ok(())
    }

    /// Metadata rows expected over `expected_hours`.
    pub fn expected_rows(&self) -> usize {
        (self.expected_hours * 3600.0 * Self::ROWS_PER_SECOND) as usize
    }

    /// Payload bytes expected over `expected_hours`.
    pub fn expected_payload_bytes(&self) -> usize {
        (self.expected_hours * 3600.0 * Self::PAYLOAD_BYTES_PER_SECOND) as usize
    }

    /// Rows per chunk: explicit setting, or about 1/128th of the expected rows.
    pub fn effective_chunk_rows(&self) -> usize {
        self.chunk_rows.unwrap_or_else(|| {
            (self.expected_rows() / 128).clamp(Self::MIN_CHUNK_ROWS, Self::MAX_CHUNK_ROWS)
        })
    }
}

/// Options persisted alongside the data.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoreManifest {
    compression_level: u8,
    checksum: bool,
    chunk_rows: u32,
    created_at: i64,
}

fn write_manifest(dir: &Path, manifest: &StoreManifest) -> Result<()> {
    let mut file = File::create(dir.join(MANIFEST_FILE))?;
    file.write_all(STORE_MAGIC)?;
    file.write_all(&[STORE_VERSION])?;
    file.write_all(&rmp_serde::to_vec(manifest)?)?;
    file.sync_all()?;
    Ok(())
}

fn read_manifest(dir: &Path) -> Result<StoreManifest> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(LinkError::InvalidFormat(format!(
            "{} is not a record store (no manifest)",
            dir.display()
        )));
    }

    let mut bytes = Vec::new();
    File::open(manifest_path)?.read_to_end(&mut bytes)?;

    if bytes.len() < 5 || &bytes[0..4] != STORE_MAGIC {
        return Err(LinkError::InvalidFormat("Invalid store magic".into()));
    }
    if bytes[4] != STORE_VERSION {
        return Err(LinkError::InvalidFormat(format!(
            "Unsupported store version: {}",
            bytes[4]
        )));
    }

    Ok(rmp_serde::from_slice(&bytes[5..])?)
}

fn acquire_lock(dir: &Path, exclusive: bool) -> Result<File> {
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir.join(LOCK_FILE))?;

    let locked = if exclusive {
        FileExt::try_lock_exclusive(&lock_file)
    } else {
        FileExt::try_lock_shared(&lock_file)
    };
    locked.map_err(|_| LinkError::Locked)?;

    Ok(lock_file)
}

fn create_truncated(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

fn empty_store(what: &str) -> LinkError {
    LinkError::Range(format!("{} of an empty store", what))
}

/// Append-only handle on a store being recorded.
///
/// Appends are buffered in the pending chunk and become durable on
/// [`flush`](Self::flush) or [`close`](Self::close). Dropping an open
/// store closes it on a best-effort basis.
pub struct WritableStore {
    path: PathBuf,
    manifest: StoreManifest,

    /// Held for the lifetime of the session.
    _lock_file: File,

    metadata: BufWriter<File>,
    payload: BufWriter<File>,

    /// Rows of the chunk being filled, written to the table when it is sealed.
    pending_rows: Vec<RowMeta>,
    pending: ChunkBuilder,

    len: u64,
    chunks_written: u64,
    first_timestamp: Option<u32>,
    last_timestamp: Option<u32>,
    closed: bool,
}

impl WritableStore {
    /// Create a new store at `path`, replacing any store already there.
    pub fn create(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        fs::create_dir_all(&path)?;
        let lock_file = acquire_lock(&path, true)?;

        let chunk_rows = config.effective_chunk_rows();
        let manifest = StoreManifest {
            compression_level: config.compression_level,
            checksum: config.checksum,
            chunk_rows: chunk_rows as u32,
            created_at: chrono::Utc::now().timestamp(),
        };
        write_manifest(&path, &manifest)?;

        let mut metadata = BufWriter::new(create_truncated(&path.join(METADATA_FILE))?);
        write_table_header(&mut metadata, config.checksum)?;

        let mut payload = BufWriter::new(create_truncated(&path.join(PAYLOAD_FILE))?);
        write_log_header(&mut payload)?;

        // Size the pending chunk from the expected payload rate
        let expected_rows = config.expected_rows().max(1);
        let bytes_per_row = (config.expected_payload_bytes() / expected_rows).max(1) + 4;

        tracing::debug!(
            path = %path.display(),
            compression_level = config.compression_level,
            checksum = config.checksum,
            chunk_rows,
            "created record store"
        );

        Ok(Self {
            path,
            manifest,
            _lock_file: lock_file,
            metadata,
            payload,
            pending_rows: Vec::with_capacity(chunk_rows),
            pending: ChunkBuilder::with_capacity(chunk_rows * bytes_per_row),
            len: 0,
            chunks_written: 0,
            first_timestamp: None,
            last_timestamp: None,
            closed: false,
        })
    }

    /// Append a record. Not durable until the next flush.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.ensure_open("append")?;

        self.pending_rows.push(RowMeta::from(record));
        self.pending.push(&record.payload);

        self.len += 1;
        self.first_timestamp.get_or_insert(record.timestamp);
        self.last_timestamp = Some(record.timestamp);

        if self.pending.rows() as usize >= self.manifest.chunk_rows as usize {
            self.seal_chunk()?;
        }
        Ok(())
    }

    /// Write the pending chunk and sync both files to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open("flush")?;
        self.seal_chunk()?;

        self.payload.flush()?;
        self.metadata.flush()?;
        self.payload.get_ref().sync_all()?;
        self.metadata.get_ref().sync_all()?;
        Ok(())
    }

    /// Final flush. Any later append or flush fails with `InvalidState`.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        tracing::debug!(path = %self.path.display(), records = self.len, "closed record store");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records appended so far, flushed or not.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn first_timestamp(&self) -> Result<u32> {
        self.first_timestamp.ok_or_else(|| empty_store("first timestamp"))
    }

    pub fn last_timestamp(&self) -> Result<u32> {
        self.last_timestamp.ok_or_else(|| empty_store("last timestamp"))
    }

    /// Last timestamp minus first timestamp, in seconds.
    pub fn duration(&self) -> Result<i64> {
        Ok(self.last_timestamp()? as i64 - self.first_timestamp()? as i64)
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.closed {
            return Err(LinkError::InvalidState(format!(
                "cannot {} on closed store {}",
                op,
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Payload frame first, then its metadata rows. The two files are
    /// buffered separately, so after a crash either may run ahead of the
    /// other; the reader keeps the prefix both agree on.
    fn seal_chunk(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let rows = self.pending.rows();
        let frame = self
            .pending
            .seal(self.manifest.compression_level, self.manifest.checksum)?;
        self.payload.write_all(&frame)?;

        for row in self.pending_rows.drain(..) {
            row.write_to(&mut self.metadata, self.manifest.checksum)?;
        }

        self.chunks_written += 1;
        tracing::debug!(
            chunk = self.chunks_written,
            rows,
            bytes = frame.len(),
            "sealed payload chunk"
        );
        Ok(())
    }
}

impl Drop for WritableStore {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(path = %self.path.display(), "failed to close record store: {}", e);
            }
        }
    }
}

/// Summary of a store's layout.
#[derive(Clone, Debug, Serialize)]
pub struct StoreInfo {
    pub path: PathBuf,
    pub records: usize,
    pub chunks: usize,
    pub compression_level: u8,
    pub checksum: bool,
    pub chunk_rows: u32,
    pub created_at: i64,
    pub payload_bytes: u64,
    pub first_timestamp: Option<u32>,
    pub last_timestamp: Option<u32>,
    pub monotonic: bool,
}

/// Read-only handle on a closed store.
pub struct ReadableStore {
    path: PathBuf,
    manifest: StoreManifest,

    /// Shared lock keeps writers out while the log is mapped.
    _lock_file: File,

    index: RecordIndex,
    payload: Mmap,
    chunks: Vec<ChunkEntry>,
    cache: Mutex<LruCache<usize, Arc<DecodedChunk>>>,
}

impl ReadableStore {
    /// Open a store read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_cache_size(path, DEFAULT_CACHE_CHUNKS)
    }

    /// Open a store read-only, keeping up to `cache_chunks` decoded chunks.
    pub fn open_with_cache_size(path: impl AsRef<Path>, cache_chunks: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(LinkError::NotFound(path));
        }

        let manifest = read_manifest(&path)?;
        let lock_file = acquire_lock(&path, false)?;

        let payload_file = File::open(path.join(PAYLOAD_FILE))?;
        // SAFETY: the shared lock excludes writers for as long as the map lives.
        let payload = unsafe { Mmap::map(&payload_file)? };
        let scanned = scan_chunks(&payload, manifest.checksum)?;
        let mut chunks = scanned.chunks;

        let metadata = fs::read(path.join(METADATA_FILE))?;
        let (mut index, stray) = RecordIndex::load_whole_rows(&metadata, manifest.checksum)?;

        if scanned.torn_bytes != 0 || stray != 0 {
            tracing::warn!(
                path = %path.display(),
                payload_bytes = scanned.torn_bytes,
                metadata_bytes = stray,
                "ignoring incomplete writes at the end of the store"
            );
        }

        let payload_rows = chunks.last().map_or(0, |c| c.end_row());
        if index.len() as u64 != payload_rows {
            let kept = chunks.partition_point(|c| c.end_row() <= index.len() as u64);
            chunks.truncate(kept);
            let consistent = chunks.last().map_or(0, |c| c.end_row()) as usize;

            tracing::warn!(
                path = %path.display(),
                metadata_rows = index.len(),
                payload_rows,
                recovered = consistent,
                "metadata table and payload log disagree, keeping the consistent prefix"
            );
            index.truncate(consistent);
        }

        let capacity = NonZeroUsize::new(cache_chunks).unwrap_or(NonZeroUsize::MIN);

        tracing::debug!(
            path = %path.display(),
            records = index.len(),
            chunks = chunks.len(),
            "opened record store"
        );

        Ok(Self {
            path,
            manifest,
            _lock_file: lock_file,
            index,
            payload,
            chunks,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record at row `i`.
    pub fn row(&self, i: usize) -> Result<Record> {
        let meta = self.index.get(i).ok_or_else(|| {
            LinkError::Range(format!("row {} out of range (store has {})", i, self.len()))
        })?;

        let chunk_idx = self
            .chunks
            .partition_point(|c| c.end_row() <= i as u64);
        let entry = self.chunks.get(chunk_idx).ok_or_else(|| {
            LinkError::Corruption(format!("no payload chunk holds row {}", i))
        })?;

        let chunk = self.chunk(chunk_idx)?;
        let payload = chunk
            .payload((i as u64 - entry.first_row) as usize)
            .ok_or_else(|| LinkError::Corruption(format!("payload for row {} missing", i)))?;

        Ok(meta.to_record(payload.to_vec()))
    }

    /// Records with `start <= timestamp < stop`, lazily, in store order.
    ///
    /// An omitted bound is unbounded on that side. Iteration ends after the
    /// first error.
    pub fn range_query(&self, start: Option<u32>, stop: Option<u32>) -> RangeQuery<'_> {
        RangeQuery {
            store: self,
            rows: self.index.select(start, stop),
            failed: false,
        }
    }

    /// Every record, in store order.
    pub fn iter(&self) -> RangeQuery<'_> {
        self.range_query(None, None)
    }

    pub fn first_timestamp(&self) -> Result<u32> {
        self.index
            .first()
            .map(|r| r.timestamp)
            .ok_or_else(|| empty_store("first timestamp"))
    }

    pub fn last_timestamp(&self) -> Result<u32> {
        self.index
            .last()
            .map(|r| r.timestamp)
            .ok_or_else(|| empty_store("last timestamp"))
    }

    /// Last timestamp minus first timestamp, in seconds.
    pub fn duration(&self) -> Result<i64> {
        Ok(self.last_timestamp()? as i64 - self.first_timestamp()? as i64)
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            path: self.path.clone(),
            records: self.len(),
            chunks: self.chunks.len(),
            compression_level: self.manifest.compression_level,
            checksum: self.manifest.checksum,
            chunk_rows: self.manifest.chunk_rows,
            created_at: self.manifest.created_at,
            payload_bytes: self.payload.len() as u64,
            first_timestamp: self.index.first().map(|r| r.timestamp),
            last_timestamp: self.index.last().map(|r| r.timestamp),
            monotonic: self.index.is_monotonic(),
        }
    }

    fn chunk(&self, chunk_idx: usize) -> Result<Arc<DecodedChunk>> {
        if let Some(cached) = self.cache.lock().get(&chunk_idx) {
            return Ok(Arc::clone(cached));
        }

        let decoded = Arc::new(decode_chunk(
            &self.payload,
            &self.chunks[chunk_idx],
            self.manifest.checksum,
        )?);
        self.cache.lock().put(chunk_idx, Arc::clone(&decoded));
        Ok(decoded)
    }
}

/// Lazy, single-pass iterator returned by [`ReadableStore::range_query`].
pub struct RangeQuery<'a> {
    store: &'a ReadableStore,
    rows: RowSelection<'a>,
    failed: bool,
}

impl Iterator for RangeQuery<'_> {
    type Item = Result<(usize, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let i = self.rows.next()?;
        match self.store.row(i) {
            Ok(record) => Some(Ok((i, record))),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
