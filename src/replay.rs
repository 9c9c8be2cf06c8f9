//! Replay of recorded stores.
//!
//! The engine reads a store back and hands each record to its callbacks,
//! either as fast as the store can be read or paced so that the recorded
//! spacing between records is reproduced, scaled by the replay speed.

use crate::delegate::{Delegate, DelegateId, DelegateList, FnDelegate, Slot};
use crate::error::{LinkError, Result};
use crate::store::ReadableStore;
use crate::types::{Record, Speed};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records between progress reports in unpaced mode.
pub const PROGRESS_INTERVAL: usize = 1000;

/// Longest single sleep, so cancellation is noticed while waiting.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cooperative stop flag for an in-flight run.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the owner can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress through the reference range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// Records dispatched before this report.
    pub dispatched: usize,
    pub timestamp: u32,
    pub percent: f64,
}

/// Outcome of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReplayStats {
    pub dispatched: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// Percentage of the way from `range_start` to `range_end`.
///
/// A zero-width range counts as complete.
pub fn progress_percent(timestamp: u32, range_start: u32, range_end: u32) -> f64 {
    let span = range_end as f64 - range_start as f64;
    if span <= 0.0 {
        return 100.0;
    }
    (timestamp as f64 - range_start as f64) / span * 100.0
}

/// Seconds after run start at which a record is due.
pub fn target_offset(record: &Record, range_start: u32, factor: f64) -> f64 {
    (record.timestamp as f64 + record.timestamp_subsec as f64 - range_start as f64) / factor
}

/// Plays a store back to registered callbacks.
///
/// Callbacks run on the caller's thread, in registration order. A
/// failing callback aborts the run and its error is returned unchanged.
pub struct ReplayEngine<'a> {
    store: ReadableStore,
    callbacks: DelegateList<'a>,
    progress: Option<Box<dyn FnMut(Progress) + 'a>>,
    cancel: CancelToken,
}

impl<'a> ReplayEngine<'a> {
    /// Open the store at `path` for replay.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_store(ReadableStore::open(path)?))
    }

    pub fn from_store(store: ReadableStore) -> Self {
        Self {
            store,
            callbacks: DelegateList::default(),
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn store(&self) -> &ReadableStore {
        &self.store
    }

    /// Give the store back.
    pub fn into_store(self) -> ReadableStore {
        self.store
    }

    /// Add a callback. Callbacks are invoked in registration order.
    pub fn register_callback(&mut self, delegate: impl Delegate + 'a) -> DelegateId {
        self.callbacks.push(Slot::Plain(Box::new(delegate)))
    }

    /// Add a closure callback.
    pub fn register_fn<F>(&mut self, f: F) -> DelegateId
    where
        F: FnMut(&Record) -> Result<()> + 'a,
    {
        self.register_callback(FnDelegate(f))
    }

    pub fn remove_callback(&mut self, id: DelegateId) -> bool {
        self.callbacks.remove(id)
    }

    /// Receive progress reports of unpaced runs.
    pub fn on_progress(&mut self, handler: impl FnMut(Progress) + 'a) {
        self.progress = Some(Box::new(handler));
    }

    /// Token that stops the current or next run when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Replay records with `start <= timestamp < stop`.
    ///
    /// Without bounds the reference range is the store's first to last
    /// timestamp; a given bound replaces the matching end of the range.
    pub fn run(&mut self, speed: Speed, start: Option<u32>, stop: Option<u32>) -> Result<ReplayStats> {
        let speed = match speed {
            Speed::Multiple(factor) => Speed::multiple(factor)?,
            Speed::Max => Speed::Max,
        };
        let started = Instant::now();

        let (range_start, range_end) = match (self.store.first_timestamp(), self.store.last_timestamp()) {
            (Ok(first), Ok(last)) => (start.unwrap_or(first), stop.unwrap_or(last)),
            _ => {
                tracing::debug!("store is empty, nothing to replay");
                return Ok(ReplayStats {
                    dispatched: 0,
                    elapsed: started.elapsed(),
                    cancelled: false,
                });
            }
        };

        tracing::info!(
            path = %self.store.path().display(),
            %speed,
            range_start,
            range_end,
            "replay started"
        );

        let (dispatched, cancelled) = match speed {
            Speed::Max => self.run_unpaced(start, stop, range_start, range_end)?,
            Speed::Multiple(factor) => self.run_paced(factor, start, stop, range_start)?,
        };

        let stats = ReplayStats {
            dispatched,
            elapsed: started.elapsed(),
            cancelled,
        };
        tracing::info!(
            dispatched = stats.dispatched,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            cancelled = stats.cancelled,
            "replay finished"
        );
        Ok(stats)
    }

    fn run_unpaced(
        &mut self,
        start: Option<u32>,
        stop: Option<u32>,
        range_start: u32,
        range_end: u32,
    ) -> Result<(usize, bool)> {
        let mut dispatched = 0;

        for item in self.store.range_query(start, stop) {
            if self.cancel.is_cancelled() {
                return Ok((dispatched, true));
            }

            let (_, record) = item?;
            self.callbacks.dispatch(&record)?;

            if dispatched % PROGRESS_INTERVAL == 0 {
                let progress = Progress {
                    dispatched,
                    timestamp: record.timestamp,
                    percent: progress_percent(record.timestamp, range_start, range_end),
                };
                tracing::info!("replay progress: {:.0}%", progress.percent);
                if let Some(handler) = self.progress.as_mut() {
                    handler(progress);
                }
            }
            dispatched += 1;
        }

        Ok((dispatched, false))
    }

    fn run_paced(
        &mut self,
        factor: f64,
        start: Option<u32>,
        stop: Option<u32>,
        range_start: u32,
    ) -> Result<(usize, bool)> {
        let t0 = Instant::now();
        let mut dispatched = 0;

        for item in self.store.range_query(start, stop) {
            if self.cancel.is_cancelled() {
                return Ok((dispatched, true));
            }

            let (_, record) = item?;
            let due = target_offset(&record, range_start, factor);

            if !sleep_until(t0, due, &self.cancel)? {
                return Ok((dispatched, true));
            }

            self.callbacks.dispatch(&record)?;
            dispatched += 1;
        }

        Ok((dispatched, false))
    }
}

/// Sleep until `due` seconds after `t0`. Never sleeps when already due.
///
/// Returns false if cancelled while waiting. A deadline that cannot be
/// represented is a `Config` error.
fn sleep_until(t0: Instant, due: f64, cancel: &CancelToken) -> Result<bool> {
    if due <= 0.0 {
        return Ok(true);
    }
    let deadline = Duration::try_from_secs_f64(due)
        .ok()
        .and_then(|offset| t0.checked_add(offset))
        .ok_or_else(|| {
            LinkError::Config(format!(
                "record due {} s after replay start is out of range; speed is too slow",
                due
            ))
        })?;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(true);
        }
        if cancel.is_cancelled() {
            return Ok(false);
        }
        std::thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
    }
}
