//! In-process link source.
//!
//! Producer threads push records into a bounded channel; the receiving
//! [`ChannelLink`] dispatches them to its delegates on the thread that
//! calls [`ChannelLink::run`].
//!
//! ```ignore
//! let (tx, mut link) = linkrec::link::channel(256);
//! std::thread::spawn(move || {
//!     for record in device_records() {
//!         if tx.send(record).is_err() {
//!             break;
//!         }
//!     }
//! });
//! link.register_startable(&mut recorder);
//! link.run()?;
//! ```

use crate::delegate::{Delegate, DelegateId, DelegateList, FnDelegate, Slot, Startable};
use crate::error::{LinkError, Result};
use crate::replay::CancelToken;
use crate::types::Record;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// How long a blocked receive waits before rechecking the cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Create a link with room for `capacity` queued records.
pub fn channel<'a>(capacity: usize) -> (LinkSender, ChannelLink<'a>) {
    let (sender, receiver) = bounded(capacity);
    (
        LinkSender { sender },
        ChannelLink {
            receiver,
            delegates: DelegateList::default(),
            cancel: CancelToken::new(),
        },
    )
}

/// Producer half of a link. Clone it to feed the link from several threads.
#[derive(Clone)]
pub struct LinkSender {
    sender: Sender<Record>,
}

impl LinkSender {
    /// Queue a record, blocking while the link is full.
    pub fn send(&self, record: Record) -> Result<()> {
        self.sender
            .send(record)
            .map_err(|_| LinkError::InvalidState("link receiver has been dropped".into()))
    }

    /// Queue a record without blocking. Returns false if the link is full
    /// or closed.
    pub fn try_send(&self, record: Record) -> bool {
        self.sender.try_send(record).is_ok()
    }
}

/// Why [`ChannelLink::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkExit {
    /// Every sender was dropped and the queue drained.
    Disconnected,
    Cancelled,
}

/// Outcome of a link run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkStats {
    pub dispatched: u64,
    pub exit: LinkExit,
}

/// Consumer half of a link.
pub struct ChannelLink<'a> {
    receiver: Receiver<Record>,
    delegates: DelegateList<'a>,
    cancel: CancelToken,
}

impl<'a> ChannelLink<'a> {
    /// Add a delegate that only receives records.
    pub fn register_callback(&mut self, delegate: impl Delegate + 'a) -> DelegateId {
        self.delegates.push(Slot::Plain(Box::new(delegate)))
    }

    /// Add a delegate that is started before the first record and stopped
    /// when the run ends.
    pub fn register_startable(&mut self, delegate: impl Startable + 'a) -> DelegateId {
        self.delegates.push(Slot::Startable(Box::new(delegate)))
    }

    pub fn register_fn<F>(&mut self, f: F) -> DelegateId
    where
        F: FnMut(&Record) -> Result<()> + 'a,
    {
        self.register_callback(FnDelegate(f))
    }

    pub fn remove_callback(&mut self, id: DelegateId) -> bool {
        self.delegates.remove(id)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Records waiting in the queue.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Dispatch incoming records until every sender is gone or the link is
    /// cancelled. A delegate error stops the run and is returned after the
    /// startable delegates have been stopped.
    pub fn run(&mut self) -> Result<LinkStats> {
        self.delegates.start_all()?;
        tracing::info!("link started");

        let result = self.pump();
        let stopped = self.delegates.stop_all();

        let stats = result?;
        stopped?;

        tracing::info!(
            dispatched = stats.dispatched,
            exit = ?stats.exit,
            "link stopped"
        );
        Ok(stats)
    }

    fn pump(&mut self) -> Result<LinkStats> {
        let mut dispatched = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(LinkStats {
                    dispatched,
                    exit: LinkExit::Cancelled,
                });
            }

            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(record) => {
                    self.delegates.dispatch(&record)?;
                    dispatched += 1;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok(LinkStats {
                        dispatched,
                        exit: LinkExit::Disconnected,
                    });
                }
            }
        }
    }
}
