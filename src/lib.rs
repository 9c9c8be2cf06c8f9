//! # linkrec
//!
//! Record and replay for a timestamped sensor link.
//!
//! ## Core Concepts
//!
//! - **Records**: timestamped opaque payloads, appended in arrival order
//! - **Stores**: a fixed-width metadata table plus a chunked payload log,
//!   row-aligned and optionally compressed and checksummed
//! - **Delegates**: consumers receiving every dispatched record, optionally
//!   with `start`/`stop` session hooks
//! - **Replay**: unpaced or paced playback of a store to delegates
//! - **Routing**: forwarding gated on headband dock/undock events
//!
//! ## Example
//!
//! ```ignore
//! use linkrec::{Recorder, RecorderConfig, ReplayEngine, Speed};
//!
//! let mut recorder = Recorder::new(RecorderConfig::default());
//! let path = recorder.start(None)?;
//! recorder.update(&Record::new(100, 0.0, 1, payload))?;
//! recorder.stop()?;
//!
//! let mut engine = ReplayEngine::open(&path)?;
//! engine.register_fn(|record| {
//!     println!("{} {} bytes", record.timestamp, record.payload.len());
//!     Ok(())
//! });
//! engine.run(Speed::multiple(2.0)?, None, None)?;
//! ```

pub mod converters;
pub mod decode;
pub mod delegate;
pub mod error;
pub mod link;
pub mod recorder;
pub mod records;
pub mod replay;
pub mod router;
pub mod store;
pub mod types;

// Re-exports
pub use converters::{PrintDelegate, WaveformToWav};
pub use decode::{Classify, DataType, EventType, Kind, LinkDecoder};
pub use delegate::{Delegate, DelegateId, FnDelegate, Startable};
pub use error::{LinkError, Result};
pub use link::{ChannelLink, LinkExit, LinkSender, LinkStats};
pub use recorder::{Recorder, RecorderConfig, RecordingSummary};
pub use replay::{CancelToken, Progress, ReplayEngine, ReplayStats};
pub use router::{EventRouter, RouterState};
pub use store::{RangeQuery, ReadableStore, StoreConfig, StoreInfo, WritableStore};
pub use types::*;
