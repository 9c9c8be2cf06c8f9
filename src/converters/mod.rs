//! Consumers that turn a record stream into something else.

mod print;
mod wav;

pub use print::PrintDelegate;
pub use wav::{WaveformToWav, SAMPLES_PER_RECORD, SAMPLE_RATE};
