//! Core types shared by the store, recorder and replay engine.

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single timestamped record from the link.
///
/// Immutable once ingested. The payload is opaque to the store; its first
/// byte identifies the data type for consumers that care (see [`crate::decode`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Whole seconds on the device clock.
    pub timestamp: u32,

    /// Fractional seconds past `timestamp`.
    pub timestamp_subsec: f32,

    /// Protocol version reported by the link.
    pub version: u8,

    /// Raw record bytes.
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(timestamp: u32, timestamp_subsec: f32, version: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            timestamp_subsec,
            version,
            payload: payload.into(),
        }
    }

    /// Timestamp in seconds including the fractional part.
    pub fn time(&self) -> f64 {
        self.timestamp as f64 + self.timestamp_subsec as f64
    }
}

/// Replay pacing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Speed {
    /// Dispatch back-to-back without sleeping.
    Max,
    /// Multiple of real time (2.0 replays twice as fast).
    Multiple(f64),
}

impl Speed {
    /// Validated multiple of real time. Infinity is treated as [`Speed::Max`].
    pub fn multiple(factor: f64) -> Result<Self> {
        if factor.is_infinite() && factor > 0.0 {
            return Ok(Speed::Max);
        }
        if !factor.is_finite() || factor <= 0.0 {
            return Err(LinkError::Config(format!(
                "replay speed must be a positive multiple, got {}",
                factor
            )));
        }
        Ok(Speed::Multiple(factor))
    }

    pub fn realtime() -> Self {
        Speed::Multiple(1.0)
    }

    pub fn is_paced(&self) -> bool {
        matches!(self, Speed::Multiple(_))
    }
}

impl Default for Speed {
    fn default() -> Self {
        Speed::realtime()
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speed::Max => write!(f, "max"),
            Speed::Multiple(x) => write!(f, "{}x", x),
        }
    }
}

impl FromStr for Speed {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") || s.eq_ignore_ascii_case("inf") {
            return Ok(Speed::Max);
        }
        let factor: f64 = s
            .trim_end_matches(|c| c == 'x' || c == 'X')
            .parse()
            .map_err(|_| LinkError::Config(format!("invalid replay speed: {:?}", s)))?;
        Speed::multiple(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_time() {
        let record = Record::new(100, 0.25, 1, b"a".to_vec());
        assert_eq!(record.time(), 100.25);
    }

    #[test]
    fn test_speed_parsing() {
        assert_eq!("max".parse::<Speed>().unwrap(), Speed::Max);
        assert_eq!("INF".parse::<Speed>().unwrap(), Speed::Max);
        assert_eq!("2.0".parse::<Speed>().unwrap(), Speed::Multiple(2.0));
        assert_eq!("4x".parse::<Speed>().unwrap(), Speed::Multiple(4.0));
        assert_eq!("inf".parse::<Speed>().unwrap(), Speed::Max);
    }

    #[test]
    fn test_speed_rejects_non_positive() {
        assert!(matches!("0".parse::<Speed>(), Err(LinkError::Config(_))));
        assert!(matches!("-1.5".parse::<Speed>(), Err(LinkError::Config(_))));
        assert!(matches!("fast".parse::<Speed>(), Err(LinkError::Config(_))));
        assert!(matches!(Speed::multiple(f64::NAN), Err(LinkError::Config(_))));
        assert_eq!(Speed::multiple(f64::INFINITY).unwrap(), Speed::Max);
    }
}
