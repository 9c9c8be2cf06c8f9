//! Payload classification for raw link records.
//!
//! The leading payload byte names the data type. Event records carry a
//! little-endian 32-bit event code in bytes `1..5`.

use std::fmt;

/// Data type named by a payload's leading byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Event,
    SliceEnd,
    Version,
    Waveform,
    FrequencyBins,
    Sqi,
    ZeoTimestamp,
    Impedance,
    BadSignal,
    SleepStage,
}

impl DataType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(DataType::Event),
            0x02 => Some(DataType::SliceEnd),
            0x03 => Some(DataType::Version),
            0x80 => Some(DataType::Waveform),
            0x83 => Some(DataType::FrequencyBins),
            0x84 => Some(DataType::Sqi),
            0x8A => Some(DataType::ZeoTimestamp),
            0x97 => Some(DataType::Impedance),
            0x9C => Some(DataType::BadSignal),
            0x9D => Some(DataType::SleepStage),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            DataType::Event => 0x00,
            DataType::SliceEnd => 0x02,
            DataType::Version => 0x03,
            DataType::Waveform => 0x80,
            DataType::FrequencyBins => 0x83,
            DataType::Sqi => 0x84,
            DataType::ZeoTimestamp => 0x8A,
            DataType::Impedance => 0x97,
            DataType::BadSignal => 0x9C,
            DataType::SleepStage => 0x9D,
        }
    }

    /// Data type of a payload, if it is one we know.
    pub fn of(payload: &[u8]) -> Option<Self> {
        payload.first().copied().and_then(Self::from_byte)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Event subtype carried by `Event` records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    NightStart,
    SleepOnset,
    HeadbandDocked,
    HeadbandUnDocked,
    AlarmOff,
    AlarmSnooze,
    AlarmPlay,
    NightEnd,
    NewHeadband,
}

impl EventType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x05 => Some(EventType::NightStart),
            0x07 => Some(EventType::SleepOnset),
            0x0E => Some(EventType::HeadbandDocked),
            0x0F => Some(EventType::HeadbandUnDocked),
            0x10 => Some(EventType::AlarmOff),
            0x11 => Some(EventType::AlarmSnooze),
            0x13 => Some(EventType::AlarmPlay),
            0x15 => Some(EventType::NightEnd),
            0x24 => Some(EventType::NewHeadband),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            EventType::NightStart => 0x05,
            EventType::SleepOnset => 0x07,
            EventType::HeadbandDocked => 0x0E,
            EventType::HeadbandUnDocked => 0x0F,
            EventType::AlarmOff => 0x10,
            EventType::AlarmSnooze => 0x11,
            EventType::AlarmPlay => 0x13,
            EventType::NightEnd => 0x15,
            EventType::NewHeadband => 0x24,
        }
    }

    /// Event type of an `Event` payload. `None` for other data types and
    /// truncated payloads.
    pub fn of(payload: &[u8]) -> Option<Self> {
        if DataType::of(payload) != Some(DataType::Event) || payload.len() < 5 {
            return None;
        }
        let mut code = [0u8; 4];
        code.copy_from_slice(&payload[1..5]);
        Self::from_code(u32::from_le_bytes(code))
    }

    /// Build a minimal `Event` payload for this event type.
    pub fn payload(self) -> Vec<u8> {
        let mut payload = vec![DataType::Event.to_byte()];
        payload.extend_from_slice(&self.code().to_le_bytes());
        payload
    }
}

/// What the dock router cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Undocked,
    Docked,
    Other,
}

/// Classifies payloads for the dock router.
pub trait Classify {
    fn classify(&self, payload: &[u8]) -> Kind;
}

/// Classifier for the link's raw record format.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkDecoder;

impl Classify for LinkDecoder {
    fn classify(&self, payload: &[u8]) -> Kind {
        classify(payload)
    }
}

/// Classify a raw link payload.
pub fn classify(payload: &[u8]) -> Kind {
    match EventType::of(payload) {
        Some(EventType::HeadbandUnDocked) => Kind::Undocked,
        Some(EventType::HeadbandDocked) => Kind::Docked,
        _ => Kind::Other,
    }
}

/// Decode the little-endian `i16` samples of a `Waveform` payload.
///
/// Returns `None` for other data types. At most `max_samples` samples are
/// read; a trailing odd byte is ignored.
pub fn waveform_samples(payload: &[u8], max_samples: usize) -> Option<Vec<i16>> {
    if DataType::of(payload) != Some(DataType::Waveform) {
        return None;
    }
    Some(
        payload[1..]
            .chunks_exact(2)
            .take(max_samples)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dock_events() {
        assert_eq!(classify(&EventType::HeadbandUnDocked.payload()), Kind::Undocked);
        assert_eq!(classify(&EventType::HeadbandDocked.payload()), Kind::Docked);
        assert_eq!(classify(&EventType::NightStart.payload()), Kind::Other);
    }

    #[test]
    fn test_malformed_payloads_are_other() {
        assert_eq!(classify(&[]), Kind::Other);
        assert_eq!(classify(&[0x00, 0x0F]), Kind::Other);
        assert_eq!(classify(&[0x55, 0x0F, 0, 0, 0]), Kind::Other);
        // Docked code behind a non-event type byte
        assert_eq!(classify(&[0x80, 0x0E, 0, 0, 0]), Kind::Other);
    }

    #[test]
    fn test_data_type_byte_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(dt) = DataType::from_byte(byte) {
                assert_eq!(dt.to_byte(), byte);
            }
        }
    }

    #[test]
    fn test_waveform_samples() {
        let mut payload = vec![0x80];
        payload.extend_from_slice(&1i16.to_le_bytes());
        payload.extend_from_slice(&(-2i16).to_le_bytes());
        payload.push(0xAA);

        assert_eq!(waveform_samples(&payload, 128), Some(vec![1, -2]));
        assert_eq!(waveform_samples(&payload, 1), Some(vec![1]));
        assert_eq!(waveform_samples(&EventType::NightEnd.payload(), 128), None);
    }
}
