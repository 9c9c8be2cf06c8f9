use crate::decode::waveform_samples;
use crate::delegate::Delegate;
use crate::error::{LinkError, Result};
use crate::types::Record;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Samples carried by one waveform record.
pub const SAMPLES_PER_RECORD: usize = 128;

/// Native waveform sample rate in Hz.
pub const SAMPLE_RATE: u32 = 128;

const BITS_PER_SAMPLE: u16 = 16;
const CHANNELS: u16 = 1;

/// Collects raw waveform samples and writes them out as a WAV file.
///
/// No filtering is applied; mains hum is recorded as-is. A speedup of
/// around 200 makes the signal audible.
#[derive(Debug, Default)]
pub struct WaveformToWav {
    samples: Vec<i16>,
}

impl WaveformToWav {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples collected since the last write.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Write the collected samples as mono 16-bit PCM at
    /// `SAMPLE_RATE * speedup` Hz, then clear them.
    pub fn write(&mut self, path: impl AsRef<Path>, speedup: u32) -> Result<()> {
        let path = path.as_ref();
        let rate = SAMPLE_RATE
            .checked_mul(speedup)
            .filter(|&rate| rate > 0)
            .ok_or_else(|| {
                LinkError::Config(format!("invalid WAV speedup: {}", speedup))
            })?;

        let mut out = BufWriter::new(File::create(path)?);
        write_wav(&mut out, &self.samples, rate)?;
        out.flush()?;

        tracing::info!(
            path = %path.display(),
            samples = self.samples.len(),
            rate,
            "WAV file written"
        );
        self.samples.clear();
        Ok(())
    }
}

impl Delegate for WaveformToWav {
    fn update(&mut self, record: &Record) -> Result<()> {
        if let Some(samples) = waveform_samples(&record.payload, SAMPLES_PER_RECORD) {
            self.samples.extend_from_slice(&samples);
        }
        Ok(())
    }
}

/// RIFF/WAVE header followed by little-endian PCM frames.
fn write_wav<W: Write>(out: &mut W, samples: &[i16], rate: u32) -> Result<()> {
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = rate * block_align as u32;
    let data_len = u32::try_from(samples.len() * block_align as usize)
        .map_err(|_| LinkError::Range("too many samples for a WAV file".into()))?;

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_len).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&CHANNELS.to_le_bytes())?;
    out.write_all(&rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    for sample in samples {
        out.write_all(&sample.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::EventType;
    use tempfile::TempDir;

    fn waveform(samples: &[i16]) -> Record {
        let mut payload = vec![0x80];
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        Record::new(0, 0.0, 1, payload)
    }

    #[test]
    fn test_keeps_only_waveforms() {
        let mut wav = WaveformToWav::new();
        wav.update(&waveform(&[1, 2, 3])).unwrap();
        wav.update(&Record::new(0, 0.0, 1, EventType::NightStart.payload()))
            .unwrap();
        wav.update(&waveform(&[-4])).unwrap();

        assert_eq!(wav.samples(), &[1, 2, 3, -4]);
    }

    #[test]
    fn test_caps_samples_per_record() {
        let mut wav = WaveformToWav::new();
        wav.update(&waveform(&[7; 200])).unwrap();
        assert_eq!(wav.samples().len(), SAMPLES_PER_RECORD);
    }

    #[test]
    fn test_write_header_and_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wave.wav");

        let mut wav = WaveformToWav::new();
        wav.update(&waveform(&[1, -1])).unwrap();
        wav.write(&path, 200).unwrap();
        assert!(wav.samples().is_empty());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 4);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 128 * 200);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 4);
        assert_eq!(i16::from_le_bytes([bytes[46], bytes[47]]), -1);
    }

    #[test]
    fn test_zero_speedup_rejected() {
        let dir = TempDir::new().unwrap();
        let mut wav = WaveformToWav::new();
        let result = wav.write(dir.path().join("x.wav"), 0);
        assert!(matches!(result, Err(LinkError::Config(_))));
    }
}
