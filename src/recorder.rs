//! Recording sessions.

use crate::delegate::{Delegate, Startable};
use crate::error::{LinkError, Result};
use crate::store::{StoreConfig, WritableStore};
use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Recorder configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory for recordings started without an explicit destination.
    pub base_dir: PathBuf,

    /// File name prefix for generated destinations.
    pub file_prefix: String,

    /// 0 disables compression, 9 is the maximum level.
    pub compression_level: u8,

    /// Checksum recorded data.
    pub checksum: bool,

    /// Expected session length in hours.
    pub expected_hours: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            file_prefix: "linkdata".to_string(),
            compression_level: 9,
            checksum: true,
            expected_hours: 8.0,
        }
    }
}

impl RecorderConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LinkError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            compression_level: self.compression_level,
            checksum: self.checksum,
            expected_hours: self.expected_hours,
            chunk_rows: None,
        }
    }

    /// Destination for a session started at `now`:
    /// `<base_dir>/<prefix>_<YYYY-MM-DDTHH-MM-SS>.lrs`, made absolute.
    pub fn session_path(&self, now: chrono::DateTime<chrono::Local>) -> Result<PathBuf> {
        let name = format!("{}_{}.lrs", self.file_prefix, now.format("%Y-%m-%dT%H-%M-%S"));
        let path = self.base_dir.join(name);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }
}

/// Outcome of a finished session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub records: u64,

    /// Last minus first timestamp. `None` when nothing was recorded.
    pub duration_secs: Option<i64>,
}

/// Records a link stream into a store, one session at a time.
///
/// ```ignore
/// let mut recorder = Recorder::new(RecorderConfig::default());
/// recorder.start(Some(Path::new("night.lrs")))?;
/// link.register_callback(&mut recorder);
/// link.run()?;
/// recorder.stop()?;
/// ```
pub struct Recorder {
    config: RecorderConfig,
    session: Option<WritableStore>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Path of the session in progress.
    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path())
    }

    /// Start recording to `destination`, or to a timestamped store under
    /// the configured base directory.
    pub fn start(&mut self, destination: Option<&Path>) -> Result<PathBuf> {
        if let Some(current) = &self.session {
            return Err(LinkError::InvalidState(format!(
                "already recording to {}",
                current.path().display()
            )));
        }

        let path = match destination {
            Some(path) => path.to_path_buf(),
            None => self.config.session_path(chrono::Local::now())?,
        };

        let store = WritableStore::create(&path, &self.config.store_config())?;
        tracing::info!(path = %path.display(), "recording started");

        self.session = Some(store);
        Ok(path)
    }

    /// Append a record to the session. Does nothing when not recording.
    pub fn update(&mut self, record: &Record) -> Result<()> {
        match self.session.as_mut() {
            Some(store) => store.append(record),
            None => Ok(()),
        }
    }

    /// End the session. Returns `None` if no session was running.
    pub fn stop(&mut self) -> Result<Option<RecordingSummary>> {
        let mut store = match self.session.take() {
            Some(store) => store,
            None => return Ok(None),
        };

        store.flush()?;
        let duration_secs = if store.is_empty() {
            None
        } else {
            Some(store.duration()?)
        };
        store.close()?;

        let summary = RecordingSummary {
            path: store.path().to_path_buf(),
            records: store.len(),
            duration_secs,
        };

        match summary.duration_secs {
            Some(secs) => tracing::info!(
                path = %summary.path.display(),
                records = summary.records,
                "recording complete, {} seconds of data recorded",
                secs
            ),
            None => tracing::info!(path = %summary.path.display(), "recording complete, no data recorded"),
        }

        Ok(Some(summary))
    }
}

impl Delegate for Recorder {
    fn update(&mut self, record: &Record) -> Result<()> {
        Recorder::update(self, record)
    }
}

impl Startable for Recorder {
    fn start(&mut self) -> Result<()> {
        Recorder::start(self, None).map(|_| ())
    }

    fn stop(&mut self) -> Result<()> {
        Recorder::stop(self).map(|_| ())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("failed to stop recording: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn recorder_in(dir: &TempDir) -> Recorder {
        Recorder::new(RecorderConfig {
            base_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn test_session_path_pattern() {
        let config = RecorderConfig {
            base_dir: PathBuf::from("/data"),
            ..Default::default()
        };
        let now = chrono::Local.with_ymd_and_hms(2011, 6, 19, 23, 35, 24).unwrap();
        assert_eq!(
            config.session_path(now).unwrap(),
            PathBuf::from("/data/linkdata_2011-06-19T23-35-24.lrs")
        );
    }

    #[test]
    fn test_relative_base_dir_made_absolute() {
        let config = RecorderConfig::default();
        let path = config.session_path(chrono::Local::now()).unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recorder_in(&dir);
        recorder.start(Some(&dir.path().join("a.lrs"))).unwrap();

        let result = recorder.start(Some(&dir.path().join("b.lrs")));
        assert!(matches!(result, Err(LinkError::InvalidState(_))));
        assert_eq!(recorder.current_path(), Some(dir.path().join("a.lrs").as_path()));
    }

    #[test]
    fn test_empty_session_has_no_duration() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recorder_in(&dir);
        recorder.start(Some(&dir.path().join("empty.lrs"))).unwrap();

        let summary = recorder.stop().unwrap().unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(summary.duration_secs, None);
    }

    #[test]
    fn test_generated_destination() {
        let dir = TempDir::new().unwrap();
        let mut recorder = recorder_in(&dir);
        let path = recorder.start(None).unwrap();

        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
        recorder.stop().unwrap();
    }

    #[test]
    fn test_config_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recorder.json");
        fs::write(&path, r#"{ "compression_level": 0, "file_prefix": "night" }"#).unwrap();

        let config = RecorderConfig::from_json_file(&path).unwrap();
        assert_eq!(config.compression_level, 0);
        assert_eq!(config.file_prefix, "night");
        assert!(config.checksum);
    }
}
