use crate::decode::{DataType, EventType};
use crate::delegate::Delegate;
use crate::error::Result;
use crate::types::Record;

/// Logs every record it receives at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrintDelegate {
    printed: u64,
}

impl PrintDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records logged so far.
    pub fn printed(&self) -> u64 {
        self.printed
    }
}

impl Delegate for PrintDelegate {
    fn update(&mut self, record: &Record) -> Result<()> {
        let data_type = DataType::of(&record.payload);
        tracing::info!(
            timestamp = record.timestamp,
            subsec = record.timestamp_subsec,
            version = record.version,
            data_type = ?data_type,
            event = ?EventType::of(&record.payload),
            len = record.payload.len(),
            "record"
        );
        self.printed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_counts_every_record() {
        let mut printer = PrintDelegate::new();
        printer.update(&Record::new(1, 0.0, 1, vec![])).unwrap();
        printer
            .update(&Record::new(2, 0.5, 1, EventType::NightStart.payload()))
            .unwrap();
        assert_eq!(printer.printed(), 2);
    }

    #[test]
    fn test_records_visible_at_default_filter() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            PrintDelegate::new()
                .update(&Record::new(1234, 0.5, 1, vec![0x80, 1, 2]))
                .unwrap();
        });

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains("timestamp=1234"), "nothing logged: {:?}", output);
    }
}
