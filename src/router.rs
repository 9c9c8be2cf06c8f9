//! Dock-gated event routing.
//!
//! The router passes records through to its delegates only while the
//! headband is undocked. Undocking calls `start()` on every startable
//! delegate before the undock record is forwarded; docking forwards the
//! dock record and then calls `stop()`.

use crate::decode::{Classify, Kind, LinkDecoder};
use crate::delegate::{Delegate, DelegateId, DelegateList, Slot, Startable};
use crate::error::Result;
use crate::types::Record;

/// Router state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterState {
    /// Headband docked; records are dropped.
    Inactive,
    /// Headband undocked; records are forwarded.
    Active,
}

/// Forwards records to delegates between an undock and the next dock event.
pub struct EventRouter<'a, C = LinkDecoder> {
    classifier: C,
    delegates: DelegateList<'a>,
    state: RouterState,
}

impl<'a> EventRouter<'a, LinkDecoder> {
    /// Router using the link's own event codes.
    pub fn new() -> Self {
        Self::with_classifier(LinkDecoder)
    }
}

impl<'a> Default for EventRouter<'a, LinkDecoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, C: Classify> EventRouter<'a, C> {
    pub fn with_classifier(classifier: C) -> Self {
        Self {
            classifier,
            delegates: DelegateList::default(),
            state: RouterState::Inactive,
        }
    }

    /// Add a delegate that only receives records.
    pub fn add_delegate(&mut self, delegate: impl Delegate + 'a) -> DelegateId {
        self.delegates.push(Slot::Plain(Box::new(delegate)))
    }

    /// Add a delegate whose `start()`/`stop()` follow undock and dock events.
    pub fn add_startable(&mut self, delegate: impl Startable + 'a) -> DelegateId {
        self.delegates.push(Slot::Startable(Box::new(delegate)))
    }

    /// Remove a delegate. Returns false if it was not registered.
    pub fn remove_delegate(&mut self, id: DelegateId) -> bool {
        self.delegates.remove(id)
    }

    pub fn delegate_count(&self) -> usize {
        self.delegates.len()
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == RouterState::Active
    }

    /// Route one record.
    ///
    /// A repeated undock while active or a dock while inactive changes
    /// nothing. Delegate failures propagate; the state is only changed
    /// once every hook of a transition has succeeded.
    pub fn update(&mut self, record: &Record) -> Result<()> {
        let kind = self.classifier.classify(&record.payload);

        if self.state == RouterState::Inactive && kind == Kind::Undocked {
            tracing::info!(timestamp = record.timestamp, "headband undocked, starting delegates");
            self.delegates.start_all()?;
            self.state = RouterState::Active;
        }

        if self.state == RouterState::Inactive {
            return Ok(());
        }

        self.delegates.dispatch(record)?;

        if kind == Kind::Docked {
            tracing::info!(timestamp = record.timestamp, "headband docked, stopping delegates");
            self.delegates.stop_all()?;
            self.state = RouterState::Inactive;
        }
        Ok(())
    }
}

impl<C: Classify> Delegate for EventRouter<'_, C> {
    fn update(&mut self, record: &Record) -> Result<()> {
        EventRouter::update(self, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DataType, EventType};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Classifier reading the kind straight from the first payload byte.
    struct ByteClassifier;

    impl Classify for ByteClassifier {
        fn classify(&self, payload: &[u8]) -> Kind {
            match payload.first() {
                Some(b'U') => Kind::Undocked,
                Some(b'D') => Kind::Docked,
                _ => Kind::Other,
            }
        }
    }

    #[derive(Default)]
    struct Journal {
        entries: Vec<String>,
    }

    impl Delegate for Journal {
        fn update(&mut self, record: &Record) -> Result<()> {
            self.entries
                .push(format!("update:{}", String::from_utf8_lossy(&record.payload)));
            Ok(())
        }
    }

    impl Startable for Journal {
        fn start(&mut self) -> Result<()> {
            self.entries.push("start".into());
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.entries.push("stop".into());
            Ok(())
        }
    }

    fn feed<C: Classify>(router: &mut EventRouter<'_, C>, payloads: &[&str]) {
        for (i, payload) in payloads.iter().enumerate() {
            router
                .update(&Record::new(i as u32, 0.0, 1, payload.as_bytes().to_vec()))
                .unwrap();
        }
    }

    #[test]
    fn test_redundant_events_keep_state() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut router = EventRouter::with_classifier(ByteClassifier);
        router.add_startable(Rc::clone(&journal));

        feed(&mut router, &["D", "w", "U", "U", "D", "D"]);

        assert_eq!(
            journal.borrow().entries,
            vec!["start", "update:U", "update:U", "update:D", "stop"]
        );
        assert_eq!(router.state(), RouterState::Inactive);
    }

    #[test]
    fn test_plain_delegate_skips_hooks() {
        let plain = Rc::new(RefCell::new(Journal::default()));
        let mut router = EventRouter::with_classifier(ByteClassifier);
        router.add_delegate(Rc::clone(&plain));

        feed(&mut router, &["U", "w", "D"]);

        assert_eq!(
            plain.borrow().entries,
            vec!["update:U", "update:w", "update:D"]
        );
    }

    #[test]
    fn test_removed_delegate_stops_receiving() {
        let journal = Rc::new(RefCell::new(Journal::default()));
        let mut router = EventRouter::with_classifier(ByteClassifier);
        let id = router.add_delegate(Rc::clone(&journal));

        feed(&mut router, &["U", "a"]);
        assert!(router.remove_delegate(id));
        feed(&mut router, &["b"]);

        assert_eq!(journal.borrow().entries, vec!["update:U", "update:a"]);
        assert!(router.is_active());
    }

    #[test]
    fn test_link_decoder_gating() {
        let mut seen = Vec::new();
        {
            let mut router = EventRouter::new();
            router.add_delegate(crate::delegate::FnDelegate(|r: &Record| -> Result<()> {
                seen.push(DataType::of(&r.payload));
                Ok(())
            }));

            let waveform = vec![0x80, 0x01, 0x00];
            for payload in [
                waveform.clone(),
                EventType::HeadbandUnDocked.payload(),
                waveform.clone(),
                EventType::HeadbandDocked.payload(),
                waveform,
            ] {
                router.update(&Record::new(0, 0.0, 1, payload)).unwrap();
            }
        }

        assert_eq!(
            seen,
            vec![
                Some(DataType::Event),
                Some(DataType::Waveform),
                Some(DataType::Event)
            ]
        );
    }
}
