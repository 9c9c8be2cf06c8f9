//! Consumer contract for dispatched records.
//!
//! Every consumer implements [`Delegate`]. Consumers that want to be told
//! when a session begins and ends also implement [`Startable`] and are
//! registered through the `*_startable` methods, so the capability is
//! known at registration time instead of probed per call.
//!
//! Dispatchers hold boxed delegates. Register a `&mut T` to lend a
//! consumer for the dispatcher's lifetime, or a shared handle
//! (`Rc<RefCell<T>>`, `Arc<Mutex<T>>`) to keep using it alongside.

use crate::error::Result;
use crate::types::Record;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Receives every dispatched record.
pub trait Delegate {
    /// Handle one record. An error aborts the enclosing dispatch loop.
    fn update(&mut self, record: &Record) -> Result<()>;
}

/// Optional session hooks.
pub trait Startable: Delegate {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Adapter turning a closure into a [`Delegate`].
pub struct FnDelegate<F>(pub F);

impl<F> Delegate for FnDelegate<F>
where
    F: FnMut(&Record) -> Result<()>,
{
    fn update(&mut self, record: &Record) -> Result<()> {
        (self.0)(record)
    }
}

impl<T: Delegate + ?Sized> Delegate for &mut T {
    fn update(&mut self, record: &Record) -> Result<()> {
        (**self).update(record)
    }
}

impl<T: Startable + ?Sized> Startable for &mut T {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

impl<T: Delegate + ?Sized> Delegate for Box<T> {
    fn update(&mut self, record: &Record) -> Result<()> {
        (**self).update(record)
    }
}

impl<T: Startable + ?Sized> Startable for Box<T> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

impl<T: Delegate + ?Sized> Delegate for Rc<RefCell<T>> {
    fn update(&mut self, record: &Record) -> Result<()> {
        self.borrow_mut().update(record)
    }
}

impl<T: Startable + ?Sized> Startable for Rc<RefCell<T>> {
    fn start(&mut self) -> Result<()> {
        self.borrow_mut().start()
    }

    fn stop(&mut self) -> Result<()> {
        self.borrow_mut().stop()
    }
}

impl<T: Delegate + ?Sized> Delegate for Arc<Mutex<T>> {
    fn update(&mut self, record: &Record) -> Result<()> {
        self.lock().update(record)
    }
}

impl<T: Startable + ?Sized> Startable for Arc<Mutex<T>> {
    fn start(&mut self) -> Result<()> {
        self.lock().start()
    }

    fn stop(&mut self) -> Result<()> {
        self.lock().stop()
    }
}

/// A registered delegate, with its hooks if it has them.
pub(crate) enum Slot<'a> {
    Plain(Box<dyn Delegate + 'a>),
    Startable(Box<dyn Startable + 'a>),
}

impl<'a> Slot<'a> {
    pub(crate) fn update(&mut self, record: &Record) -> Result<()> {
        match self {
            Slot::Plain(d) => d.update(record),
            Slot::Startable(d) => d.update(record),
        }
    }

    /// `None` when the delegate has no hooks.
    pub(crate) fn hooks(&mut self) -> Option<&mut (dyn Startable + 'a)> {
        match self {
            Slot::Plain(_) => None,
            Slot::Startable(d) => Some(d.as_mut()),
        }
    }
}

/// Identifies a registered delegate for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DelegateId(pub u64);

/// Ordered delegate list shared by the dispatchers.
#[derive(Default)]
pub(crate) struct DelegateList<'a> {
    slots: Vec<(DelegateId, Slot<'a>)>,
    next_id: u64,
}

impl<'a> DelegateList<'a> {
    pub(crate) fn push(&mut self, slot: Slot<'a>) -> DelegateId {
        let id = DelegateId(self.next_id);
        self.next_id += 1;
        self.slots.push((id, slot));
        id
    }

    pub(crate) fn remove(&mut self, id: DelegateId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot_id, _)| *slot_id != id);
        self.slots.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Forward a record to every delegate in registration order.
    pub(crate) fn dispatch(&mut self, record: &Record) -> Result<()> {
        for (_, slot) in self.slots.iter_mut() {
            slot.update(record)?;
        }
        Ok(())
    }

    pub(crate) fn start_all(&mut self) -> Result<()> {
        for (_, slot) in self.slots.iter_mut() {
            if let Some(hooks) = slot.hooks() {
                hooks.start()?;
            }
        }
        Ok(())
    }

    pub(crate) fn stop_all(&mut self) -> Result<()> {
        for (_, slot) in self.slots.iter_mut() {
            if let Some(hooks) = slot.hooks() {
                hooks.stop()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        updates: usize,
        starts: usize,
    }

    impl Delegate for Counter {
        fn update(&mut self, _record: &Record) -> Result<()> {
            self.updates += 1;
            Ok(())
        }
    }

    impl Startable for Counter {
        fn start(&mut self) -> Result<()> {
            self.starts += 1;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_hooks_only_for_startable_slots() {
        let plain = Rc::new(RefCell::new(Counter::default()));
        let hooked = Rc::new(RefCell::new(Counter::default()));

        let mut list = DelegateList::default();
        list.push(Slot::Plain(Box::new(Rc::clone(&plain))));
        list.push(Slot::Startable(Box::new(Rc::clone(&hooked))));

        list.start_all().unwrap();
        list.dispatch(&Record::new(1, 0.0, 1, vec![0])).unwrap();

        assert_eq!(plain.borrow().starts, 0);
        assert_eq!(hooked.borrow().starts, 1);
        assert_eq!(plain.borrow().updates, 1);
        assert_eq!(hooked.borrow().updates, 1);
    }

    #[test]
    fn test_remove_by_id() {
        let mut seen = Vec::new();
        {
            let mut list = DelegateList::default();
            let first = list.push(Slot::Plain(Box::new(FnDelegate(|r: &Record| -> Result<()> {
                seen.push(r.timestamp);
                Ok(())
            }))));
            assert!(list.remove(first));
            assert!(!list.remove(first));
            assert_eq!(list.len(), 0);
            list.dispatch(&Record::new(1, 0.0, 1, vec![])).unwrap();
        }
        assert!(seen.is_empty());
    }
}
