//! Value tracking.
use crate::{error::ControlError, supply::Supply};
use kyute_common::Data;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::{
    cell::{Cell, RefCell},
    fmt, mem,
    rc::Rc,
};

new_key_type! {
    struct ObserverKey;
}

type Observer<T> = Rc<dyn Fn(&T, &T)>;

struct ObserverEntry<T> {
    /// Registration sequence number.
    seq: u64,
    observer: Observer<T>,
    /// Kept alive here: the subscription ends with the tracker, not with the caller's handle.
    subscription: Supply,
}

struct TrackerInner<T> {
    value: RefCell<T>,
    observers: RefCell<SlotMap<ObserverKey, ObserverEntry<T>>>,
    next_seq: Cell<u64>,
    /// Incremented on every change of the value.
    revision: Cell<u64>,
    supply: Supply,
}

/// A shared value with a change stream.
///
/// Observers receive the new value and the previous one.
pub struct ValueTracker<T>(Rc<TrackerInner<T>>);

impl<T> Clone for ValueTracker<T> {
    fn clone(&self) -> Self {
        ValueTracker(self.0.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ValueTracker")
            .field("value", &*self.0.value.borrow())
            .field("revision", &self.0.revision.get())
            .finish_non_exhaustive()
    }
}

impl<T: Data> ValueTracker<T> {
    pub fn new(initial_value: T) -> ValueTracker<T> {
        ValueTracker::with_supply(initial_value, Supply::new())
    }

    /// Creates a tracker whose change stream ends when `supply` is cut off.
    pub fn with_supply(initial_value: T, supply: Supply) -> ValueTracker<T> {
        ValueTracker(Rc::new(TrackerInner {
            value: RefCell::new(initial_value),
            observers: RefCell::new(SlotMap::with_key()),
            next_seq: Cell::new(0),
            revision: Cell::new(0),
            supply,
        }))
    }

    pub fn supply(&self) -> &Supply {
        &self.0.supply
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        self.0.value.borrow().clone()
    }

    /// Calls `f` with a reference to the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.value.borrow())
    }

    /// Number of changes so far.
    pub fn revision(&self) -> u64 {
        self.0.revision.get()
    }

    /// Assigns the value and notifies the observers.
    ///
    /// Returns `false` without notifying anyone if the new value is the same as the current one.
    /// Once the tracker's supply is cut off, the value is still assigned but nobody is notified.
    pub fn set(&self, new_value: T) -> bool {
        let old_value = {
            let mut value = self.0.value.borrow_mut();
            if value.same(&new_value) {
                return false;
            }
            mem::replace(&mut *value, new_value.clone())
        };
        self.0.revision.set(self.0.revision.get() + 1);
        self.notify(&new_value, &old_value);
        true
    }

    /// Like [`ValueTracker::set`], but fails if the tracker's supply has been cut off.
    pub fn try_set(&self, new_value: T) -> Result<bool, ControlError> {
        match self.0.supply.reason() {
            Some(reason) => Err(ControlError::Cancelled(reason)),
            None => Ok(self.set(new_value)),
        }
    }

    /// Registers an observer of value changes.
    ///
    /// Cutting the returned supply off unsubscribes. The subscription is also cut off along with
    /// the tracker's own supply, whether or not the returned handle is kept.
    pub fn on_change(&self, observer: impl Fn(&T, &T) + 'static) -> Supply {
        let subscription = Supply::new();
        if let Some(reason) = self.0.supply.reason() {
            subscription.off(reason);
            return subscription;
        }

        let seq = self.0.next_seq.get();
        self.0.next_seq.set(seq + 1);
        let key = self.0.observers.borrow_mut().insert(ObserverEntry {
            seq,
            observer: Rc::new(observer),
            subscription: subscription.clone(),
        });

        let inner = Rc::downgrade(&self.0);
        subscription.when_off(move |_| {
            if let Some(inner) = inner.upgrade() {
                let removed = inner.observers.borrow_mut().remove(key);
                drop(removed);
            }
        });
        subscription.needs(&self.0.supply);
        subscription
    }

    fn notify(&self, new_value: &T, old_value: &T) {
        if self.0.supply.is_off() {
            return;
        }
        // snapshot: observers may subscribe, unsubscribe or assign the value again
        let mut observers: SmallVec<[(u64, ObserverKey, Observer<T>); 4]> = self
            .0
            .observers
            .borrow()
            .iter()
            .map(|(key, entry)| (entry.seq, key, entry.observer.clone()))
            .collect();
        observers.sort_by_key(|(seq, _, _)| *seq);
        for (_, key, observer) in observers {
            // unsubscribed by an earlier observer
            if !self.0.observers.borrow().contains_key(key) {
                continue;
            }
            observer(new_value, old_value);
        }
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.0.observers.borrow().len()
    }
}
