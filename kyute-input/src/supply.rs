//! Cancellable lifecycle tokens.
use crate::error::CancelReason;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::{
    cell::RefCell,
    fmt, mem,
    rc::{Rc, Weak},
};
use tracing::debug;

new_key_type! {
    struct CallbackKey;
}

type OffCallback = Box<dyn FnOnce(&CancelReason)>;

enum SupplyState {
    On {
        /// Callbacks, with their registration sequence number.
        callbacks: SlotMap<CallbackKey, (u64, OffCallback)>,
        next_seq: u64,
    },
    Off(CancelReason),
}

struct SupplyInner {
    state: RefCell<SupplyState>,
    /// Callbacks this supply has registered on the supplies it needs.
    upstream: RefCell<SmallVec<[(Weak<SupplyInner>, CallbackKey); 1]>>,
}

impl SupplyInner {
    /// Registers a callback, or gives it back with the reason if already off.
    fn register(&self, callback: OffCallback) -> Result<CallbackKey, (OffCallback, CancelReason)> {
        match &mut *self.state.borrow_mut() {
            SupplyState::On { callbacks, next_seq } => {
                let seq = *next_seq;
                *next_seq += 1;
                Ok(callbacks.insert((seq, callback)))
            }
            SupplyState::Off(reason) => Err((callback, reason.clone())),
        }
    }

    fn deregister(&self, key: CallbackKey) {
        let removed = match &mut *self.state.borrow_mut() {
            SupplyState::On { callbacks, .. } => callbacks.remove(key),
            SupplyState::Off(_) => None,
        };
        drop(removed);
    }

    fn off(&self, reason: CancelReason) -> bool {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            match mem::replace(&mut *state, SupplyState::Off(reason.clone())) {
                SupplyState::On { callbacks, .. } => callbacks,
                SupplyState::Off(previous) => {
                    *state = SupplyState::Off(previous);
                    return false;
                }
            }
        };

        let upstream = mem::take(&mut *self.upstream.borrow_mut());
        for (supply, key) in upstream {
            if let Some(supply) = supply.upgrade() {
                supply.deregister(key);
            }
        }

        let mut callbacks: SmallVec<[(u64, OffCallback); 2]> = callbacks.into_iter().map(|(_, entry)| entry).collect();
        callbacks.sort_by_key(|(seq, _)| *seq);
        debug!(%reason, callbacks = callbacks.len(), "supply cut off");
        for (_, callback) in callbacks {
            callback(&reason);
        }
        true
    }
}

impl Drop for SupplyInner {
    fn drop(&mut self) {
        self.off(CancelReason::Off);
    }
}

/// Lifecycle token of controls, subscriptions and aspect instances.
///
/// A supply is cut off at most once. Cutting it off runs the callbacks registered with
/// [`Supply::when_off`], in registration order. Clones share the same state, and dropping the
/// last clone cuts the supply off.
#[derive(Clone)]
pub struct Supply(Rc<SupplyInner>);

impl Default for Supply {
    fn default() -> Self {
        Supply::new()
    }
}

impl fmt::Debug for Supply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0.state.borrow() {
            SupplyState::On { callbacks, .. } => f.debug_tuple("Supply::On").field(&callbacks.len()).finish(),
            SupplyState::Off(reason) => f.debug_tuple("Supply::Off").field(reason).finish(),
        }
    }
}

impl Supply {
    /// Creates a new supply that is on.
    pub fn new() -> Supply {
        Supply(Rc::new(SupplyInner {
            state: RefCell::new(SupplyState::On {
                callbacks: SlotMap::with_key(),
                next_seq: 0,
            }),
            upstream: RefCell::new(SmallVec::new()),
        }))
    }

    /// Returns whether this supply has been cut off.
    pub fn is_off(&self) -> bool {
        matches!(&*self.0.state.borrow(), SupplyState::Off(_))
    }

    /// Returns the reason this supply has been cut off with, if it has been.
    pub fn reason(&self) -> Option<CancelReason> {
        match &*self.0.state.borrow() {
            SupplyState::On { .. } => None,
            SupplyState::Off(reason) => Some(reason.clone()),
        }
    }

    /// Cuts this supply off.
    ///
    /// Returns `false` if it was already off, in which case nothing happens. Otherwise this supply
    /// stops depending on the supplies it needs.
    pub fn off(&self, reason: CancelReason) -> bool {
        self.0.off(reason)
    }

    /// Registers a callback to run when this supply is cut off.
    ///
    /// Runs the callback immediately if the supply is already off.
    pub fn when_off(&self, callback: impl FnOnce(&CancelReason) + 'static) -> &Self {
        if let Err((callback, reason)) = self.0.register(Box::new(callback)) {
            callback(&reason);
        }
        self
    }

    /// Makes this supply depend on `other`: cutting `other` off cuts this one off with the same
    /// reason. The reverse does not hold.
    ///
    /// The dependency ends when this supply is cut off.
    pub fn needs(&self, other: &Supply) -> &Self {
        if self.is_off() {
            return self;
        }
        let this = Rc::downgrade(&self.0);
        let cut_off = Box::new(move |reason: &CancelReason| {
            if let Some(this) = this.upgrade() {
                this.off(reason.clone());
            }
        });
        match other.0.register(cut_off) {
            Ok(key) => self.0.upstream.borrow_mut().push((Rc::downgrade(&other.0), key)),
            Err((_, reason)) => {
                self.off(reason);
            }
        }
        self
    }

    /// Creates a new supply depending on this one.
    pub fn derive(&self) -> Supply {
        let supply = Supply::new();
        supply.needs(self);
        supply
    }

    #[cfg(test)]
    pub(crate) fn callback_count(&self) -> usize {
        match &*self.0.state.borrow() {
            SupplyState::On { callbacks, .. } => callbacks.len(),
            SupplyState::Off(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Supply;
    use crate::error::CancelReason;
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn callbacks_run_once_in_order() {
        let log = Rc::new(RefCell::new(vec![]));
        let supply = Supply::new();
        for i in 0..3 {
            let log = log.clone();
            supply.when_off(move |_| log.borrow_mut().push(i));
        }
        assert!(supply.off(CancelReason::Off));
        assert!(!supply.off(CancelReason::message("again")));
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(supply.reason(), Some(CancelReason::Off));
    }

    #[test]
    fn late_callback_runs_immediately() {
        let supply = Supply::new();
        supply.off(CancelReason::message("gone"));
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        supply.when_off(move |reason| *seen2.borrow_mut() = Some(reason.clone()));
        assert_eq!(*seen.borrow(), Some(CancelReason::message("gone")));
    }

    #[test]
    fn needs_is_one_way() {
        let parent = Supply::new();
        let child = parent.derive();
        child.off(CancelReason::Off);
        assert!(!parent.is_off());

        let child = parent.derive();
        parent.off(CancelReason::message("parent gone"));
        assert_eq!(child.reason(), Some(CancelReason::message("parent gone")));
    }

    #[test]
    fn needs_ends_with_dependent() {
        let parent = Supply::new();
        for _ in 0..100 {
            let child = parent.derive();
            assert_eq!(parent.callback_count(), 1);
            child.off(CancelReason::Off);
        }
        assert_eq!(parent.callback_count(), 0);

        // dropping the last handle cuts the supply off, too
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        let child = parent.derive();
        child.when_off(move |reason| *seen2.borrow_mut() = Some(reason.clone()));
        drop(child);
        assert_eq!(*seen.borrow(), Some(CancelReason::Off));
        assert_eq!(parent.callback_count(), 0);
        assert!(!parent.is_off());
    }

    #[test]
    fn needs_off_supply() {
        let parent = Supply::new();
        parent.off(CancelReason::message("gone"));
        let child = parent.derive();
        assert_eq!(child.reason(), Some(CancelReason::message("gone")));
    }
}
