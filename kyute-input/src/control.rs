//! Input controls.
//!
//! A control owns a value and a cache of the aspects applied to it. Aspects are resolved lazily,
//! the first time they are asked for:
//!
//! 1. a cached applied aspect is returned as is,
//! 2. otherwise the control's own override hook may supply it (see [`AspectConversion`]),
//! 3. otherwise the aspect definition is applied to the control.
//!
//! The result is cached for the lifetime of the control. Setup callbacks registered for an aspect
//! run once, right after the aspect is resolved.
use crate::{
    applied::{Applied, AppliedAny},
    aspect::{Aspect, AnyAspect, AspectId},
    conversion::AspectConversion,
    error::{CancelReason, ControlError},
    supply::Supply,
    value::ValueTracker,
};
use kyute_common::{Counter, Data};
use smallvec::SmallVec;
use std::{
    any::{type_name, Any},
    cell::RefCell,
    collections::HashMap,
    fmt, mem,
    num::NonZeroU64,
    rc::{Rc, Weak},
};
use tracing::{trace, warn};

static CONTROL_ID_COUNTER: Counter = Counter::new();

/// Control ID.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct ControlId(NonZeroU64);

impl ControlId {
    fn next() -> ControlId {
        ControlId(CONTROL_ID_COUNTER.next_nonzero())
    }

    pub fn to_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "control#{}", self.0)
    }
}

/// Setup callback of an aspect, called with the applied aspect once it is resolved.
pub type SetupFn = Box<dyn FnOnce(&AppliedAny)>;

enum AspectSlot {
    /// Not resolved yet, with the setups waiting for resolution.
    Pending(SmallVec<[SetupFn; 1]>),
    /// Being resolved. Setups registered in the meantime run after resolution.
    ///
    /// Resolving the aspect again in this state panics: its definition, directly or not, needs
    /// its own instance to produce it. Registering a setup needs no instance yet, so it is queued.
    Resolving(SmallVec<[SetupFn; 1]>),
    Resolved(AppliedAny),
}

/// Type-erased control.
///
/// This is what aspect definitions, applied aspects and conversions see of a control.
pub trait AnyControl {
    fn id(&self) -> ControlId;

    fn supply(&self) -> &Supply;

    /// Name of the type of the control's value, for diagnostics.
    fn value_type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn downgrade(&self) -> Weak<dyn AnyControl>;

    /// Resolves an aspect on this control, applying it if necessary.
    fn resolve_any(&self, aspect: &dyn AnyAspect) -> AppliedAny;

    /// Returns the aspect already resolved on this control, without resolving it.
    fn recorded_any(&self, aspect: AspectId) -> Option<AppliedAny>;

    /// Registers a setup callback for an aspect.
    ///
    /// Runs it immediately if the aspect has been resolved already.
    fn setup_any(&self, aspect: AspectId, setup: SetupFn);
}

impl<'a> dyn AnyControl + 'a {
    /// Returns the instance of `aspect` for this control.
    pub fn aspect<I: Clone + 'static>(&self, aspect: &Aspect<I>) -> Option<I> {
        self.applied(aspect).into_instance()
    }

    pub fn applied<I: Clone + 'static>(&self, aspect: &Aspect<I>) -> Applied<I> {
        self.resolve_any(aspect).typed::<I>(aspect.name()).clone()
    }

    /// Recovers the typed control.
    pub fn downcast<V: Data>(&self) -> Result<Control<V>, ControlError> {
        self.as_any()
            .downcast_ref::<ControlInner<V>>()
            .and_then(|inner| inner.this.upgrade())
            .map(Control)
            .ok_or_else(|| ControlError::ValueTypeMismatch {
                expected: type_name::<V>(),
                actual: self.value_type_name(),
            })
    }
}

pub(crate) struct ControlInner<V> {
    id: ControlId,
    this: Weak<ControlInner<V>>,
    value: ValueTracker<V>,
    aspects: RefCell<HashMap<AspectId, AspectSlot>>,
    /// Override hook, consulted before applying an aspect definition.
    local: AspectConversion,
}

impl<V: Data> AnyControl for ControlInner<V> {
    fn id(&self) -> ControlId {
        self.id
    }

    fn supply(&self) -> &Supply {
        self.value.supply()
    }

    fn value_type_name(&self) -> &'static str {
        type_name::<V>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn downgrade(&self) -> Weak<dyn AnyControl> {
        self.this.clone()
    }

    fn resolve_any(&self, aspect: &dyn AnyAspect) -> AppliedAny {
        let id = aspect.id();
        let setups = {
            let mut slots = self.aspects.borrow_mut();
            let slot = slots
                .entry(id)
                .or_insert_with(|| AspectSlot::Pending(SmallVec::new()));
            match slot {
                AspectSlot::Resolved(applied) => return applied.clone(),
                AspectSlot::Resolving(_) => {
                    panic!(
                        "aspect `{}` resolution recursed into itself on {:?}",
                        aspect.name(),
                        self.id
                    )
                }
                AspectSlot::Pending(setups) => {
                    let setups = mem::take(setups);
                    *slot = AspectSlot::Resolving(SmallVec::new());
                    setups
                }
            }
        };

        let applied = match self.local.apply(self, aspect) {
            Some(applied) => applied,
            None => {
                trace!(aspect = aspect.name(), control = ?self.id, "applying aspect");
                aspect.apply_any(self)
            }
        };

        let late_setups = match self.aspects.borrow_mut().insert(id, AspectSlot::Resolved(applied.clone())) {
            Some(AspectSlot::Resolving(setups)) => setups,
            _ => SmallVec::new(),
        };
        for setup in setups.into_iter().chain(late_setups) {
            setup(&applied);
        }
        applied
    }

    fn recorded_any(&self, aspect: AspectId) -> Option<AppliedAny> {
        match self.aspects.borrow().get(&aspect) {
            Some(AspectSlot::Resolved(applied)) => Some(applied.clone()),
            _ => None,
        }
    }

    fn setup_any(&self, aspect: AspectId, setup: SetupFn) {
        let applied = {
            let mut slots = self.aspects.borrow_mut();
            match slots
                .entry(aspect)
                .or_insert_with(|| AspectSlot::Pending(SmallVec::new()))
            {
                AspectSlot::Resolved(applied) => applied.clone(),
                AspectSlot::Pending(setups) | AspectSlot::Resolving(setups) => {
                    setups.push(setup);
                    return;
                }
            }
        };
        setup(&applied);
    }
}

/// Input control holding a value of type `V`.
///
/// Cloning gives another handle to the same control.
pub struct Control<V>(pub(crate) Rc<ControlInner<V>>);

impl<V> Clone for Control<V> {
    fn clone(&self) -> Self {
        Control(self.0.clone())
    }
}

impl<V: fmt::Debug> fmt::Debug for Control<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Control")
            .field("id", &self.0.id)
            .field("value", &self.0.value)
            .finish_non_exhaustive()
    }
}

impl<V: Data> Control<V> {
    /// Creates a control with the given initial value.
    pub fn new(value: V) -> Control<V> {
        Control::with_aspects(value, AspectConversion::none())
    }

    /// Creates a control whose aspects may be overridden by `aspects` before definitions are
    /// applied.
    pub fn with_aspects(value: V, aspects: AspectConversion) -> Control<V> {
        Control::from_tracker(ValueTracker::new(value), aspects)
    }

    /// Creates a control tracking an existing value.
    ///
    /// The control's lifetime is the tracker's supply.
    pub fn from_tracker(value: ValueTracker<V>, aspects: AspectConversion) -> Control<V> {
        let id = ControlId::next();
        trace!(control = ?id, value_type = type_name::<V>(), "new control");
        Control(Rc::new_cyclic(|this| ControlInner {
            id,
            this: this.clone(),
            value,
            aspects: RefCell::new(HashMap::new()),
            local: aspects,
        }))
    }

    pub fn id(&self) -> ControlId {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Control<V>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_any_control(&self) -> &dyn AnyControl {
        &*self.0
    }

    pub fn to_any_control(&self) -> Rc<dyn AnyControl> {
        self.0.clone()
    }

    /// The tracker of the control's value.
    pub fn value(&self) -> &ValueTracker<V> {
        &self.0.value
    }

    /// Returns the current value.
    pub fn it(&self) -> V {
        self.0.value.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        self.0.value.with(f)
    }

    /// Assigns the value. Returns whether it changed.
    pub fn set(&self, value: V) -> bool {
        self.0.value.set(value)
    }

    pub fn try_set(&self, value: V) -> Result<bool, ControlError> {
        self.0.value.try_set(value)
    }

    /// Registers an observer of value changes. See [`ValueTracker::on_change`].
    pub fn on_change(&self, observer: impl Fn(&V, &V) + 'static) -> Supply {
        self.0.value.on_change(observer)
    }

    pub fn supply(&self) -> &Supply {
        self.0.value.supply()
    }

    /// Cuts the control off. Ends its change stream, and those of the controls converted from it.
    pub fn done(&self, reason: CancelReason) -> bool {
        self.supply().off(reason)
    }

    /// Returns the instance of `aspect` for this control.
    ///
    /// The aspect is applied on first request only; later requests return the same instance.
    /// `None` if the aspect is empty for this control.
    pub fn aspect<I: Clone + 'static>(&self, aspect: &Aspect<I>) -> Option<I> {
        self.as_any_control().aspect(aspect)
    }

    /// Returns the applied aspect, with its conversion rule.
    pub fn applied<I: Clone + 'static>(&self, aspect: &Aspect<I>) -> Applied<I> {
        self.as_any_control().applied(aspect)
    }

    /// Defers `setup` until `aspect` is resolved on this control.
    ///
    /// Runs immediately if it has been resolved already. Never runs if the aspect is never
    /// requested. Setups registered for the same aspect run in registration order.
    pub fn setup<I: Clone + 'static>(
        &self,
        aspect: &Aspect<I>,
        setup: impl FnOnce(Option<&I>, &Control<V>) + 'static,
    ) -> &Self {
        let name = aspect.name();
        self.setup_erased(aspect.id(), move |applied, control| {
            setup(applied.typed::<I>(name).instance(), control)
        });
        self
    }

    pub(crate) fn setup_erased(&self, aspect: AspectId, setup: impl FnOnce(&AppliedAny, &Control<V>) + 'static) {
        let this = self.0.this.clone();
        self.0.setup_any(
            aspect,
            Box::new(move |applied| match this.upgrade() {
                Some(inner) => setup(applied, &Control(inner)),
                None => warn!(?aspect, "control dropped before aspect setup"),
            }),
        );
    }
}
