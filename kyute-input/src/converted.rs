//! Converted controls.
//!
//! A converted control derives its value from a source control through a [`Conversion`], and
//! keeps both values in sync:
//!
//! - a change of the source value is converted and assigned to the converted control,
//! - an assignment of the converted value is converted back and assigned to the source.
//!
//! Propagations are told apart by the revision number of the value trackers: the assignment a
//! propagation makes is not propagated back, but a listener correcting the value during
//! propagation is, exactly once.
use crate::{
    control::Control,
    conversion::{AspectConversion, Conversion},
    value::ValueTracker,
};
use kyute_common::Data;
use std::{
    cell::Cell,
    rc::{Rc, Weak},
};
use tracing::trace;

/// Tracker revisions produced by the assignments of an ongoing propagation.
#[derive(Default)]
struct ValueSync {
    source_echo: Cell<Option<u64>>,
    target_echo: Cell<Option<u64>>,
}

/// Assigns `value` to `tracker`, recording the revision this assignment produces in `echo`.
fn propagate<T: Data>(tracker: &ValueTracker<T>, value: T, echo: &Cell<Option<u64>>) {
    echo.set(Some(tracker.revision() + 1));
    tracker.set(value);
    echo.set(None);
}

/// Whether a change notification of `control` should be propagated.
///
/// Echoes of the propagation's own assignment are not, and neither are stale notifications,
/// delivered after a nested change has been made (and propagated) already.
fn should_propagate<T: Data>(control: &Control<T>, new_value: &T, echo: &Cell<Option<u64>>) -> bool {
    let revision = control.value().revision();
    if echo.get() == Some(revision) {
        trace!(revision, control = ?control.id(), "skipping echo");
        return false;
    }
    control.with(|current| current.same(new_value))
}

impl<V: Data> Control<V> {
    /// Creates a control converted from this one.
    ///
    /// The converted control resolves its aspects with the conversion's overrides first. When
    /// they decline, the aspect applied to this control is converted to the new one.
    ///
    /// Cutting this control off cuts the converted one off, but not the reverse.
    pub fn convert<W: Data>(&self, conversion: Conversion<V, W>) -> Control<W> {
        let Conversion {
            to_target,
            to_source,
            aspects,
        } = conversion;

        let supply = self.supply().derive();
        let value = ValueTracker::with_supply(self.with(|value| to_target(value)), supply);

        let source = self.clone();
        let from_source = AspectConversion::new(move |target, aspect| {
            let applied = source.as_any_control().resolve_any(aspect);
            trace!(
                aspect = aspect.name(),
                source = ?source.id(),
                target = ?target.id(),
                "converting aspect"
            );
            Some(aspect.convert_any(&applied, target))
        });

        let converted = Control::from_tracker(value, aspects.and(from_source));
        sync_values(self, &converted, to_target, to_source);
        converted
    }

    /// Creates a control converted from this one, with a conversion built from this control.
    pub fn convert_with<W: Data>(&self, factory: impl FnOnce(&Control<V>) -> Conversion<V, W>) -> Control<W> {
        self.convert(factory(self))
    }

    /// Creates a control with the same value as this one, and the given aspect overrides.
    pub fn convert_aspects(&self, aspects: AspectConversion) -> Control<V> {
        self.convert(Conversion::from(aspects))
    }
}

fn sync_values<V: Data, W: Data>(
    source: &Control<V>,
    target: &Control<W>,
    to_target: Rc<dyn Fn(&V) -> W>,
    to_source: Rc<dyn Fn(&W) -> V>,
) {
    let sync = Rc::new(ValueSync::default());

    // source -> target
    {
        let sync = sync.clone();
        let source_ref: Weak<_> = Rc::downgrade(&source.0);
        let target_ref: Weak<_> = Rc::downgrade(&target.0);
        let subscription = source.on_change(move |new_value, _| {
            let (Some(source), Some(target)) = (source_ref.upgrade(), target_ref.upgrade()) else {
                return;
            };
            let (source, target) = (Control(source), Control(target));
            if should_propagate(&source, new_value, &sync.source_echo) {
                trace!(source = ?source.id(), target = ?target.id(), "propagating to converted control");
                propagate(target.value(), to_target(new_value), &sync.target_echo);
            }
        });
        subscription.needs(target.supply());
    }

    // target -> source
    {
        let source = source.clone();
        let target_ref: Weak<_> = Rc::downgrade(&target.0);
        target.on_change(move |new_value, _| {
            let Some(target) = target_ref.upgrade().map(Control) else {
                return;
            };
            if should_propagate(&target, new_value, &sync.target_echo) {
                trace!(source = ?source.id(), target = ?target.id(), "propagating to source control");
                propagate(source.value(), to_source(new_value), &sync.source_echo);
            }
        });
    }
}
