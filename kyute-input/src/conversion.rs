//! Conversions between controls.
use crate::{
    applied::{Applied, AppliedAny},
    aspect::{Aspect, AnyAspect, AspectId},
    control::AnyControl,
};
use kyute_common::Data;
use smallvec::SmallVec;
use std::{fmt, rc::Rc};
use tracing::{trace, warn};

type ApplyAspectFn = dyn Fn(&dyn AnyControl, &dyn AnyAspect) -> Option<AppliedAny>;

/// Drops an override result whose instance type is not the one of `aspect`.
fn checked(aspect: &dyn AnyAspect, applied: Option<AppliedAny>) -> Option<AppliedAny> {
    let applied = applied?;
    if aspect.accepts(&applied) {
        Some(applied)
    } else {
        warn!(aspect = aspect.name(), "ignoring override with an unexpected instance type");
        None
    }
}

/// Override of aspect application.
///
/// Given the control an aspect is resolved for and the aspect definition, returns the applied
/// aspect to use, or `None` to let the next override (or the default resolution) handle it.
/// An override never has to handle every definition.
///
/// Cloning is cheap.
#[derive(Clone, Default)]
pub struct AspectConversion(Option<Rc<ApplyAspectFn>>);

impl fmt::Debug for AspectConversion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_none() {
            f.write_str("AspectConversion::none")
        } else {
            f.debug_struct("AspectConversion").finish_non_exhaustive()
        }
    }
}

impl AspectConversion {
    /// The conversion that never overrides anything.
    pub fn none() -> AspectConversion {
        AspectConversion(None)
    }

    pub fn new(
        apply_aspect: impl Fn(&dyn AnyControl, &dyn AnyAspect) -> Option<AppliedAny> + 'static,
    ) -> AspectConversion {
        AspectConversion(Some(Rc::new(apply_aspect)))
    }

    /// Override for a single aspect definition.
    pub fn of<I: Clone + 'static>(
        aspect: &Aspect<I>,
        apply: impl Fn(&dyn AnyControl) -> Option<Applied<I>> + 'static,
    ) -> AspectConversion {
        let id = aspect.id();
        AspectConversion::new(move |control, aspect| {
            if aspect.id() == id {
                apply(control).map(AppliedAny::new)
            } else {
                None
            }
        })
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Restricts this conversion to the aspect definition identified by `aspect`.
    pub fn restricted_to(self, aspect: AspectId) -> AspectConversion {
        match self.0 {
            None => AspectConversion::none(),
            Some(apply) => AspectConversion::new(move |control, def| {
                if def.id() == aspect {
                    apply(control, def)
                } else {
                    None
                }
            }),
        }
    }

    /// Asks this conversion for the applied aspect of `aspect` on `control`.
    pub fn apply(&self, control: &dyn AnyControl, aspect: &dyn AnyAspect) -> Option<AppliedAny> {
        let apply = self.0.as_ref()?;
        let applied = checked(aspect, apply(control, aspect));
        if applied.is_some() {
            trace!(aspect = aspect.name(), control = ?control.id(), "aspect overridden by conversion");
        }
        applied
    }

    /// Combines conversions into one, tried in order: the first one returning an applied aspect
    /// wins.
    ///
    /// Combining nothing gives [`AspectConversion::none`].
    pub fn combine(conversions: impl IntoIterator<Item = AspectConversion>) -> AspectConversion {
        let mut parts: SmallVec<[Rc<ApplyAspectFn>; 4]> = conversions.into_iter().filter_map(|c| c.0).collect();
        match parts.len() {
            0 => AspectConversion::none(),
            1 => AspectConversion(parts.pop()),
            _ => AspectConversion::new(move |control, aspect| {
                parts
                    .iter()
                    .find_map(|apply| checked(aspect, apply(control, aspect)))
            }),
        }
    }

    /// Combines this conversion with another one, tried after it.
    pub fn and(self, other: AspectConversion) -> AspectConversion {
        AspectConversion::combine([self, other])
    }
}

/// Conversion of a control with values of type `V` into a control with values of type `W`.
///
/// Holds the value transform pair and the aspect overrides of the converted control. A
/// conversion has exactly one value transform: additional conversions can only add aspect
/// overrides, with [`Conversion::with_aspects`].
pub struct Conversion<V, W> {
    pub(crate) to_target: Rc<dyn Fn(&V) -> W>,
    pub(crate) to_source: Rc<dyn Fn(&W) -> V>,
    pub(crate) aspects: AspectConversion,
}

impl<V, W> Clone for Conversion<V, W> {
    fn clone(&self) -> Self {
        Conversion {
            to_target: self.to_target.clone(),
            to_source: self.to_source.clone(),
            aspects: self.aspects.clone(),
        }
    }
}

impl<V, W> fmt::Debug for Conversion<V, W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("aspects", &self.aspects)
            .finish_non_exhaustive()
    }
}

impl<V: Data> Conversion<V, V> {
    /// Converted values are the same as the source ones.
    pub fn identity() -> Conversion<V, V> {
        Conversion::map(V::clone, V::clone)
    }
}

impl<V: Data> Default for Conversion<V, V> {
    fn default() -> Self {
        Conversion::identity()
    }
}

impl<V: Data> From<AspectConversion> for Conversion<V, V> {
    fn from(aspects: AspectConversion) -> Self {
        Conversion::identity().with_aspects(aspects)
    }
}

impl<V: Data, W: Data> Conversion<V, W> {
    pub fn map(to_target: impl Fn(&V) -> W + 'static, to_source: impl Fn(&W) -> V + 'static) -> Conversion<V, W> {
        Conversion {
            to_target: Rc::new(to_target),
            to_source: Rc::new(to_source),
            aspects: AspectConversion::none(),
        }
    }

    /// Combines a value conversion with aspect-only conversions, tried in order after the aspect
    /// overrides this conversion already has.
    pub fn combine(self, aspects: impl IntoIterator<Item = AspectConversion>) -> Conversion<V, W> {
        let aspects = AspectConversion::combine(aspects);
        self.with_aspects(aspects)
    }

    /// Adds aspect overrides, tried after the existing ones.
    pub fn with_aspects(mut self, aspects: AspectConversion) -> Conversion<V, W> {
        self.aspects = self.aspects.and(aspects);
        self
    }

    pub fn to_target(&self, value: &V) -> W {
        (self.to_target)(value)
    }

    pub fn to_source(&self, value: &W) -> V {
        (self.to_source)(value)
    }

    pub fn aspects(&self) -> &AspectConversion {
        &self.aspects
    }
}

#[cfg(test)]
mod tests {
    use super::{AspectConversion, Conversion};
    use crate::{applied::Applied, aspect::Aspect, control::Control};

    fn fixed(aspect: &Aspect<&'static str>, value: &'static str) -> AspectConversion {
        AspectConversion::of(aspect, move |_| Some(Applied::known(value)))
    }

    #[test]
    fn empty_combination_is_none() {
        let combined = AspectConversion::combine(std::iter::empty());
        assert!(combined.is_none());
        let aspect: Aspect<&'static str> = Aspect::new("a", |_, _| Applied::known("default"));
        let control = Control::new(0u8);
        assert!(combined.apply(control.as_any_control(), &aspect).is_none());
    }

    #[test]
    fn first_override_wins() {
        let d: Aspect<&'static str> = Aspect::new("d", |_, _| Applied::known("default"));
        let other: Aspect<&'static str> = Aspect::new("other", |_, _| Applied::known("default"));
        let combined = AspectConversion::combine([
            fixed(&other, "other"),
            fixed(&d, "A"),
            fixed(&d, "B"),
        ]);
        let control = Control::new(0u8);
        let applied = combined.apply(control.as_any_control(), &d).unwrap();
        assert_eq!(applied.downcast_ref::<&'static str>().unwrap().instance(), Some(&"A"));

        let declining = AspectConversion::of(&d, |_| None);
        let combined = declining.and(fixed(&d, "B"));
        let applied = combined.apply(control.as_any_control(), &d).unwrap();
        assert_eq!(applied.downcast_ref::<&'static str>().unwrap().instance(), Some(&"B"));
    }

    #[test]
    fn restriction() {
        let d: Aspect<&'static str> = Aspect::new("d", |_, _| Applied::known("default"));
        let e: Aspect<&'static str> = Aspect::new("e", |_, _| Applied::known("default"));
        let any = AspectConversion::new(|_, _| Some(crate::AppliedAny::new(Applied::known("any"))));
        let restricted = any.restricted_to(d.id());
        let control = Control::new(0u8);
        assert!(restricted.apply(control.as_any_control(), &d).is_some());
        assert!(restricted.apply(control.as_any_control(), &e).is_none());
    }

    #[test]
    fn value_transforms() {
        let conversion = Conversion::map(|s: &String| s.len(), |n: &usize| "*".repeat(*n));
        assert_eq!(conversion.to_target(&"old".to_string()), 3);
        assert_eq!(conversion.to_source(&2), "**");
        let identity = Conversion::<u32, u32>::identity();
        assert_eq!(identity.to_target(&4), 4);
    }
}
