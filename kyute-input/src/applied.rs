//! Applied aspects.
//!
//! An applied aspect is the instance of an aspect for one control, together with the rule
//! deciding what becomes of that instance when the control is converted. The rules are a closed
//! set:
//!
//! - [`Applied::empty`]: no instance, and none on any converted control either.
//! - [`Applied::known`]: the same instance on every converted control.
//! - [`Applied::inconvertible`]: the instance only holds for the control it was computed for.
//!   Converted controls get the instance they claim for themselves, or a default.
//! - [`Applied::built`]: the instance is rebuilt for each converted control, with access to the
//!   control it was converted from.
use crate::{
    aspect::{Aspect, AspectId},
    control::{AnyControl, ControlId},
};
use std::{
    any::Any,
    fmt,
    rc::{Rc, Weak},
};

/// Builds an aspect instance for a control. The second argument is the control the instance is
/// converted from, if any.
pub type BuildFn<I> = dyn Fn(&dyn AnyControl, Option<&dyn AnyControl>) -> Option<I>;

/// Looks up the instance a control claims for itself.
pub type LookupFn<I> = dyn Fn(&dyn AnyControl) -> Option<I>;

/// The conversion rule of an applied aspect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AppliedKind {
    Empty,
    Known,
    Inconvertible,
    Built,
}

enum Rule<I> {
    Empty,
    Known,
    Inconvertible {
        aspect: AspectId,
        control: ControlId,
        default: Option<I>,
        lookup: Option<Rc<LookupFn<I>>>,
    },
    Built {
        aspect: AspectId,
        control: Weak<dyn AnyControl>,
        build: Rc<BuildFn<I>>,
    },
}

impl<I: Clone> Clone for Rule<I> {
    fn clone(&self) -> Self {
        match self {
            Rule::Empty => Rule::Empty,
            Rule::Known => Rule::Known,
            Rule::Inconvertible {
                aspect,
                control,
                default,
                lookup,
            } => Rule::Inconvertible {
                aspect: *aspect,
                control: *control,
                default: default.clone(),
                lookup: lookup.clone(),
            },
            Rule::Built { aspect, control, build } => Rule::Built {
                aspect: *aspect,
                control: control.clone(),
                build: build.clone(),
            },
        }
    }
}

/// Aspect instance applied to a control, along with its conversion rule.
pub struct Applied<I> {
    instance: Option<I>,
    rule: Rule<I>,
}

impl<I: Clone> Clone for Applied<I> {
    fn clone(&self) -> Self {
        Applied {
            instance: self.instance.clone(),
            rule: self.rule.clone(),
        }
    }
}

impl<I: fmt::Debug> fmt::Debug for Applied<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Applied")
            .field("kind", &self.kind())
            .field("instance", &self.instance)
            .finish()
    }
}

impl<I> Applied<I> {
    pub fn kind(&self) -> AppliedKind {
        match self.rule {
            Rule::Empty => AppliedKind::Empty,
            Rule::Known => AppliedKind::Known,
            Rule::Inconvertible { .. } => AppliedKind::Inconvertible,
            Rule::Built { .. } => AppliedKind::Built,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.rule, Rule::Empty)
    }

    /// The aspect instance. `None` for empty aspects.
    pub fn instance(&self) -> Option<&I> {
        self.instance.as_ref()
    }

    pub fn into_instance(self) -> Option<I> {
        self.instance
    }
}

impl<I: Clone + 'static> Applied<I> {
    /// An aspect that has no instance for the control, nor for any control converted from it.
    pub fn empty() -> Applied<I> {
        Applied {
            instance: None,
            rule: Rule::Empty,
        }
    }

    /// An instance shared as is by all controls converted from this one.
    pub fn known(instance: I) -> Applied<I> {
        Applied {
            instance: Some(instance),
            rule: Rule::Known,
        }
    }

    /// An instance that only makes sense for `control` itself.
    ///
    /// On conversion, the target control keeps the instance only if it is `control`. Otherwise
    /// the target is asked for the instance it claims for itself (by default, the instance it has
    /// already recorded for `aspect`, if any) and `default` is used when it claims none.
    ///
    /// The lookup is order dependent: a target that has not resolved the aspect yet claims
    /// nothing, so the last control to resolve the aspect decides.
    pub fn inconvertible(aspect: &Aspect<I>, control: &dyn AnyControl, instance: I, default: Option<I>) -> Applied<I> {
        Applied {
            instance: Some(instance),
            rule: Rule::Inconvertible {
                aspect: aspect.id(),
                control: control.id(),
                default,
                lookup: None,
            },
        }
    }

    /// Replaces the lookup of the instance a conversion target claims for itself.
    ///
    /// Has no effect on aspects other than [`Applied::inconvertible`] ones.
    pub fn with_lookup(mut self, lookup: impl Fn(&dyn AnyControl) -> Option<I> + 'static) -> Applied<I> {
        if let Rule::Inconvertible { lookup: ref mut l, .. } = self.rule {
            *l = Some(Rc::new(lookup));
        }
        self
    }

    /// An instance built for `control` by `build`, and rebuilt for every converted control.
    pub fn built(
        aspect: &Aspect<I>,
        control: &dyn AnyControl,
        build: impl Fn(&dyn AnyControl, Option<&dyn AnyControl>) -> I + 'static,
    ) -> Applied<I> {
        let build: Rc<BuildFn<I>> =
            Rc::new(move |control: &dyn AnyControl, origin: Option<&dyn AnyControl>| Some(build(control, origin)));
        // never declines
        Applied::build_for(aspect.id(), build, control, None).unwrap_or_else(Applied::empty)
    }

    /// Like [`Applied::built`], but the builder may decline, in which case the aspect is empty for
    /// `control` and the conversion is declined for converted controls.
    pub fn built_or_declined(
        aspect: &Aspect<I>,
        control: &dyn AnyControl,
        build: impl Fn(&dyn AnyControl, Option<&dyn AnyControl>) -> Option<I> + 'static,
    ) -> Applied<I> {
        Applied::build_for(aspect.id(), Rc::new(build), control, None).unwrap_or_else(Applied::empty)
    }

    fn build_for(
        aspect: AspectId,
        build: Rc<BuildFn<I>>,
        control: &dyn AnyControl,
        origin: Option<&dyn AnyControl>,
    ) -> Option<Applied<I>> {
        let instance = build(control, origin)?;
        Some(Applied {
            instance: Some(instance),
            rule: Rule::Built {
                aspect,
                control: control.downgrade(),
                build,
            },
        })
    }

    /// Converts this aspect to `target`, a control converted from the one this aspect is applied
    /// to.
    ///
    /// `None` means the conversion is declined; it is not the same as an empty aspect.
    /// This aspect is left untouched.
    pub fn convert_to(&self, target: &dyn AnyControl) -> Option<Applied<I>> {
        match &self.rule {
            Rule::Empty => Some(Applied::empty()),
            Rule::Known => Some(Applied {
                instance: self.instance.clone(),
                rule: Rule::Known,
            }),
            Rule::Inconvertible {
                aspect,
                control,
                default,
                lookup,
            } => {
                let instance = if target.id() == *control {
                    self.instance.clone()
                } else {
                    let claimed = match lookup {
                        Some(lookup) => lookup(target),
                        None => recorded_instance::<I>(target, *aspect),
                    };
                    claimed.or_else(|| default.clone())
                };
                Some(Applied {
                    instance,
                    rule: Rule::Inconvertible {
                        aspect: *aspect,
                        control: target.id(),
                        default: default.clone(),
                        lookup: lookup.clone(),
                    },
                })
            }
            Rule::Built { aspect, control, build } => {
                let origin = control.upgrade();
                Applied::build_for(*aspect, build.clone(), target, origin.as_deref())
            }
        }
    }

    /// Attaches this aspect to `target`.
    ///
    /// Built aspects reuse the instance `target` has already recorded for the same aspect, and
    /// only build a new one if there is none. Other aspects are converted.
    pub fn attach_to(&self, target: &dyn AnyControl) -> Option<Applied<I>> {
        match &self.rule {
            Rule::Built { aspect, build, .. } => match recorded_instance::<I>(target, *aspect) {
                Some(existing) => Some(Applied {
                    instance: Some(existing),
                    rule: Rule::Built {
                        aspect: *aspect,
                        control: target.downgrade(),
                        build: build.clone(),
                    },
                }),
                None => self.convert_to(target),
            },
            _ => self.convert_to(target),
        }
    }
}

fn recorded_instance<I: Clone + 'static>(control: &dyn AnyControl, aspect: AspectId) -> Option<I> {
    control
        .recorded_any(aspect)
        .and_then(|applied| applied.downcast_ref::<I>().and_then(|applied| applied.instance.clone()))
}

/// Type-erased applied aspect, as stored in aspect caches.
#[derive(Clone)]
pub struct AppliedAny(Rc<dyn Any>);

impl fmt::Debug for AppliedAny {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AppliedAny").finish_non_exhaustive()
    }
}

impl AppliedAny {
    pub fn new<I: 'static>(applied: Applied<I>) -> AppliedAny {
        AppliedAny(Rc::new(applied))
    }

    pub fn downcast_ref<I: 'static>(&self) -> Option<&Applied<I>> {
        (*self.0).downcast_ref::<Applied<I>>()
    }

    /// Downcasts an applied aspect stored under the identity of a definition of type `Aspect<I>`.
    pub(crate) fn typed<I: 'static>(&self, aspect_name: &str) -> &Applied<I> {
        self.downcast_ref()
            .unwrap_or_else(|| panic!("unexpected instance type for aspect `{aspect_name}`"))
    }

    pub fn ptr_eq(&self, other: &AppliedAny) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
