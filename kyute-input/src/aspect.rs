//! Aspect definitions.
use crate::{
    applied::{Applied, AppliedAny},
    control::AnyControl,
};
use kyute_common::Counter;
use std::{fmt, num::NonZeroU64};
use tracing::trace;

static ASPECT_ID_COUNTER: Counter = Counter::new();

/// Identity handle of an aspect definition.
///
/// Allocated once per [`Aspect`], when it is created. Aspect caches are keyed by this handle,
/// never by name.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct AspectId(NonZeroU64);

impl AspectId {
    fn next() -> AspectId {
        AspectId(ASPECT_ID_COUNTER.next_nonzero())
    }

    pub fn to_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for AspectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "aspect#{}", self.0)
    }
}

type ApplyFn<I> = dyn Fn(&dyn AnyControl, &Aspect<I>) -> Applied<I> + Send + Sync;

/// Aspect definition.
///
/// Knows how to build the instance of the aspect for a control that has never been asked for it.
/// Definitions are typically created once, in a `static`:
///
/// ```ignore
/// static NAME: Lazy<Aspect<Rc<str>>> = Lazy::new(|| Aspect::new("name", |_, _| Applied::known("anonymous".into())));
/// ```
///
/// `apply` receives the control and the definition itself, and must always produce an applied
/// aspect. Controls for which the aspect makes no sense get [`Applied::empty`].
pub struct Aspect<I: 'static> {
    id: AspectId,
    name: &'static str,
    apply: Box<ApplyFn<I>>,
}

impl<I: 'static> fmt::Debug for Aspect<I> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Aspect")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<I: 'static> PartialEq for Aspect<I> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<I: 'static> Eq for Aspect<I> {}

impl<I: Clone + 'static> Aspect<I> {
    pub fn new(
        name: &'static str,
        apply: impl Fn(&dyn AnyControl, &Aspect<I>) -> Applied<I> + Send + Sync + 'static,
    ) -> Aspect<I> {
        Aspect {
            id: AspectId::next(),
            name,
            apply: Box::new(apply),
        }
    }

    pub fn id(&self) -> AspectId {
        self.id
    }

    /// Name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Applies this aspect to a control seen for the first time.
    ///
    /// Controls call this at most once per definition. Use [`Control::aspect`](crate::Control::aspect)
    /// to get the (cached) instance instead.
    pub fn apply_to(&self, control: &dyn AnyControl) -> Applied<I> {
        (self.apply)(control, self)
    }
}

/// Type-erased view of an aspect definition.
pub trait AnyAspect {
    fn id(&self) -> AspectId;
    fn name(&self) -> &'static str;
    /// Applies the definition to `control`.
    fn apply_any(&self, control: &dyn AnyControl) -> AppliedAny;
    /// Converts an aspect applied to some control to `target`.
    ///
    /// When the applied aspect declines the conversion, the target gets an empty aspect.
    fn convert_any(&self, applied: &AppliedAny, target: &dyn AnyControl) -> AppliedAny;
    /// Whether `applied` holds instances of this definition's type.
    fn accepts(&self, applied: &AppliedAny) -> bool;
}

impl<I: Clone + 'static> AnyAspect for Aspect<I> {
    fn id(&self) -> AspectId {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn apply_any(&self, control: &dyn AnyControl) -> AppliedAny {
        AppliedAny::new(self.apply_to(control))
    }

    fn convert_any(&self, applied: &AppliedAny, target: &dyn AnyControl) -> AppliedAny {
        let converted = applied.typed::<I>(self.name).convert_to(target).unwrap_or_else(|| {
            trace!(aspect = self.name, target = ?target.id(), "conversion declined, aspect is empty");
            Applied::empty()
        });
        AppliedAny::new(converted)
    }

    fn accepts(&self, applied: &AppliedAny) -> bool {
        applied.downcast_ref::<I>().is_some()
    }
}
