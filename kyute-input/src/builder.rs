//! Control builders.
use crate::{
    applied::AppliedAny,
    aspect::{Aspect, AspectId},
    control::Control,
    conversion::AspectConversion,
};
use kyute_common::Data;
use smallvec::SmallVec;
use std::{collections::HashMap, fmt};
use tracing::trace;

type AspectSetup<V> = Box<dyn FnOnce(&AppliedAny, &Control<V>)>;
type ControlSetup<V> = Box<dyn FnOnce(&Control<V>)>;

/// Accumulates aspect overrides and setup callbacks for a control that does not exist yet.
///
/// `build` consumes the builder: it constructs the control with `factory`, giving it the
/// accumulated aspect overrides, then registers the setups on it.
pub struct ControlBuilder<V, F> {
    factory: F,
    /// Overrides restricted to one aspect definition.
    aspects: HashMap<AspectId, AspectConversion>,
    /// Overrides tried for every definition, after the restricted ones.
    common: SmallVec<[AspectConversion; 2]>,
    aspect_setups: HashMap<AspectId, SmallVec<[AspectSetup<V>; 1]>>,
    setups: SmallVec<[ControlSetup<V>; 1]>,
}

impl<V, F> fmt::Debug for ControlBuilder<V, F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ControlBuilder")
            .field("aspects", &self.aspects.len())
            .field("common", &self.common.len())
            .field("aspect_setups", &self.aspect_setups.len())
            .field("setups", &self.setups.len())
            .finish_non_exhaustive()
    }
}

/// Returns a builder of a plain control with the given initial value.
pub fn control_builder<V: Data>(value: V) -> ControlBuilder<V, impl FnOnce(AspectConversion) -> Control<V>> {
    ControlBuilder::new(move |aspects: AspectConversion| Control::with_aspects(value, aspects))
}

impl<V, F> ControlBuilder<V, F>
where
    V: Data,
    F: FnOnce(AspectConversion) -> Control<V>,
{
    pub fn new(factory: F) -> ControlBuilder<V, F> {
        ControlBuilder {
            factory,
            aspects: HashMap::new(),
            common: SmallVec::new(),
            aspect_setups: HashMap::new(),
            setups: SmallVec::new(),
        }
    }

    /// Adds an override of `aspect`.
    ///
    /// `conversion` only applies to `aspect`. Overrides added for the same aspect are tried in
    /// the order they were added.
    pub fn add_aspect<I: Clone + 'static>(&mut self, aspect: &Aspect<I>, conversion: AspectConversion) -> &mut Self {
        let id = aspect.id();
        let existing = self.aspects.remove(&id).unwrap_or_default();
        self.aspects.insert(id, existing.and(conversion.restricted_to(id)));
        self
    }

    /// Adds an override of any aspect, tried after all the overrides of specific aspects.
    pub fn add_aspects(&mut self, conversion: AspectConversion) -> &mut Self {
        if !conversion.is_none() {
            self.common.push(conversion);
        }
        self
    }

    /// Registers a setup of `aspect`, run when the aspect is first resolved on the built control.
    pub fn setup_aspect<I: Clone + 'static>(
        &mut self,
        aspect: &Aspect<I>,
        setup: impl FnOnce(Option<&I>, &Control<V>) + 'static,
    ) -> &mut Self {
        let name = aspect.name();
        self.aspect_setups
            .entry(aspect.id())
            .or_default()
            .push(Box::new(move |applied, control| {
                setup(applied.typed::<I>(name).instance(), control)
            }));
        self
    }

    /// Registers a setup of the built control, run right after its construction.
    pub fn setup(&mut self, setup: impl FnOnce(&Control<V>) + 'static) -> &mut Self {
        self.setups.push(Box::new(setup));
        self
    }

    /// The aspect overrides of the control to build.
    pub fn aspects(&self) -> AspectConversion {
        compose(self.aspects.clone(), self.common.clone())
    }

    pub fn build(self) -> Control<V> {
        let ControlBuilder {
            factory,
            aspects,
            common,
            aspect_setups,
            setups,
        } = self;

        let control = factory(compose(aspects, common));
        trace!(
            control = ?control.id(),
            aspect_setups = aspect_setups.len(),
            setups = setups.len(),
            "control built"
        );
        for (aspect, aspect_setups) in aspect_setups {
            for setup in aspect_setups {
                control.setup_erased(aspect, setup);
            }
        }
        for setup in setups {
            setup(&control);
        }
        control
    }
}

fn compose(
    aspects: HashMap<AspectId, AspectConversion>,
    common: SmallVec<[AspectConversion; 2]>,
) -> AspectConversion {
    let by_aspect = if aspects.is_empty() {
        AspectConversion::none()
    } else {
        AspectConversion::new(move |control, aspect| {
            aspects
                .get(&aspect.id())
                .and_then(|conversion| conversion.apply(control, aspect))
        })
    };
    by_aspect.and(AspectConversion::combine(common))
}
