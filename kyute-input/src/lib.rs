//! Input controls with lazily applied aspects.
//!
//! A [`Control`] holds a value and resolves [aspects](Aspect) on demand: each aspect definition
//! applies at most once per control, and the result is cached. Controls can be
//! [converted](Control::convert) into other controls, which keep their values in sync and
//! derive their aspects from the source control.

mod applied;
mod aspect;
mod builder;
mod control;
mod conversion;
mod converted;
mod error;
mod supply;
mod value;

pub use crate::{
    applied::{Applied, AppliedAny, AppliedKind, BuildFn, LookupFn},
    aspect::{AnyAspect, Aspect, AspectId},
    builder::{control_builder, ControlBuilder},
    control::{AnyControl, Control, ControlId, SetupFn},
    conversion::{AspectConversion, Conversion},
    error::{CancelReason, ControlError},
    supply::Supply,
    value::ValueTracker,
};
pub use kyute_common::Data;
