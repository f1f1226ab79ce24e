use std::rc::Rc;
use thiserror::Error;

/// Why a supply has been cut off.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CancelReason {
    /// Plain cancellation, without further explanation.
    #[error("supply cut off")]
    Off,
    /// Cancellation with a message.
    #[error("{0}")]
    Message(Rc<str>),
}

impl CancelReason {
    pub fn message(text: impl Into<Rc<str>>) -> CancelReason {
        CancelReason::Message(text.into())
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        CancelReason::Off
    }
}

/// Errors reported by controls.
#[derive(Clone, Debug, Error)]
pub enum ControlError {
    #[error("control has been cut off: {0}")]
    Cancelled(CancelReason),
    #[error("control value type mismatch: expected `{expected}`, found `{actual}`")]
    ValueTypeMismatch { expected: &'static str, actual: &'static str },
}
