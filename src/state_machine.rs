//! Conversation loop state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.
//! `transition` decides; the runtime executor performs the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ConvContext, ConvState, DoneReason, ErrorKind, DEFAULT_MAX_ROUNDS};
pub use transition::{round_cap_notice, transition, TransitionError};
