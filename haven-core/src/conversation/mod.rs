//! Guided intake conversation: session state, the turn controller that
//! drives it, and the handoff of the finished summary to the incident form.

pub mod controller;
pub mod intake;
pub mod session;

pub use controller::{TerminationPolicy, TurnController, TurnError, TurnOutcome};
pub use intake::IntakeDraft;
pub use session::{ConversationSession, SessionStatus, ValidationError};
