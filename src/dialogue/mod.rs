//! The conversation: per-user state, the transition table, and the lanes
//! that feed it.

pub mod dispatcher;
pub mod engine;
pub mod event;
pub mod prompts;
pub mod sessions;
pub mod state;

pub use engine::{DialogueEngine, Participant, Transition};
pub use event::{Choice, Event};
pub use prompts::Prompt;
pub use sessions::{ReplySink, SessionRouter};
pub use state::DialogueState;
