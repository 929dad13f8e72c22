//! Chat orchestration
//!
//! Conversation state, the response cache lookup, and the loop that drives
//! the engine for each new user turn.

pub mod conversation;
pub mod machine;
pub mod session;
pub mod state;

pub use conversation::Conversation;
pub use session::{ChatError, ChatHandle, ChatSession, SessionConfig};
pub use state::{ChatSnapshot, EngineStatus, LoadingState, Phase};
