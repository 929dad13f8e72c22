//! Observable chat state

use crate::chat::conversation::Conversation;

pub const INITIALIZING_MESSAGE: &str = "Initializing engine...";
pub const GENERATING_MESSAGE: &str = "Generating response...";
pub const NOT_INITIALIZED_NOTICE: &str = "Engine not initialized";

/// Placeholder text for a reply stopped before its first chunk
pub const STOPPED_MARKER: &str = "[Stopped]";
/// Placeholder text for a reply that finished without any text
pub const NO_RESPONSE_MARKER: &str = "[No response]";

/// Engine lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
}

/// Where the generation loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Placeholder appended, waiting for the engine to open its stream
    AwaitingResponse,
    Streaming,
}

impl Phase {
    pub fn is_generating(&self) -> bool {
        !matches!(self, Phase::Idle)
    }
}

/// Loading overlay state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingState {
    pub is_loading: bool,
    pub message: String,
}

impl LoadingState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self {
            is_loading: true,
            message: message.into(),
        }
    }
}

/// Everything the UI renders, published after each state change
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub conversation: Conversation,
    pub loading: LoadingState,
    /// Short label from the latest initialization progress report
    pub progress_label: String,
    pub engine: EngineStatus,
    pub phase: Phase,
    /// Banner text for problems the user should know about
    pub notice: Option<String>,
}
