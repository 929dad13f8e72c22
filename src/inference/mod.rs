//! LLM inference engine
//!
//! The chat loop only sees the two traits below. The llama-cpp backed
//! implementation lives in [`engine`] and [`loader`].

pub mod engine;
pub mod loader;
pub mod model;
pub mod progress;
pub mod streaming;

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::Message;

// Re-export main types for convenience
pub use engine::{EngineError, GenerationParams, LlamaEngine, LoadedModelInfo};
pub use loader::LlamaLoader;
pub use model::{validate_gguf, GgufHeader, ModelError, GGUF_MAGIC};
pub use progress::{InitProgress, ProgressReporter, ProgressSender};
pub use streaming::{ChunkStream, StreamToken};

/// Creates a ready-to-use engine for a model.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Loads `model_id`, sending progress reports on `progress` while it works.
    async fn initialize(
        &self,
        model_id: &str,
        progress: ProgressSender,
    ) -> Result<Arc<dyn InferenceEngine>, EngineError>;
}

/// A loaded model that can answer a conversation.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Starts generating the next assistant turn for `history` and returns
    /// the stream of text deltas.
    async fn generate(
        &self,
        history: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream, EngineError>;
}
