//! Chat state machine
//!
//! Pure bookkeeping for the engine lifecycle and the generation loop. It does
//! no I/O: callers feed it commands and engine events and run the
//! [`GenerationRequest`]s it hands back.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{KeyPolicy, ResponseCache};
use crate::chat::conversation::Conversation;
use crate::chat::state::{
    ChatSnapshot, EngineStatus, LoadingState, Phase, GENERATING_MESSAGE, INITIALIZING_MESSAGE,
    NOT_INITIALIZED_NOTICE, NO_RESPONSE_MARKER, STOPPED_MARKER,
};
use crate::inference::{EngineError, InferenceEngine, InitProgress};
use crate::types::Message;

/// Identifies one generation so late events from a cancelled one can be dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(u64);

/// Work for the caller: ask the engine to answer `history`
#[derive(Debug)]
pub struct GenerationRequest {
    pub id: GenerationId,
    /// Conversation as it was before the placeholder was appended
    pub history: Vec<Message>,
    pub cancel: CancellationToken,
}

struct ActiveGeneration {
    id: GenerationId,
    prompt: String,
    cancel: CancellationToken,
}

pub struct ChatCore {
    conversation: Conversation,
    cache: ResponseCache,
    status: EngineStatus,
    engine: Option<Arc<dyn InferenceEngine>>,
    loading: LoadingState,
    progress_label: String,
    notice: Option<String>,
    phase: Phase,
    active: Option<ActiveGeneration>,
    next_id: u64,
}

impl ChatCore {
    pub fn new(system_prompt: impl Into<String>, key_policy: KeyPolicy) -> Self {
        Self {
            conversation: Conversation::new(system_prompt),
            cache: ResponseCache::new(key_policy),
            status: EngineStatus::Uninitialized,
            engine: None,
            loading: LoadingState::idle(),
            progress_label: String::new(),
            notice: None,
            phase: Phase::Idle,
            active: None,
            next_id: 0,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn engine(&self) -> Option<Arc<dyn InferenceEngine>> {
        self.engine.clone()
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            conversation: self.conversation.clone(),
            loading: self.loading.clone(),
            progress_label: self.progress_label.clone(),
            engine: self.status.clone(),
            phase: self.phase,
            notice: self.notice.clone(),
        }
    }

    /// Moves to `Initializing` from `Uninitialized` or `Failed`.
    ///
    /// Returns false, changing nothing, in any other state.
    pub fn begin_init(&mut self) -> bool {
        if !matches!(self.status, EngineStatus::Uninitialized | EngineStatus::Failed(_)) {
            return false;
        }

        tracing::info!("Initializing engine");
        self.status = EngineStatus::Initializing;
        self.loading = LoadingState::busy(INITIALIZING_MESSAGE);
        self.progress_label.clear();
        self.notice = None;
        true
    }

    pub fn on_init_progress(&mut self, report: &InitProgress) {
        if self.status == EngineStatus::Initializing {
            self.progress_label = report.label().to_string();
        }
    }

    pub fn on_init_finished(&mut self, result: Result<Arc<dyn InferenceEngine>, EngineError>) {
        if self.status != EngineStatus::Initializing {
            tracing::warn!("Ignoring init result outside of initialization");
            return;
        }

        self.loading = LoadingState::idle();
        match result {
            Ok(engine) => {
                tracing::info!("Engine ready");
                self.engine = Some(engine);
                self.status = EngineStatus::Ready;
            }
            Err(e) => {
                tracing::error!("Engine initialization failed: {}", e);
                self.notice = Some(format!("Engine failed to initialize: {e}"));
                self.status = EngineStatus::Failed(e.to_string());
            }
        }
    }

    /// Appends `prompt` as a user turn and answers it.
    ///
    /// A generation that is still running is cancelled first. Returns the
    /// request to run when the answer is not cached.
    pub fn submit(&mut self, prompt: &str) -> Option<GenerationRequest> {
        if prompt.trim().is_empty() {
            return None;
        }

        if self.stop() {
            tracing::info!("New prompt interrupted the active generation");
        }

        if self.engine.is_none() {
            tracing::warn!("Prompt submitted before the engine was ready");
            self.notice = Some(NOT_INITIALIZED_NOTICE.to_string());
            return None;
        }

        self.notice = None;
        self.conversation = self.conversation.with_user(prompt);
        self.respond()
    }

    /// Answers the trailing user turn, from cache if possible.
    ///
    /// Only a trailing user message triggers anything, so the assistant
    /// message appended here can never start another round.
    fn respond(&mut self) -> Option<GenerationRequest> {
        if !self.conversation.awaiting_response() {
            return None;
        }

        let prompt = self.conversation.trailing().content.clone();

        if let Some(cached) = self.cache.get(&prompt).map(str::to_string) {
            tracing::debug!("Cache hit for prompt: {}", crate::truncate_str(&prompt, 64));
            self.conversation = self.conversation.with_assistant(cached);
            self.loading = LoadingState::idle();
            return None;
        }

        tracing::debug!("Cache miss for prompt: {}", crate::truncate_str(&prompt, 64));
        self.loading = LoadingState::busy(GENERATING_MESSAGE);

        let history = self.conversation.messages().to_vec();
        self.conversation = self.conversation.with_assistant("");

        let id = GenerationId(self.next_id);
        self.next_id += 1;
        let cancel = CancellationToken::new();

        self.active = Some(ActiveGeneration {
            id,
            prompt,
            cancel: cancel.clone(),
        });
        self.phase = Phase::AwaitingResponse;

        Some(GenerationRequest {
            id,
            history,
            cancel,
        })
    }

    /// Cancels the active generation, keeping whatever was streamed so far.
    ///
    /// Partial answers are not cached. Returns false if nothing was running.
    pub fn stop(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        active.cancel.cancel();
        tracing::info!("Generation {:?} cancelled", active.id);
        self.fill_empty_placeholder(STOPPED_MARKER);
        self.loading = LoadingState::idle();
        self.phase = Phase::Idle;
        true
    }

    pub fn on_stream_opened(&mut self, id: GenerationId) {
        if !self.is_current(id) {
            return;
        }
        self.loading = LoadingState::idle();
        self.phase = Phase::Streaming;
    }

    pub fn on_chunk(&mut self, id: GenerationId, delta: &str) {
        if !self.is_current(id) || delta.is_empty() {
            return;
        }

        match self.conversation.with_trailing_appended(delta) {
            Some(next) => self.conversation = next,
            None => tracing::warn!("Dropping chunk, trailing message is not the placeholder"),
        }
    }

    pub fn on_finished(&mut self, id: GenerationId) {
        let Some(active) = self.take_if_current(id) else {
            return;
        };

        let response = &self.conversation.trailing().content;
        if response.is_empty() {
            tracing::warn!("Engine returned an empty response, not caching it");
            self.fill_empty_placeholder(NO_RESPONSE_MARKER);
        } else {
            self.cache.put(&active.prompt, response.as_str());
            tracing::debug!("Cached response ({} bytes)", response.len());
        }

        self.loading = LoadingState::idle();
        self.phase = Phase::Idle;
    }

    /// Error boundary for one generation: report it in the placeholder and
    /// the notice, then go back to idle.
    pub fn on_failed(&mut self, id: GenerationId, error: &EngineError) {
        if self.take_if_current(id).is_none() {
            return;
        }

        tracing::error!("Generation failed: {}", error);

        let marker = if self.conversation.trailing().content.is_empty() {
            format!("[Error] {error}")
        } else {
            format!("\n\n[Error] {error}")
        };
        if let Some(next) = self.conversation.with_trailing_appended(&marker) {
            self.conversation = next;
        }

        self.notice = Some(format!("Generation failed: {error}"));
        self.loading = LoadingState::idle();
        self.phase = Phase::Idle;
    }

    /// Gives a still-empty placeholder visible text so it never reads as pending.
    fn fill_empty_placeholder(&mut self, marker: &str) {
        if !self.conversation.trailing().content.is_empty() {
            return;
        }
        if let Some(next) = self.conversation.with_trailing_appended(marker) {
            self.conversation = next;
        }
    }

    fn is_current(&self, id: GenerationId) -> bool {
        self.active.as_ref().map(|a| a.id) == Some(id)
    }

    fn take_if_current(&mut self, id: GenerationId) -> Option<ActiveGeneration> {
        if self.is_current(id) {
            self.active.take()
        } else {
            None
        }
    }
}
