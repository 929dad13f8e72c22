//! Chat session actor
//!
//! A single task owns the [`ChatCore`]. The UI talks to it through a
//! [`ChatHandle`]; engine initialization and generations run as their own
//! tasks and report back as events, so every state change happens here, one
//! at a time.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::cache::KeyPolicy;
use crate::chat::machine::{ChatCore, GenerationId, GenerationRequest};
use crate::chat::state::ChatSnapshot;
use crate::inference::{
    EngineError, EngineLoader, GenerationParams, InferenceEngine, InitProgress, StreamToken,
};
use crate::storage::settings::AppSettings;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Chat session has stopped")]
    SessionClosed,
}

/// What a session needs to know at startup
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model_id: String,
    pub system_prompt: String,
    pub params: GenerationParams,
    pub cache_key_policy: KeyPolicy,
}

impl SessionConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            model_id: settings.model_id.clone(),
            system_prompt: settings.system_prompt.clone(),
            params: settings.generation_params(),
            cache_key_policy: settings.cache_key_policy,
        }
    }
}

enum Command {
    Submit(String),
    Stop,
    RetryInit,
}

enum Event {
    InitFinished(Result<Arc<dyn InferenceEngine>, EngineError>),
    StreamOpened(GenerationId),
    Chunk(GenerationId, String),
    Finished(GenerationId),
    Failed(GenerationId, EngineError),
}

enum Step {
    Command(Option<Command>),
    Progress(Option<InitProgress>),
    Event(Event),
}

/// Cloneable front end of a running [`ChatSession`]
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    /// Sends a prompt. A blank prompt is ignored by the session.
    pub fn submit(&self, prompt: impl Into<String>) -> Result<(), ChatError> {
        self.send(Command::Submit(prompt.into()))
    }

    /// Cancels the running generation, if any.
    pub fn stop(&self) -> Result<(), ChatError> {
        self.send(Command::Stop)
    }

    /// Restarts engine initialization after a failure.
    pub fn retry_init(&self) -> Result<(), ChatError> {
        self.send(Command::RetryInit)
    }

    /// Latest published state
    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.clone()
    }

    fn send(&self, command: Command) -> Result<(), ChatError> {
        self.commands
            .send(command)
            .map_err(|_| ChatError::SessionClosed)
    }
}

pub struct ChatSession {
    core: ChatCore,
    loader: Arc<dyn EngineLoader>,
    model_id: String,
    params: GenerationParams,
    commands: mpsc::UnboundedReceiver<Command>,
    progress: Option<mpsc::UnboundedReceiver<InitProgress>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    state_tx: watch::Sender<ChatSnapshot>,
}

impl ChatSession {
    /// Starts the session on the current tokio runtime and begins loading
    /// the engine. The session ends when every handle has been dropped.
    pub fn spawn(loader: Arc<dyn EngineLoader>, config: SessionConfig) -> ChatHandle {
        let (session, handle) = Self::new(loader, config);
        tokio::spawn(session.run());
        handle
    }

    fn new(loader: Arc<dyn EngineLoader>, config: SessionConfig) -> (Self, ChatHandle) {
        let core = ChatCore::new(config.system_prompt, config.cache_key_policy);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(core.snapshot());

        let session = Self {
            core,
            loader,
            model_id: config.model_id,
            params: config.params,
            commands: commands_rx,
            progress: None,
            events_tx,
            events_rx,
            state_tx,
        };
        let handle = ChatHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (session, handle)
    }

    async fn run(mut self) {
        self.start_init();
        self.publish();

        loop {
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                report = next_progress(&mut self.progress) => Step::Progress(report),
                Some(event) = self.events_rx.recv() => Step::Event(event),
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Command(None) => break,
                Step::Progress(Some(report)) => self.core.on_init_progress(&report),
                Step::Progress(None) => self.progress = None,
                Step::Event(event) => self.handle_event(event),
            }

            self.publish();
        }

        self.core.stop();
        tracing::info!("Chat session closed");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(prompt) => {
                if let Some(request) = self.core.submit(&prompt) {
                    self.start_generation(request);
                }
            }
            Command::Stop => {
                self.core.stop();
            }
            Command::RetryInit => self.start_init(),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::InitFinished(result) => self.core.on_init_finished(result),
            Event::StreamOpened(id) => self.core.on_stream_opened(id),
            Event::Chunk(id, delta) => self.core.on_chunk(id, &delta),
            Event::Finished(id) => self.core.on_finished(id),
            Event::Failed(id, error) => self.core.on_failed(id, &error),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.core.snapshot());
    }

    fn start_init(&mut self) {
        if !self.core.begin_init() {
            tracing::debug!("Engine init already started");
            return;
        }

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        self.progress = Some(progress_rx);

        let loader = self.loader.clone();
        let model_id = self.model_id.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = loader.initialize(&model_id, progress_tx).await;
            let _ = events.send(Event::InitFinished(result));
        });
    }

    fn start_generation(&self, request: GenerationRequest) {
        let Some(engine) = self.core.engine() else {
            return;
        };
        tokio::spawn(stream_generation(
            engine,
            request,
            self.params.clone(),
            self.events_tx.clone(),
        ));
    }
}

async fn next_progress(
    progress: &mut Option<mpsc::UnboundedReceiver<InitProgress>>,
) -> Option<InitProgress> {
    match progress {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Runs one generation and forwards its chunks to the session, in order.
async fn stream_generation(
    engine: Arc<dyn InferenceEngine>,
    request: GenerationRequest,
    params: GenerationParams,
    events: mpsc::UnboundedSender<Event>,
) {
    let GenerationRequest {
        id,
        history,
        cancel,
    } = request;
    tracing::debug!("Generation {:?} started with {} messages", id, history.len());

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = engine.generate(&history, &params) => result,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(Event::Failed(id, e));
            return;
        }
    };
    let _ = events.send(Event::StreamOpened(id));

    loop {
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                stream.stop();
                return;
            }
            token = stream.next() => token,
        };

        let event = match token {
            Some(StreamToken::Token(delta)) => Event::Chunk(id, delta),
            // A producer that goes away without `Done` still ends the answer
            Some(StreamToken::Done) | None => {
                let _ = events.send(Event::Finished(id));
                return;
            }
            Some(StreamToken::Error(reason)) => {
                let _ = events.send(Event::Failed(id, EngineError::Inference(reason)));
                return;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::state::{EngineStatus, Phase, NOT_INITIALIZED_NOTICE};
    use crate::inference::{ChunkStream, ProgressSender};
    use crate::types::{Message, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Streams a fixed list of chunks, then `Done`
    struct ScriptedEngine {
        chunks: Vec<&'static str>,
        fail_with: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedEngine {
        fn new(chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                fail_with: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(chunks: Vec<&'static str>, reason: &'static str) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                fail_with: Some(reason),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceEngine for ScriptedEngine {
        async fn generate(
            &self,
            _history: &[Message],
            _params: &GenerationParams,
        ) -> Result<ChunkStream, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (tx, stream) = ChunkStream::channel();
            for chunk in &self.chunks {
                let _ = tx.send(StreamToken::Token(chunk.to_string()));
            }
            match self.fail_with {
                Some(reason) => {
                    let _ = tx.send(StreamToken::Error(reason.to_string()));
                }
                None => {
                    let _ = tx.send(StreamToken::Done);
                }
            }
            Ok(stream)
        }
    }

    /// Hands each stream's sender to the test so it controls chunk timing
    struct GatedEngine {
        senders: mpsc::UnboundedSender<(Vec<Message>, mpsc::UnboundedSender<StreamToken>)>,
    }

    impl GatedEngine {
        fn new() -> (
            Arc<Self>,
            mpsc::UnboundedReceiver<(Vec<Message>, mpsc::UnboundedSender<StreamToken>)>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { senders: tx }), rx)
        }
    }

    #[async_trait]
    impl InferenceEngine for GatedEngine {
        async fn generate(
            &self,
            history: &[Message],
            _params: &GenerationParams,
        ) -> Result<ChunkStream, EngineError> {
            let (tx, stream) = ChunkStream::channel();
            let _ = self.senders.send((history.to_vec(), tx));
            Ok(stream)
        }
    }

    /// Reports one progress step and returns its engine
    struct ReadyLoader(Arc<dyn InferenceEngine>);

    #[async_trait]
    impl EngineLoader for ReadyLoader {
        async fn initialize(
            &self,
            model_id: &str,
            progress: ProgressSender,
        ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
            let _ = progress.send(InitProgress::new(
                0.5,
                format!("Loading model weights: {model_id}"),
                Duration::ZERO,
            ));
            Ok(self.0.clone())
        }
    }

    /// Never finishes loading
    struct StuckLoader;

    #[async_trait]
    impl EngineLoader for StuckLoader {
        async fn initialize(
            &self,
            _model_id: &str,
            _progress: ProgressSender,
        ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
            std::future::pending::<Result<Arc<dyn InferenceEngine>, EngineError>>().await
        }
    }

    /// Reports one progress step, then waits for the test to let it finish
    struct HeldLoader {
        engine: Arc<dyn InferenceEngine>,
        release: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl EngineLoader for HeldLoader {
        async fn initialize(
            &self,
            model_id: &str,
            progress: ProgressSender,
        ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
            let _ = progress.send(InitProgress::new(
                0.3,
                format!("Loading model weights: {model_id}"),
                Duration::ZERO,
            ));
            let release = self.release.lock().unwrap().take();
            if let Some(release) = release {
                let _ = release.await;
            }
            Ok(self.engine.clone())
        }
    }

    /// Fails the first attempt, succeeds afterwards
    struct FlakyLoader {
        engine: Arc<dyn InferenceEngine>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl EngineLoader for FlakyLoader {
        async fn initialize(
            &self,
            model_id: &str,
            _progress: ProgressSender,
        ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::ModelNotFound(model_id.to_string()))
            } else {
                Ok(self.engine.clone())
            }
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            model_id: "test-model".to_string(),
            system_prompt: "sys".to_string(),
            params: GenerationParams::default(),
            cache_key_policy: KeyPolicy::Exact,
        }
    }

    async fn wait_until(
        handle: &ChatHandle,
        predicate: impl FnMut(&ChatSnapshot) -> bool,
    ) -> ChatSnapshot {
        let mut rx = handle.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for chat state")
            .expect("session dropped");
        snapshot.clone()
    }

    async fn ready_session(engine: Arc<dyn InferenceEngine>) -> ChatHandle {
        let handle = ChatSession::spawn(Arc::new(ReadyLoader(engine)), config());
        wait_until(&handle, |s| s.engine == EngineStatus::Ready).await;
        handle
    }

    fn is_idle_with(len: usize) -> impl FnMut(&ChatSnapshot) -> bool {
        move |s| s.phase == Phase::Idle && s.conversation.len() == len
    }

    #[tokio::test]
    async fn test_init_reaches_ready_and_clears_loading() {
        let engine = ScriptedEngine::new(vec![]);
        let handle = ready_session(engine).await;

        let snapshot = handle.snapshot();
        assert!(!snapshot.loading.is_loading);
        assert_eq!(snapshot.conversation.len(), 1);
        assert_eq!(snapshot.conversation.system().content, "sys");
    }

    #[tokio::test]
    async fn test_unseen_prompt_calls_engine_once() {
        let engine = ScriptedEngine::new(vec!["Hel", "lo"]);
        let handle = ready_session(engine.clone()).await;

        handle.submit("Hi").unwrap();
        let snapshot = wait_until(&handle, is_idle_with(3)).await;

        assert_eq!(engine.calls(), 1);
        assert_eq!(snapshot.conversation.trailing().role, Role::Assistant);
        assert_eq!(snapshot.conversation.trailing().content, "Hello");
        assert!(!snapshot.loading.is_loading);
    }

    #[tokio::test]
    async fn test_repeated_prompt_served_from_cache() {
        let engine = ScriptedEngine::new(vec!["Hel", "lo"]);
        let handle = ready_session(engine.clone()).await;

        handle.submit("Hi").unwrap();
        wait_until(&handle, is_idle_with(3)).await;

        handle.submit("Hi").unwrap();
        let snapshot = wait_until(&handle, is_idle_with(5)).await;

        assert_eq!(engine.calls(), 1);
        assert_eq!(snapshot.conversation.trailing().content, "Hello");
        assert_eq!(snapshot.conversation.messages()[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_loop_terminates_after_completion() {
        let engine = ScriptedEngine::new(vec!["done"]);
        let handle = ready_session(engine.clone()).await;

        handle.submit("Hi").unwrap();
        wait_until(&handle, is_idle_with(3)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.calls(), 1);
        assert_eq!(handle.snapshot().conversation.len(), 3);
    }

    #[tokio::test]
    async fn test_chunks_applied_in_order() {
        let (engine, mut streams) = GatedEngine::new();
        let handle = ready_session(engine).await;

        handle.submit("Hi").unwrap();
        let (history, tx) = streams.recv().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hi");

        let opened = wait_until(&handle, |s| s.phase == Phase::Streaming).await;
        assert_eq!(opened.conversation.trailing().content, "");
        assert!(!opened.loading.is_loading);

        tx.send(StreamToken::Token("Hel".into())).unwrap();
        wait_until(&handle, |s| s.conversation.trailing().content == "Hel").await;

        tx.send(StreamToken::Token("lo".into())).unwrap();
        wait_until(&handle, |s| s.conversation.trailing().content == "Hello").await;

        tx.send(StreamToken::Done).unwrap();
        let done = wait_until(&handle, |s| s.phase == Phase::Idle).await;
        assert_eq!(done.conversation.trailing().content, "Hello");
    }

    #[tokio::test]
    async fn test_submit_before_ready_is_rejected() {
        let handle = ChatSession::spawn(Arc::new(StuckLoader), config());
        let initializing = wait_until(&handle, |s| s.engine == EngineStatus::Initializing).await;
        assert!(initializing.loading.is_loading);

        handle.submit("Hi").unwrap();
        let snapshot =
            wait_until(&handle, |s| s.notice.as_deref() == Some(NOT_INITIALIZED_NOTICE)).await;

        assert_eq!(snapshot.conversation.len(), 1);
        assert_eq!(snapshot.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_progress_label_is_published() {
        let (release_tx, release_rx) = oneshot::channel();
        let loader = HeldLoader {
            engine: ScriptedEngine::new(vec![]),
            release: Mutex::new(Some(release_rx)),
        };
        let handle = ChatSession::spawn(Arc::new(loader), config());

        let loading =
            wait_until(&handle, |s| s.progress_label == "Loading model weights").await;
        assert_eq!(loading.engine, EngineStatus::Initializing);
        assert!(loading.loading.is_loading);

        release_tx.send(()).unwrap();
        let ready = wait_until(&handle, |s| s.engine == EngineStatus::Ready).await;
        assert!(!ready.loading.is_loading);
    }

    #[tokio::test]
    async fn test_init_failure_then_retry() {
        let engine = ScriptedEngine::new(vec!["ok"]);
        let loader = Arc::new(FlakyLoader {
            engine: engine.clone(),
            attempts: AtomicUsize::new(0),
        });
        let handle = ChatSession::spawn(loader, config());

        let failed = wait_until(&handle, |s| matches!(s.engine, EngineStatus::Failed(_))).await;
        assert!(!failed.loading.is_loading);
        assert!(failed.notice.is_some());

        handle.retry_init().unwrap();
        let ready = wait_until(&handle, |s| s.engine == EngineStatus::Ready).await;
        assert_eq!(ready.notice, None);

        handle.submit("Hi").unwrap();
        let snapshot = wait_until(&handle, is_idle_with(3)).await;
        assert_eq!(snapshot.conversation.trailing().content, "ok");
    }

    #[tokio::test]
    async fn test_generation_error_returns_to_idle() {
        let engine = ScriptedEngine::failing(vec!["par"], "boom");
        let handle = ready_session(engine.clone()).await;

        handle.submit("Hi").unwrap();
        let snapshot = wait_until(&handle, |s| s.notice.is_some()).await;

        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(!snapshot.loading.is_loading);
        assert_eq!(
            snapshot.conversation.trailing().content,
            "par\n\n[Error] Inference failed: boom"
        );

        // Nothing was cached, so the engine runs again
        handle.submit("Hi").unwrap();
        wait_until(&handle, |s| s.conversation.len() == 5 && s.phase == Phase::Idle).await;
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_second_prompt_interrupts_stream() {
        let (engine, mut streams) = GatedEngine::new();
        let handle = ready_session(engine).await;

        handle.submit("first").unwrap();
        let (_, first_tx) = streams.recv().await.unwrap();
        first_tx.send(StreamToken::Token("Hel".into())).unwrap();
        wait_until(&handle, |s| s.conversation.trailing().content == "Hel").await;

        handle.submit("second").unwrap();
        let (history, second_tx) = streams.recv().await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].content, "Hel");

        // The first stream was cancelled; anything it still sends is dropped
        let _ = first_tx.send(StreamToken::Token("LATE".into()));
        second_tx.send(StreamToken::Token("World".into())).unwrap();
        second_tx.send(StreamToken::Done).unwrap();

        let snapshot = wait_until(&handle, is_idle_with(5)).await;
        let contents: Vec<_> = snapshot
            .conversation
            .visible()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["first", "Hel", "second", "World"]);
    }

    #[tokio::test]
    async fn test_stop_keeps_partial_answer() {
        let (engine, mut streams) = GatedEngine::new();
        let handle = ready_session(engine).await;

        handle.submit("Hi").unwrap();
        let (_, tx) = streams.recv().await.unwrap();
        tx.send(StreamToken::Token("Hel".into())).unwrap();
        wait_until(&handle, |s| s.conversation.trailing().content == "Hel").await;

        handle.stop().unwrap();
        let stopped = wait_until(&handle, |s| s.phase == Phase::Idle).await;
        assert_eq!(stopped.conversation.trailing().content, "Hel");

        // Not cached: asking again goes back to the engine
        handle.submit("Hi").unwrap();
        let (_, tx) = streams.recv().await.unwrap();
        tx.send(StreamToken::Token("Hello".into())).unwrap();
        tx.send(StreamToken::Done).unwrap();
        let snapshot = wait_until(&handle, is_idle_with(5)).await;
        assert_eq!(snapshot.conversation.trailing().content, "Hello");
    }

    #[tokio::test]
    async fn test_handle_errors_after_session_ends() {
        let engine = ScriptedEngine::new(vec![]);
        let (session, handle) = ChatSession::new(Arc::new(ReadyLoader(engine)), config());
        drop(session);

        assert_eq!(handle.submit("Hi"), Err(ChatError::SessionClosed));
    }
}
