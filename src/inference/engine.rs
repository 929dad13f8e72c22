//! Inference engine implementation
//!
//! Core logic for managing llama-cpp context and running inference.
//!
//! # Architecture
//!
//! Since llama-cpp-2 types (`LlamaBackend`, `LlamaModel`, `LlamaContext`) contain
//! raw pointers that are not `Send`, all inference operations run on a dedicated
//! worker thread. Async callers talk to it through commands and get answers back
//! on oneshot or streaming channels.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};

use crate::inference::model::{validate_gguf, ModelError};
use crate::inference::progress::ProgressReporter;
use crate::inference::streaming::{ChunkStream, StreamToken};
use crate::inference::InferenceEngine;
use crate::types::Message;

/// Prompt tokens decoded per batch
const BATCH_SIZE: usize = 512;

/// Smallest context window we will create
const MIN_CONTEXT: u32 = 2048;

/// Errors that can occur during inference operations
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Backend not initialized")]
    BackendNotInitialized,

    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model validation failed: {0}")]
    ModelValidation(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Worker thread error: {0}")]
    WorkerError(String),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        EngineError::ModelValidation(e.to_string())
    }
}

/// Generation parameters for inference
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Temperature for sampling (0.0 = greedy, higher = more random)
    pub temperature: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,
    /// Random seed for sampling (0 = random)
    pub seed: u32,
    /// Context window size
    pub max_context_size: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            seed: 0,
            max_context_size: 4096,
        }
    }
}

/// Model information after loading
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    /// Path to the loaded model
    pub path: String,
    /// Vocabulary size
    pub vocab_size: i32,
    /// Training context length
    pub context_length: u32,
    /// Total parameter count
    pub param_count: u64,
    /// Model size in bytes
    pub size_bytes: u64,
}

/// Commands sent to the worker thread
enum WorkerCommand {
    Init {
        progress: ProgressReporter,
        response_tx: oneshot::Sender<Result<(), EngineError>>,
    },
    LoadModel {
        path: PathBuf,
        gpu_layers: u32,
        progress: ProgressReporter,
        response_tx: oneshot::Sender<Result<LoadedModelInfo, EngineError>>,
    },
    Generate {
        history: Vec<Message>,
        params: GenerationParams,
        token_tx: tokio_mpsc::UnboundedSender<StreamToken>,
        stop_signal: Arc<AtomicBool>,
    },
    Shutdown,
}

/// The LLM inference engine using llama-cpp-2
///
/// Uses a dedicated worker thread for all llama-cpp operations since
/// the underlying types are not Send.
pub struct LlamaEngine {
    /// Channel to send commands to the worker thread
    command_tx: Option<Sender<WorkerCommand>>,
    /// Handle to the worker thread
    worker_handle: Option<JoinHandle<()>>,
    /// Cached model info (updated after load)
    model_info: Option<LoadedModelInfo>,
}

impl LlamaEngine {
    /// Creates a new uninitialized engine
    pub fn new() -> Self {
        Self {
            command_tx: None,
            worker_handle: None,
            model_info: None,
        }
    }

    /// Starts the worker thread and initializes the llama.cpp backend on it.
    pub async fn init(&mut self, progress: ProgressReporter) -> Result<(), EngineError> {
        if self.is_initialized() {
            return Ok(());
        }

        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let handle = thread::Builder::new()
            .name("llama-worker".to_string())
            .spawn(move || worker_thread_main(command_rx))
            .map_err(|e| EngineError::WorkerError(e.to_string()))?;

        self.command_tx = Some(command_tx);
        self.worker_handle = Some(handle);

        let (response_tx, response_rx) = oneshot::channel();
        self.send(WorkerCommand::Init {
            progress,
            response_tx,
        })?;
        response_rx
            .await
            .map_err(|e| EngineError::WorkerError(e.to_string()))??;

        tracing::info!("LlamaEngine worker thread started");
        Ok(())
    }

    /// Loads a GGUF model from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the GGUF model file
    /// * `gpu_layers` - Number of layers to offload to GPU (0 = CPU only, high value = all to GPU)
    /// * `progress` - Receives a report per loading stage
    pub async fn load_model<P: AsRef<Path>>(
        &mut self,
        path: P,
        gpu_layers: u32,
        progress: ProgressReporter,
    ) -> Result<LoadedModelInfo, EngineError> {
        if !self.is_initialized() {
            return Err(EngineError::BackendNotInitialized);
        }

        let path = path.as_ref();
        progress.report(0.2, format!("Validating model: {}", path.display()));
        let header = validate_gguf(path)?;
        tracing::debug!(
            "GGUF v{} with {} tensors at {:?}",
            header.version,
            header.tensor_count,
            path
        );

        let (response_tx, response_rx) = oneshot::channel();
        self.send(WorkerCommand::LoadModel {
            path: path.to_path_buf(),
            gpu_layers,
            progress,
            response_tx,
        })?;

        let info = response_rx
            .await
            .map_err(|e| EngineError::WorkerError(e.to_string()))??;

        self.model_info = Some(info.clone());
        Ok(info)
    }

    /// Returns information about the currently loaded model
    pub fn model_info(&self) -> Option<&LoadedModelInfo> {
        self.model_info.as_ref()
    }

    /// Returns true if the worker thread and backend are up
    pub fn is_initialized(&self) -> bool {
        self.command_tx.is_some()
    }

    fn send(&self, command: WorkerCommand) -> Result<(), EngineError> {
        self.command_tx
            .as_ref()
            .ok_or(EngineError::BackendNotInitialized)?
            .send(command)
            .map_err(|e| EngineError::WorkerError(e.to_string()))
    }
}

impl Default for LlamaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LlamaEngine {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl InferenceEngine for LlamaEngine {
    async fn generate(
        &self,
        history: &[Message],
        params: &GenerationParams,
    ) -> Result<ChunkStream, EngineError> {
        if self.model_info.is_none() {
            return Err(EngineError::NoModelLoaded);
        }

        let (token_tx, stream) = ChunkStream::channel();
        self.send(WorkerCommand::Generate {
            history: history.to_vec(),
            params: params.clone(),
            token_tx,
            stop_signal: stream.stop_signal(),
        })?;

        Ok(stream)
    }
}

/// Worker thread main loop
///
/// Owns the LlamaBackend and LlamaModel, processes commands from async callers.
fn worker_thread_main(command_rx: Receiver<WorkerCommand>) {
    let mut backend: Option<LlamaBackend> = None;
    let mut model: Option<LlamaModel> = None;

    while let Ok(command) = command_rx.recv() {
        match command {
            WorkerCommand::Init {
                progress,
                response_tx,
            } => {
                progress.report(0.05, "Initializing backend: llama.cpp");
                let result = match LlamaBackend::init() {
                    Ok(b) => {
                        backend = Some(b);
                        tracing::info!("LlamaBackend initialized in worker thread");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!("Failed to init backend: {}", e);
                        Err(EngineError::BackendInit(e.to_string()))
                    }
                };
                let _ = response_tx.send(result);
            }
            WorkerCommand::LoadModel {
                path,
                gpu_layers,
                progress,
                response_tx,
            } => {
                let result = match backend.as_ref() {
                    Some(b) => load_model_internal(b, &path, gpu_layers, &progress).map(
                        |(loaded, info)| {
                            model = Some(loaded);
                            info
                        },
                    ),
                    None => Err(EngineError::BackendNotInitialized),
                };
                let _ = response_tx.send(result);
            }
            WorkerCommand::Generate {
                history,
                params,
                token_tx,
                stop_signal,
            } => match (&backend, &model) {
                (Some(b), Some(m)) => {
                    if let Err(e) = run_generation(b, m, &history, params, &token_tx, &stop_signal) {
                        tracing::error!("Generation failed: {}", e);
                        let _ = token_tx.send(StreamToken::Error(e));
                    }
                }
                _ => {
                    let _ = token_tx.send(StreamToken::Error("No model loaded".to_string()));
                }
            },
            WorkerCommand::Shutdown => {
                tracing::info!("Worker thread shutting down");
                return;
            }
        }
    }

    tracing::debug!("Command channel closed, worker exiting");
}

/// Loads the model once and extracts its info (worker thread)
fn load_model_internal(
    backend: &LlamaBackend,
    path: &Path,
    gpu_layers: u32,
    progress: &ProgressReporter,
) -> Result<(LlamaModel, LoadedModelInfo), EngineError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    progress.report(0.3, format!("Loading model weights: {name}"));

    let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
    let model = LlamaModel::load_from_file(backend, path, &model_params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    let info = LoadedModelInfo {
        path: path.to_string_lossy().to_string(),
        vocab_size: model.n_vocab(),
        context_length: model.n_ctx_train(),
        param_count: model.n_params() as u64,
        size_bytes: model.size() as u64,
    };

    tracing::info!(
        "Model loaded: {} ({} params, {} vocab, {} ctx)",
        info.path,
        info.param_count,
        info.vocab_size,
        info.context_length
    );
    progress.report(0.9, format!("Model loaded: {name}"));

    Ok((model, info))
}

/// Run text generation (called from worker thread)
fn run_generation(
    backend: &LlamaBackend,
    model: &LlamaModel,
    history: &[Message],
    params: GenerationParams,
    tx: &tokio_mpsc::UnboundedSender<StreamToken>,
    stop_signal: &Arc<AtomicBool>,
) -> Result<(), String> {
    let prompt = match build_chat_prompt(model, history) {
        Ok(chat_prompt) => chat_prompt,
        Err(error) => {
            tracing::warn!("Chat template not applied: {error}");
            plain_transcript(history)
        }
    };

    let n_ctx = params.max_context_size.min(model.n_ctx_train()).max(MIN_CONTEXT);
    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(n_ctx))
        .with_n_batch(BATCH_SIZE as u32);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| format!("Failed to create context: {}", e))?;

    let tokens = model
        .str_to_token(&prompt, AddBos::Always)
        .map_err(|e| format!("Failed to tokenize: {}", e))?;

    if tokens.is_empty() {
        return Err("Prompt produced no tokens".to_string());
    }
    if tokens.len() >= n_ctx as usize {
        return Err(format!(
            "Conversation is {} tokens, context window is {}",
            tokens.len(),
            n_ctx
        ));
    }

    tracing::debug!("Tokenized history into {} tokens", tokens.len());

    run_inference(&mut ctx, model, tokens, n_ctx, params, tx, stop_signal)
}

/// Formats the whole history with the model's own chat template
fn build_chat_prompt(model: &LlamaModel, history: &[Message]) -> Result<String, String> {
    let template = model
        .chat_template(None)
        .map_err(|e| format!("Failed to load chat template: {e}"))?;
    let messages = history
        .iter()
        .map(|m| LlamaChatMessage::new(m.role.as_str().to_string(), m.content.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Failed to build chat message: {e}"))?;
    model
        .apply_chat_template(&template, &messages, true)
        .map_err(|e| format!("Failed to apply chat template: {e}"))
}

/// Fallback prompt for models without a usable chat template
fn plain_transcript(history: &[Message]) -> String {
    let mut prompt = String::new();
    for message in history {
        prompt.push_str(message.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push_str("\n\n");
    }
    prompt.push_str("assistant: ");
    prompt
}

/// Runs the inference loop
fn run_inference(
    ctx: &mut LlamaContext,
    model: &LlamaModel,
    prompt_tokens: Vec<LlamaToken>,
    n_ctx: u32,
    params: GenerationParams,
    tx: &tokio_mpsc::UnboundedSender<StreamToken>,
    stop_signal: &Arc<AtomicBool>,
) -> Result<(), String> {
    let mut batch = LlamaBatch::new(BATCH_SIZE, 1);
    let last_index = prompt_tokens.len() - 1;

    // Prompt may exceed a single batch
    for (chunk_index, chunk) in prompt_tokens.chunks(BATCH_SIZE).enumerate() {
        batch.clear();
        for (offset, token) in chunk.iter().enumerate() {
            let pos = chunk_index * BATCH_SIZE + offset;
            batch
                .add(*token, pos as i32, &[0], pos == last_index)
                .map_err(|e| format!("Failed to add token to batch: {}", e))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| format!("Failed to decode prompt: {}", e))?;
    }

    let seed = if params.seed == 0 {
        rand_seed()
    } else {
        params.seed
    };

    let mut sampler = if params.temperature < 0.01 {
        LlamaSampler::greedy()
    } else {
        LlamaSampler::chain_simple([
            LlamaSampler::top_k(params.top_k as i32),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(seed),
        ])
    };

    let mut n_decoded = prompt_tokens.len() as i32;
    let mut utf8_buffer: Vec<u8> = Vec::new();

    for _ in 0..params.max_tokens {
        if stop_signal.load(Ordering::Relaxed) {
            tracing::debug!("Generation stopped by caller");
            break;
        }
        if n_decoded as u32 >= n_ctx {
            tracing::warn!("Context window full after {} tokens", n_decoded);
            break;
        }

        let new_token = sampler.sample(ctx, batch.n_tokens() - 1);
        sampler.accept(new_token);

        if model.is_eog_token(new_token) {
            tracing::debug!("End of generation token encountered");
            break;
        }

        let token_bytes = model
            .token_to_bytes(new_token, Special::Tokenize)
            .map_err(|e| format!("Failed to convert token to bytes: {}", e))?;
        utf8_buffer.extend_from_slice(&token_bytes);

        if let Some(text) = take_valid_utf8(&mut utf8_buffer) {
            if tx.send(StreamToken::Token(text)).is_err() {
                tracing::debug!("Receiver dropped, stopping generation");
                return Ok(());
            }
        }

        batch.clear();
        batch
            .add(new_token, n_decoded, &[0], true)
            .map_err(|e| format!("Failed to add token to batch: {}", e))?;
        ctx.decode(&mut batch)
            .map_err(|e| format!("Failed to decode: {}", e))?;

        n_decoded += 1;
    }

    // Whatever is left can no longer be completed
    if !utf8_buffer.is_empty() {
        let _ = tx.send(StreamToken::Token(
            String::from_utf8_lossy(&utf8_buffer).into_owned(),
        ));
    }

    let _ = tx.send(StreamToken::Done);
    Ok(())
}

/// Removes and returns the decodable prefix of `buffer`.
///
/// Bytes that can never be valid become U+FFFD. An incomplete multi-byte
/// sequence at the end stays in the buffer until the next token completes it.
fn take_valid_utf8(buffer: &mut Vec<u8>) -> Option<String> {
    let mut text = String::new();
    let mut consumed = 0;

    loop {
        match std::str::from_utf8(&buffer[consumed..]) {
            Ok(rest) => {
                text.push_str(rest);
                consumed = buffer.len();
                break;
            }
            Err(e) => {
                let valid_end = consumed + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buffer[consumed..valid_end]));
                match e.error_len() {
                    Some(invalid) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_end + invalid;
                    }
                    None => {
                        consumed = valid_end;
                        break;
                    }
                }
            }
        }
    }

    buffer.drain(..consumed);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
