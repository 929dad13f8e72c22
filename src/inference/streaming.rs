//! Streaming inference support
//!
//! Handles token-by-token streaming output from the model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Represents a token emitted during streaming inference.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamToken {
    /// A generated text delta
    Token(String),
    /// Generation completed successfully
    Done,
    /// An error occurred during generation
    Error(String),
}

/// Receiving side of a streamed response.
///
/// Dropping the stream raises its stop signal so the producer can quit early.
#[derive(Debug)]
pub struct ChunkStream {
    receiver: mpsc::UnboundedReceiver<StreamToken>,
    stop_signal: Arc<AtomicBool>,
}

impl ChunkStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<StreamToken>, stop_signal: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            stop_signal,
        }
    }

    /// Creates a connected sender and stream with a fresh stop signal.
    pub fn channel() -> (mpsc::UnboundedSender<StreamToken>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, Arc::new(AtomicBool::new(false))))
    }

    /// Next token, or `None` once the producer has gone away.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<StreamToken> {
        self.receiver.recv().await
    }

    /// Asks the producer to stop generating.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        self.stop_signal.clone()
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.stop();
    }
}
