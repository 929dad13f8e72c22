//! llama.cpp engine loader
//!
//! Resolves a model id against the models directory, starts a [`LlamaEngine`]
//! and loads the weights, reporting progress along the way.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::inference::engine::{EngineError, LlamaEngine};
use crate::inference::progress::{ProgressReporter, ProgressSender};
use crate::inference::{EngineLoader, InferenceEngine};
use crate::storage::models::resolve_model;
use crate::storage::settings::AppSettings;

#[derive(Debug, Clone)]
pub struct LlamaLoader {
    models_directory: PathBuf,
    gpu_layers: u32,
}

impl LlamaLoader {
    pub fn new(models_directory: impl Into<PathBuf>, gpu_layers: u32) -> Self {
        Self {
            models_directory: models_directory.into(),
            gpu_layers,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(settings.models_directory.clone(), settings.gpu_layers)
    }
}

#[async_trait]
impl EngineLoader for LlamaLoader {
    async fn initialize(
        &self,
        model_id: &str,
        progress: ProgressSender,
    ) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        let progress = ProgressReporter::new(progress);
        progress.report(0.0, format!("Resolving model: {model_id}"));

        let path = resolve_model(&self.models_directory, model_id)
            .map_err(|e| EngineError::ModelNotFound(e.to_string()))?;

        let mut engine = LlamaEngine::new();
        engine.init(progress.clone()).await?;
        let info = engine
            .load_model(&path, self.gpu_layers, progress.clone())
            .await?;

        progress.report(1.0, format!("Finish loading: {model_id}"));
        tracing::info!(
            "Engine ready with {} ({} bytes)",
            model_id,
            info.size_bytes
        );

        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_unknown_model_fails_before_backend_starts() {
        let temp_dir = TempDir::new().unwrap();
        let loader = LlamaLoader::new(temp_dir.path(), 0);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = loader.initialize("missing-model", tx).await;

        assert!(matches!(result, Err(EngineError::ModelNotFound(_))));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.label(), "Resolving model");
    }
}
