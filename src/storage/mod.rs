//! Local storage
//!
//! Settings file and models directory. Conversations and cached responses
//! are never written to disk.

use std::path::PathBuf;
use thiserror::Error;

pub mod models;
pub mod settings;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access data directory: {0}")]
    DataDirError(String),
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to serialize/deserialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Model '{id}' not found in {}", .directory.display())]
    ModelNotFound { id: String, directory: PathBuf },
}

/// Get the application data directory
///
/// Returns the platform-specific application data directory:
/// - Windows: `C:\Users\{user}\AppData\Roaming\LocalChat\LocalChat`
/// - macOS: `/Users/{user}/Library/Application Support/com.LocalChat.LocalChat`
/// - Linux: `/home/{user}/.local/share/localchat`
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "LocalChat", "LocalChat")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StorageError::DataDirError("Could not determine data directory".to_string()))
}

/// Creates the models directory the settings point at.
pub fn init_storage(models_directory: &std::path::Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(models_directory)?;
    tracing::info!("Models directory: {}", models_directory.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_storage_creates_models_dir() {
        let temp_dir = TempDir::new().unwrap();
        let models = temp_dir.path().join("nested").join("models");

        init_storage(&models).unwrap();
        assert!(models.is_dir());

        // Idempotent
        init_storage(&models).unwrap();
    }

    #[test]
    fn test_model_not_found_message() {
        let err = StorageError::ModelNotFound {
            id: "llama".to_string(),
            directory: PathBuf::from("/models"),
        };
        assert_eq!(err.to_string(), "Model 'llama' not found in /models");
    }
}
