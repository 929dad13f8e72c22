//! Model catalog
//!
//! Finds GGUF files in the models directory and resolves model ids to paths.
//! A model id is the file stem, e.g. `Meta-Llama-3-8B-Instruct.Q4_K_M` for
//! `Meta-Llama-3-8B-Instruct.Q4_K_M.gguf`.

use crate::inference::model::has_gguf_extension;
use crate::storage::StorageError;
use std::fs;
use std::path::{Path, PathBuf};

/// Information about a GGUF model file
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Full path to the model file
    pub path: PathBuf,
    /// Id used in settings, the file stem
    pub id: String,
    /// File size in bytes
    pub size_bytes: u64,
}

impl ModelInfo {
    fn from_path(path: PathBuf) -> Result<Self, std::io::Error> {
        let metadata = fs::metadata(&path)?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            path,
            id,
            size_bytes: metadata.len(),
        })
    }
}

/// Scan a directory for GGUF model files, sorted by id.
///
/// A missing directory is not an error, it just holds no models.
pub fn scan_models_directory(directory: &Path) -> Result<Vec<ModelInfo>, StorageError> {
    if !directory.is_dir() {
        tracing::warn!("Models directory does not exist: {}", directory.display());
        return Ok(vec![]);
    }

    let mut models = vec![];

    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if !path.is_file() || !has_gguf_extension(&path) {
            continue;
        }

        match ModelInfo::from_path(path.clone()) {
            Ok(model_info) => {
                tracing::debug!(
                    "Found model: {} ({} bytes)",
                    model_info.id,
                    model_info.size_bytes
                );
                models.push(model_info);
            }
            Err(e) => {
                tracing::warn!("Failed to read model file {:?}: {}", path, e);
            }
        }
    }

    models.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::info!("Found {} model(s) in {}", models.len(), directory.display());

    Ok(models)
}

/// Resolves `model_id` to a model file.
///
/// An id that is itself a path to an existing `.gguf` file is used as is,
/// otherwise it must match the stem of a file in `directory`.
pub fn resolve_model(directory: &Path, model_id: &str) -> Result<PathBuf, StorageError> {
    let direct = Path::new(model_id);
    if has_gguf_extension(direct) && direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    scan_models_directory(directory)?
        .into_iter()
        .find(|m| m.id == model_id)
        .map(|m| m.path)
        .ok_or_else(|| StorageError::ModelNotFound {
            id: model_id.to_string(),
            directory: directory.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_scan_models_directory() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("model2.gguf")).unwrap();
        File::create(temp_dir.path().join("model1.GGUF")).unwrap();
        File::create(temp_dir.path().join("not_a_model.txt")).unwrap();

        let models = scan_models_directory(temp_dir.path()).unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "model1");
        assert_eq!(models[1].id, "model2");
    }

    #[test]
    fn test_scan_nonexistent_directory() {
        let models = scan_models_directory(Path::new("/this/path/does/not/exist")).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn test_resolve_by_stem() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Llama-3-8B-Instruct.Q4_K_M.gguf");
        File::create(&path).unwrap();

        let resolved = resolve_model(temp_dir.path(), "Llama-3-8B-Instruct.Q4_K_M").unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_resolve_direct_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.gguf");
        File::create(&path).unwrap();

        let other_dir = TempDir::new().unwrap();
        let resolved = resolve_model(other_dir.path(), path.to_str().unwrap()).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn test_resolve_unknown_model() {
        let temp_dir = TempDir::new().unwrap();
        let result = resolve_model(temp_dir.path(), "missing");
        assert!(matches!(result, Err(StorageError::ModelNotFound { .. })));
    }
}
