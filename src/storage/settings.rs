//! Settings storage
//!
//! Manages persistence of user preferences and application settings.

use crate::cache::KeyPolicy;
use crate::inference::GenerationParams;
use crate::storage::{get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant that returns responses in markdown format.";

pub const DEFAULT_MODEL_ID: &str = "Meta-Llama-3-8B-Instruct.Q4_K_M";

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model to load at startup: a file stem in `models_directory` or a path
    pub model_id: String,
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// System prompt that seeds every conversation
    pub system_prompt: String,
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Context window size
    pub context_size: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// How prompts are matched against cached responses
    pub cache_key_policy: KeyPolicy,
    /// UI theme: "dark" or "light"
    pub theme: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_tokens: 2048,
            context_size: 4096,
            gpu_layers: 99, // Offload all layers to GPU by default
            cache_key_policy: KeyPolicy::Exact,
            theme: "dark".to_string(),
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        if self.top_k == 0 {
            self.top_k = 40;
        }

        if self.max_tokens == 0 {
            self.max_tokens = 2048;
        }

        if self.context_size == 0 {
            self.context_size = 4096;
        }

        if self.model_id.trim().is_empty() {
            self.model_id = DEFAULT_MODEL_ID.to_string();
        }

        if self.theme != "dark" && self.theme != "light" {
            self.theme = "dark".to_string();
        }
    }

    /// Sampling parameters for the engine
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            seed: 0,
            max_context_size: self.context_size,
        }
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from the default location
///
/// Returns default settings if the file is unreadable or corrupted. A missing
/// file is created with the defaults so it can be edited by hand.
pub fn load_settings() -> AppSettings {
    match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

/// Load settings from `path`, writing defaults there if it does not exist.
pub fn load_settings_from(path: &Path) -> Result<AppSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, writing defaults to {}", path.display());
        let settings = AppSettings::default();
        save_settings_to(path, &settings)?;
        return Ok(settings);
    }

    let json = fs::read_to_string(path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to `path`
pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}
