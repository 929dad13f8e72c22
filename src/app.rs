//! Root Dioxus application component
//!
//! Loads settings, starts the chat session and mirrors its published state
//! into a signal the rest of the UI reads from.

use std::sync::Arc;

use crate::chat::{ChatHandle, ChatSession, ChatSnapshot, SessionConfig};
use crate::inference::LlamaLoader;
use crate::storage::init_storage;
use crate::storage::settings::{load_settings, AppSettings};
use crate::ui::Layout;
use dioxus::prelude::*;

/// Global application state shared across components
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatHandle,
    pub snapshot: Signal<ChatSnapshot>,
    pub initial_theme: String,
}

impl AppState {
    fn start(settings: &AppSettings) -> Self {
        if let Err(e) = init_storage(&settings.models_directory) {
            tracing::warn!("Could not create models directory: {}", e);
        }

        let loader = Arc::new(LlamaLoader::from_settings(settings));
        let chat = ChatSession::spawn(loader, SessionConfig::from_settings(settings));
        tracing::info!("Chat session started for model {}", settings.model_id);

        Self {
            snapshot: Signal::new(chat.snapshot()),
            chat,
            initial_theme: settings.theme.clone(),
        }
    }
}

#[component]
pub fn App() -> Element {
    let app_state = use_hook(|| AppState::start(&load_settings()));

    let mut snapshot = app_state.snapshot;
    let chat = app_state.chat.clone();
    use_future(move || {
        let mut updates = chat.subscribe();
        async move {
            loop {
                snapshot.set(updates.borrow_and_update().clone());
                if updates.changed().await.is_err() {
                    tracing::warn!("Chat session ended");
                    break;
                }
            }
        }
    });

    use_context_provider(|| app_state.clone());

    rsx! {
        Layout {}
    }
}
