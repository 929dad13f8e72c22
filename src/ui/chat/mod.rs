//! Chat interface components
//!
//! Contains the main chat view, message display, and input components.

pub mod input;
pub mod markdown;
pub mod message;

use dioxus::prelude::*;
use input::ChatInput;
use message::MessageBubble;

use crate::app::AppState;
use crate::chat::EngineStatus;

#[component]
pub fn ChatView() -> Element {
    let app_state = use_context::<AppState>();
    let snapshot = app_state.snapshot.read().clone();

    let is_generating = snapshot.phase.is_generating();
    let ready = snapshot.engine == EngineStatus::Ready;

    let handle_send = {
        let chat = app_state.chat.clone();
        move |text: String| {
            if let Err(e) = chat.submit(text) {
                tracing::error!("Failed to submit prompt: {}", e);
            }
        }
    };

    let handle_stop = {
        let chat = app_state.chat.clone();
        move |_| {
            if let Err(e) = chat.stop() {
                tracing::error!("Failed to stop generation: {}", e);
            }
        }
    };

    rsx! {
        div { class: "flex flex-col h-full bg-[var(--bg-main)] relative",

            // Messages Area
            div { class: "flex-1 overflow-y-auto p-4 space-y-2 custom-scrollbar scroll-smooth",
                if snapshot.conversation.visible().is_empty() && ready {
                    div { class: "flex flex-col items-center justify-center h-full text-center text-[var(--text-tertiary)] select-none",
                        h1 { class: "text-3xl font-bold mb-2 text-[var(--text-primary)]", "LocalChat" }
                        p { "Ask anything. The model runs on this machine." }
                    }
                }

                for msg in snapshot.conversation.visible().iter() {
                    MessageBubble { key: "{msg.id}", message: msg.clone() }
                }

                div { class: "h-4" }
            }

            ChatInput {
                on_send: handle_send,
                on_stop: handle_stop,
                is_generating: is_generating,
                disabled: !ready,
            }
        }
    }
}
