use dioxus::prelude::*;

use crate::chat::LoadingState;

#[component]
pub fn Spinner(props: SpinnerProps) -> Element {
    let size = props.size.unwrap_or(24);

    rsx! {
        div {
            class: "spinner",
            style: "width: {size}px; height: {size}px; border: 4px solid var(--bg-active); border-top-color: var(--accent-primary); border-radius: 50%; animation: spin 1s linear infinite;",
        }
        style {
            "@keyframes spin {{ to {{ transform: rotate(360deg); }} }}"
        }
    }
}

#[derive(Props, Clone, PartialEq)]
pub struct SpinnerProps {
    #[props(optional)]
    pub size: Option<i32>,
}

/// Full-window overlay shown while the engine is busy
///
/// `label` is the short progress label reported during initialization.
#[component]
pub fn LoadingOverlay(loading: LoadingState, label: String) -> Element {
    if !loading.is_loading {
        return rsx! {};
    }

    rsx! {
        div {
            class: "fixed inset-0 z-50 flex items-center justify-center bg-black/30 backdrop-blur-sm",
            "role": "progressbar",
            "aria-busy": "true",

            div {
                class: "flex flex-col items-center gap-2",
                Spinner { size: 48 }
                span { class: "text-lg font-medium text-white", "{loading.message}" }
                if !label.is_empty() {
                    span { class: "text-sm font-medium text-white", "{label}" }
                }
            }
        }
    }
}
