//! UI components for LocalChat
//!
//! This module contains all user interface components built with Dioxus.

pub mod chat;
pub mod components;

use crate::app::AppState;
use crate::chat::EngineStatus;
use crate::ui::chat::ChatView;
use crate::ui::components::loading::LoadingOverlay;
use dioxus::prelude::*;

#[derive(Clone, Copy, PartialEq)]
enum Theme {
    Light,
    Dark,
}

impl Theme {
    fn from_setting(value: &str) -> Self {
        if value.eq_ignore_ascii_case("light") {
            Theme::Light
        } else {
            Theme::Dark
        }
    }

    fn toggle(&self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

/// Main Application Layout
#[component]
pub fn Layout() -> Element {
    let app_state = use_context::<AppState>();
    let mut theme = use_signal(|| Theme::from_setting(&app_state.initial_theme));

    let snapshot = app_state.snapshot.read().clone();
    let failed = matches!(snapshot.engine, EngineStatus::Failed(_));

    let handle_retry = {
        let chat = app_state.chat.clone();
        move |_| {
            if let Err(e) = chat.retry_init() {
                tracing::error!("Failed to retry engine initialization: {}", e);
            }
        }
    };

    rsx! {
        div {
            "data-theme": "{theme().as_str()}",
            class: "flex h-screen w-screen bg-[var(--bg-main)] text-[var(--text-primary)] transition-colors duration-300 overflow-hidden font-sans",

            link { rel: "stylesheet", href: "assets/styles.css" }

            LoadingOverlay {
                loading: snapshot.loading.clone(),
                label: snapshot.progress_label.clone(),
            }

            main {
                class: "flex-1 flex flex-col h-full relative min-w-0 bg-[var(--bg-main)]",

                div {
                    class: "absolute top-4 right-4 z-40",
                    button {
                        onclick: move |_| theme.set(theme().toggle()),
                        class: "p-2 rounded-full hover:bg-[var(--bg-hover)] text-[var(--text-tertiary)] hover:text-[var(--text-primary)] transition-all active:scale-95",
                        title: "Toggle Theme",

                        if theme() == Theme::Dark {
                            // Sun
                            svg { width: "20", height: "20", view_box: "0 0 24 24", fill: "none", stroke: "currentColor", stroke_width: "2", stroke_linecap: "round", stroke_linejoin: "round", circle { cx: "12", cy: "12", r: "5" }, path { d: "M12 1v2M12 21v2M4.22 4.22l1.42 1.42M18.36 18.36l1.42 1.42M1 12h2M21 12h2M4.22 19.78l1.42-1.42M18.36 5.64l1.42-1.42" } }
                        } else {
                            // Moon
                            svg { width: "20", height: "20", view_box: "0 0 24 24", fill: "none", stroke: "currentColor", stroke_width: "2", stroke_linecap: "round", stroke_linejoin: "round", path { d: "M21 12.79A9 9 0 1 1 11.21 3 7 7 0 0 0 21 12.79z" } }
                        }
                    }
                }

                if let Some(notice) = snapshot.notice.clone() {
                    div {
                        class: "flex items-center justify-between gap-4 mx-4 mt-4 px-4 py-3 rounded-xl border border-[var(--border-subtle)] bg-[var(--bg-error-subtle)] text-[var(--text-error)] text-sm",
                        "role": "alert",
                        span { "{notice}" }
                        if failed {
                            button {
                                onclick: handle_retry,
                                class: "px-3 py-1 rounded-lg border border-current hover:bg-[var(--bg-hover)] transition-colors",
                                "Retry"
                            }
                        }
                    }
                }

                ChatView {}
            }
        }
    }
}
