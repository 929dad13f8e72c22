//! LocalChat - chat with a local LLM
//!
//! Desktop entry point: sets up logging and launches the Dioxus window.

use dioxus::desktop::{Config, LogicalSize, WindowBuilder};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use localchat::app::App;

fn main() {
    // RUST_LOG wins when set
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("localchat=info")))
        .init();

    info!("Starting LocalChat v{}", env!("CARGO_PKG_VERSION"));

    dioxus::LaunchBuilder::desktop()
        .with_cfg(
            Config::default().with_window(
                WindowBuilder::new()
                    .with_title("LocalChat")
                    .with_inner_size(LogicalSize::new(1000.0, 800.0)),
            ),
        )
        .launch(App);
}
