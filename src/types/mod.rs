//! Shared domain types

pub mod message;

pub use message::{Message, Role};
