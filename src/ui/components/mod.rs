//! Shared UI components

pub mod loading;
