//! Core types, config, errors, and document state for the AG-UI gateway.

pub mod config;
pub mod document;
pub mod error;
pub mod transcript;
pub mod types;
