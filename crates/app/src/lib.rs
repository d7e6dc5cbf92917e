//! Terminal front end of the streaming test-plan assistant.
//!
//! Wires layered settings and the login gate around an [`autoscript_chat::ChatSession`]
//! and renders its transcript as it streams.

pub mod app;
pub mod auth;
pub mod cli;
pub mod commands;
pub mod error;
pub mod extract;
pub mod render;
pub mod settings;

pub use app::AppSession;
pub use error::{AppError, AppResult};
