#![deny(unsafe_code)]

/// Terminal shell driving a chat session.
pub mod app;
/// Settings persistence.
pub mod settings;

pub use app::{AppError, ChatShell, Command};
pub use settings::{ChatSettings, SettingsError, SettingsStore};
