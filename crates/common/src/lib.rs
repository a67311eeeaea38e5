//! FSQSB Common Library
//!
//! Data model, error taxonomy, request signing and session state shared by
//! the FSQSB client.

pub mod auth;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use auth::{sign, AuthPayload, Credential, Digest, SessionStore};
pub use error::{Error, Result};
pub use types::*;

/// FSQSB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".fsqsb")
}

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
