//! Error types for Keepframe configuration and shared plumbing

use thiserror::Error;

/// Result type alias using Keepframe Error
pub type Result<T> = std::result::Result<T, Error>;

/// Keepframe error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),
}
