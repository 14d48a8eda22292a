//! Keepframe Common Library
//!
//! Shared data model, configuration and errors for the Keepframe test
//! artifact lifecycle manager.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{CaptureConfig, KeepframeConfig, ReportConfig, RetentionConfig, StoreConfig};
pub use error::{Error, Result};
pub use types::*;

/// Keepframe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "keepframe.toml";
