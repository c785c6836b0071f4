//! Shared types, error model, and configuration for tenantmove.
//!
//! This crate is the foundation depended on by all other tenantmove crates.
//! It provides:
//! - [`MigrationError`]: the unified error type
//! - Domain types ([`Instance`], [`Side`], [`RunId`])
//! - Configuration ([`AppConfig`], [`HttpSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, HttpConfig, HttpSettings, InstanceConfig, OutputConfig, SessionConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{MigrationError, Result};
pub use types::{Instance, RunId, Side};
