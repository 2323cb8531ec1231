//! Shared types, error model, and configuration for SubjectScan.
//!
//! This crate is the foundation depended on by all other SubjectScan crates.
//! It provides:
//! - [`ScanError`], the unified error type
//! - Domain types ([`SearchResult`], [`ContentItem`], [`KeywordRecord`], [`ScanJob`], [`SubjectKey`])
//! - Configuration ([`AppConfig`], [`ScanSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, LlmConfig, LlmSettings, ScanSettings, SearchConfig,
    SearchSettings, config_dir,
    config_file_path, init_config, load_config, load_config_from, read_secret, resolve_data_dir,
    validate_credentials,
};
pub use error::{Result, ScanError};
pub use types::{
    ContentItem, DmcaStatus, JobId, JobStatus, KeywordRecord, ScanJob, SearchResult, SubjectKey,
    normalize_keyword, today, url_hash,
};
