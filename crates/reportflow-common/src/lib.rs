//! Reportflow Common - Shared utilities and types
//!
//! This crate provides the error type, configuration structs, well-known
//! identities and utility functions used across all reportflow components.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::{
    BaseConfig, MailboxConfig, MonitorConfig, PipelineConfig, RetentionConfig, RetryConfig,
    StagePipelineConfig,
};
pub use constants::*;
pub use error::{ReportflowError, Result};
pub use types::ReportType;
pub use utils::*;
