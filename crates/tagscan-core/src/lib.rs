//! Shared domain types and configuration for tagscan.
//!
//! Scan events and notification outcomes live here so the coordinator, the
//! HTTP host and the CLI agree on a single vocabulary.

pub mod app_config;
pub mod config;
pub mod outcome;
pub mod scan;
pub mod whatsapp;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use outcome::{NotificationOutcome, OutcomeReason, Severity};
pub use scan::{Coordinates, DeviceInfo, ScanEvent, ScanSource};
pub use whatsapp::{contact_owner_message, whatsapp_link};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
