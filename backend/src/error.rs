//! Error types for the DofusDB ingestion pipeline.
//!
//! Each stage owns an error enum:
//!
//! - [`ConfigError`] - Source/entity configuration loading
//! - [`CollectError`] - HTTP collection from the external API
//! - [`ConversionError`] - Raw payload conversion
//! - [`StoreError`] - SQLite persistence
//! - [`PipelineError`] - Top-level orchestration
//!
//! Validation and integration do not appear here: they always report through
//! [`crate::models::ValidationResult`] and [`crate::models::IntegrationResult`].

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading source or entity configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration exists for the source (or the source/entity pair).
    #[error("Config not found: {}", describe_target(.source_id, .entity))]
    NotFound {
        source_id: String,
        entity: Option<String>,
    },

    /// Failed to read a configuration file.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON for the expected shape.
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration parsed but is semantically unusable.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn describe_target(source: &str, entity: &Option<String>) -> String {
    match entity {
        Some(e) => format!("source '{}', entity '{}'", source, e),
        None => format!("source '{}'", source),
    }
}

impl ConfigError {
    pub fn source_not_found(source: &str) -> Self {
        ConfigError::NotFound {
            source_id: source.to_string(),
            entity: None,
        }
    }

    pub fn entity_not_found(source: &str, entity: &str) -> Self {
        ConfigError::NotFound {
            source_id: source.to_string(),
            entity: Some(entity.to_string()),
        }
    }
}

// =============================================================================
// Collection Errors
// =============================================================================

/// Errors while fetching records from the external API.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Non-2xx response.
    #[error("Fetch error: HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Transport-level failure (DNS, connect, timeout...).
    #[error("Request failed: {0}")]
    Request(String),

    /// Response body is not the expected JSON shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Endpoint could not be built from configuration.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CollectError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CollectError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// =============================================================================
// Conversion Errors
// =============================================================================

/// Errors that abort conversion of a single raw record.
///
/// Missing fields and malformed numbers never end up here.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Raw payload is not a JSON object.
    #[error("Invalid raw payload: {0}")]
    InvalidPayload(String),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned: {0}")]
    Lock(String),

    #[error("Stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level orchestration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Collect error: {0}")]
    Collect(#[from] CollectError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

pub type ConfigResult<T> = Result<T, ConfigError>;

pub type CollectResult<T> = Result<T, CollectError>;

pub type ConversionResult<T> = Result<T, ConversionError>;

pub type StoreResult<T> = Result<T, StoreError>;

pub type PipelineResult<T> = Result<T, PipelineError>;
