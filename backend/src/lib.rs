//! # dofusdb-ingest - DofusDB collection and import pipeline
//!
//! Pulls game records from the DofusDB API, converts their raw values into
//! the tabletop game's own value space, validates them against
//! characteristic rules and writes them to the local entity store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌─────────────┐
//! │  Config  │───▶│ Collect  │───▶│ Convert  │───▶│ Validate │───▶│  Integrate  │
//! │  (JSON)  │    │ (paged)  │    │(formulas)│    │ (rules)  │    │  (SQLite)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dofusdb_ingest::{CollectOptions, ImportOptions, Pipeline, Settings};
//! use serde_json::Map;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::open(&Settings::from_env()).unwrap();
//!     let report = pipeline
//!         .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::limit(20), &ImportOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{} created", report.summary.created);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per stage
//! - [`models`] - Converted records, formulas, rules, results
//! - [`config`] - Source and entity configuration
//! - [`collect`] - Paged HTTP collection
//! - [`conversion`] - Formulas, handlers, mapping-driven conversion
//! - [`validation`] - Characteristic rule checks
//! - [`integration`] - Idempotent writes to the entity store
//! - [`store`] - SQLite persistence
//! - [`pipeline`] - Orchestration of all stages
//! - [`cache`] - Injectable read-through cache

// Core modules
pub mod error;
pub mod models;
pub mod settings;
pub mod logging;

// Caching
pub mod cache;

// Stages
pub mod config;
pub mod collect;
pub mod conversion;
pub mod validation;
pub mod integration;

// Persistence
pub mod store;

// Orchestration
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{CollectError, ConfigError, ConversionError, PipelineError, StoreError};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    CharacteristicRule, ConversionConfig, ConversionFormula, ConvertedRecord, FieldMap, FormulaType,
    IntegrationAction, IntegrationResult, SubEntity, ValidationResult,
};

// =============================================================================
// Re-exports - Services
// =============================================================================

pub use collect::{CollectMeta, CollectOptions, CollectOutput, CollectService};
pub use config::{ConfigLoader, EntityConfig, SourceConfig};
pub use conversion::{ConversionContext, ConversionFormulas, ConversionService, HandlerRegistry};
pub use integration::{IntegrationOptions, IntegrationService};
pub use validation::ValidationService;

// =============================================================================
// Re-exports - Store, pipeline, settings
// =============================================================================

pub use pipeline::{BatchReport, ImportOptions, Pipeline, RecordReport, RecordStatus};
pub use settings::Settings;
pub use store::{Database, SeedData, SeedReport};
