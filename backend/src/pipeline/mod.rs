//! Collect -> Convert -> Validate -> Integrate, for one record or a batch.
//!
//! # Example
//!
//! ```rust,ignore
//! use dofusdb_ingest::{Pipeline, ImportOptions, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::open(&Settings::from_env())?;
//!     let report = pipeline.import_one("dofusdb", "monsters", "31", &ImportOptions::default()).await?;
//!     println!("{:?}", report.status);
//!     Ok(())
//! }
//! ```
//!
//! Collect and convert faults abort a single import; in a batch they are
//! recorded on the record and the batch moves on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::collect::{CollectMeta, CollectOptions, CollectService};
use crate::config::{ConfigLoader, EntityConfig};
use crate::conversion::service::read_path;
use crate::conversion::{
    CharacteristicStore, ConversionContext, ConversionFormulas, ConversionService, FormulaStore, HandlerRegistry,
};
use crate::error::PipelineResult;
use crate::integration::{IntegrationOptions, IntegrationService};
use crate::models::{ConvertedRecord, IntegrationAction, IntegrationResult, ValidationResult};
use crate::settings::Settings;
use crate::store::Database;
use crate::validation::ValidationService;

/// Import switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force_update: bool,
    /// Integrate records even when they fail validation
    #[serde(default)]
    pub skip_validation: bool,
    /// Overrides the configured language
    #[serde(default)]
    pub lang: Option<String>,
}

impl ImportOptions {
    fn integration(&self) -> IntegrationOptions {
        IntegrationOptions {
            dry_run: self.dry_run,
            force_update: self.force_update,
        }
    }
}

/// Final state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Integration ran (any action, including skipped)
    Integrated,
    /// Failed validation, not integrated
    Invalid,
    /// Integration reported a failure
    Failed,
    /// Conversion raised an error
    Error,
}

/// Report of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordReport {
    pub external_id: Option<String>,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordReport {
    /// Action applied to the root sub-record, when integration succeeded.
    pub fn action(&self) -> Option<IntegrationAction> {
        self.integration
            .as_ref()
            .filter(|r| r.success)
            .and_then(|r| r.outcomes.values().next())
            .map(|o| o.action)
    }
}

/// Counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub would_create: usize,
    pub would_update: usize,
    pub failed: usize,
    pub invalid: usize,
    pub errors: usize,
}

impl BatchSummary {
    fn record(&mut self, report: &RecordReport) {
        self.total += 1;
        match report.status {
            RecordStatus::Invalid => self.invalid += 1,
            RecordStatus::Error => self.errors += 1,
            RecordStatus::Failed => self.failed += 1,
            RecordStatus::Integrated => match report.action() {
                Some(IntegrationAction::Created) => self.created += 1,
                Some(IntegrationAction::Updated) => self.updated += 1,
                Some(IntegrationAction::Skipped) => self.skipped += 1,
                Some(IntegrationAction::WouldCreate) => self.would_create += 1,
                Some(IntegrationAction::WouldUpdate) => self.would_update += 1,
                Some(IntegrationAction::Failed) | None => self.failed += 1,
            },
        }
    }
}

/// Report of a batch import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub source: String,
    pub entity: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collect: CollectMeta,
    pub summary: BatchSummary,
    pub records: Vec<RecordReport>,
}

/// Wires every stage together.
pub struct Pipeline {
    settings: Settings,
    loader: Arc<ConfigLoader>,
    collect: CollectService,
    conversion: ConversionService,
    validation: ValidationService,
    integration: IntegrationService,
    formulas: Arc<FormulaStore>,
    characteristics: Arc<CharacteristicStore>,
}

impl Pipeline {
    /// Open the configured database and build the pipeline on it.
    pub fn open(settings: &Settings) -> PipelineResult<Self> {
        let database = Database::open(&settings.database)?;
        Ok(Self::new(settings, database))
    }

    /// Build the pipeline on an already opened database.
    pub fn new(settings: &Settings, database: Database) -> Self {
        Self::with_handlers(settings, database, HandlerRegistry::with_builtins())
    }

    pub fn with_handlers(settings: &Settings, database: Database, handlers: HandlerRegistry) -> Self {
        let database = Arc::new(database);
        let loader = Arc::new(ConfigLoader::new(&settings.config_dir));
        let formulas = Arc::new(FormulaStore::new(database.clone()));
        let characteristics = Arc::new(CharacteristicStore::new(database.clone()));
        let conversion_formulas = Arc::new(ConversionFormulas::new(
            formulas.clone(),
            characteristics.clone(),
            Arc::new(handlers),
        ));

        Self {
            settings: settings.clone(),
            collect: CollectService::new(loader.clone(), settings),
            conversion: ConversionService::new(loader.clone(), conversion_formulas),
            validation: ValidationService::new(characteristics.clone()),
            integration: IntegrationService::new(database),
            loader,
            formulas,
            characteristics,
        }
    }

    pub fn collect(&self) -> &CollectService {
        &self.collect
    }

    /// Drop every cached config, formula and rule.
    pub fn clear_caches(&self) {
        self.loader.invalidate();
        self.formulas.clear_cache();
        self.characteristics.clear_cache();
    }

    /// Convert a raw record without validating or integrating it.
    pub fn convert(&self, source: &str, entity: &str, raw: &Value, lang: Option<&str>) -> PipelineResult<ConvertedRecord> {
        let config = self.loader.load_entity(source, entity)?;
        let lang = self.lang(source, lang)?;
        let context = self.context(&config, Some(&lang));
        Ok(self.conversion.convert_with(&config, raw, &context)?)
    }

    /// Fetch one record by external id and run it through every stage.
    pub async fn import_one(
        &self,
        source: &str,
        entity: &str,
        external_id: &str,
        options: &ImportOptions,
    ) -> PipelineResult<RecordReport> {
        let config = self.loader.load_entity(source, entity)?;
        let options = self.with_source_lang(source, options)?;
        let raw = self.collect.fetch_one(source, entity, external_id).await?;
        self.process(&config, &raw, &options)
    }

    /// Collect a batch and run every record through the remaining stages.
    ///
    /// Records whose conversion fails are reported and skipped.
    pub async fn import_many(
        &self,
        source: &str,
        entity: &str,
        filters: &Map<String, Value>,
        collect_options: &CollectOptions,
        options: &ImportOptions,
    ) -> PipelineResult<BatchReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let config = self.loader.load_entity(source, entity)?;
        let options = &self.with_source_lang(source, options)?;

        tracing::info!(%run_id, source, entity, dry_run = options.dry_run, "import started");
        let collected = self.collect.fetch_many(source, entity, filters, collect_options).await?;

        let mut summary = BatchSummary::default();
        let mut records = Vec::with_capacity(collected.items.len());
        for raw in &collected.items {
            let report = self.process(&config, raw, options).unwrap_or_else(|e| {
                let external_id = external_id(&config, raw);
                tracing::warn!(%run_id, external_id = ?external_id, error = %e, "record skipped");
                RecordReport {
                    external_id,
                    status: RecordStatus::Error,
                    validation: None,
                    integration: None,
                    error: Some(e.to_string()),
                }
            });
            summary.record(&report);
            records.push(report);
        }

        tracing::info!(
            %run_id,
            total = summary.total,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            invalid = summary.invalid,
            errors = summary.errors,
            "import finished"
        );

        Ok(BatchReport {
            run_id,
            source: source.to_string(),
            entity: entity.to_string(),
            dry_run: options.dry_run,
            started_at,
            finished_at: Utc::now(),
            collect: collected.meta,
            summary,
            records,
        })
    }

    /// Convert, validate and integrate one raw record.
    pub fn process(&self, config: &EntityConfig, raw: &Value, options: &ImportOptions) -> PipelineResult<RecordReport> {
        let external_id = external_id(config, raw);
        let context = self.context(config, options.lang.as_deref());
        let record = self.conversion.convert_with(config, raw, &context)?;

        let validation = self.validation.validate(&record, &config.entity_type);
        if !validation.valid && !options.skip_validation {
            return Ok(RecordReport {
                external_id,
                status: RecordStatus::Invalid,
                validation: Some(validation),
                integration: None,
                error: None,
            });
        }

        let integration = self
            .integration
            .integrate(&config.entity_type, &record, options.integration());
        let status = if integration.success {
            RecordStatus::Integrated
        } else {
            RecordStatus::Failed
        };

        Ok(RecordReport {
            external_id,
            status,
            validation: Some(validation),
            integration: Some(integration),
            error: None,
        })
    }

    /// Caller language, then the source default, then the global setting.
    fn lang(&self, source: &str, lang: Option<&str>) -> PipelineResult<String> {
        if let Some(lang) = lang.filter(|l| !l.trim().is_empty()) {
            return Ok(lang.to_string());
        }
        let source = self.loader.load_source(source)?;
        Ok(source
            .default_lang
            .clone()
            .unwrap_or_else(|| self.settings.lang.clone()))
    }

    fn with_source_lang(&self, source: &str, options: &ImportOptions) -> PipelineResult<ImportOptions> {
        Ok(ImportOptions {
            lang: Some(self.lang(source, options.lang.as_deref())?),
            ..options.clone()
        })
    }

    fn context(&self, config: &EntityConfig, lang: Option<&str>) -> ConversionContext {
        ConversionContext::new(&config.entity_type, lang.unwrap_or(self.settings.lang.as_str()))
    }
}

/// External id of a raw record, read from the entity's `id_path`.
fn external_id(config: &EntityConfig, raw: &Value) -> Option<String> {
    match read_path(raw, &config.id_path)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
