//! Cached read-through access to formulas, conversion config and
//! characteristic rules.
//!
//! Backends (SQLite in production, [`MemoryBackend`] in tests) are read once
//! and cached until [`FormulaStore::clear_cache`] /
//! [`CharacteristicStore::clear_cache`] is called. A failing backend never
//! blocks conversion: lookups log a warning and behave as "nothing stored".

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::Cache;
use crate::error::StoreResult;
use crate::models::{canonical_entity, CharacteristicRule, ConversionConfig, ConversionFormula, Limits};

/// Entity key of formulas that apply to every entity type.
pub const ANY_ENTITY: &str = "*";

/// Source of formula rows and the global conversion config.
pub trait FormulaBackend: Send + Sync {
    fn load_formulas(&self) -> StoreResult<Vec<ConversionFormula>>;
    fn load_conversion_config(&self) -> StoreResult<ConversionConfig>;
}

/// Source of characteristic rules.
pub trait CharacteristicBackend: Send + Sync {
    fn load_rules(&self) -> StoreResult<Vec<CharacteristicRule>>;
}

/// In-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub formulas: Vec<ConversionFormula>,
    pub config: ConversionConfig,
    pub rules: Vec<CharacteristicRule>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formula(mut self, formula: ConversionFormula) -> Self {
        self.formulas.push(formula);
        self
    }

    pub fn with_rule(mut self, rule: CharacteristicRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_config(mut self, config: ConversionConfig) -> Self {
        self.config = config;
        self
    }
}

impl FormulaBackend for MemoryBackend {
    fn load_formulas(&self) -> StoreResult<Vec<ConversionFormula>> {
        Ok(self.formulas.clone())
    }

    fn load_conversion_config(&self) -> StoreResult<ConversionConfig> {
        Ok(self.config.clone())
    }
}

impl CharacteristicBackend for MemoryBackend {
    fn load_rules(&self) -> StoreResult<Vec<CharacteristicRule>> {
        Ok(self.rules.clone())
    }
}

type FormulaKey = (String, String);

// =============================================================================
// FormulaStore
// =============================================================================

/// Cached formulas and conversion config.
pub struct FormulaStore {
    backend: Arc<dyn FormulaBackend>,
    formulas: Cache<(), HashMap<FormulaKey, ConversionFormula>>,
    config: Cache<(), ConversionConfig>,
}

impl FormulaStore {
    pub fn new(backend: Arc<dyn FormulaBackend>) -> Self {
        Self {
            backend,
            formulas: Cache::new(),
            config: Cache::new(),
        }
    }

    /// Formula for (characteristic, entity). Tries the entity as given, then
    /// its canonical alias, then the `*` entity.
    pub fn formula(&self, characteristic: &str, entity: &str) -> Option<ConversionFormula> {
        let formulas = self
            .formulas
            .get_or_try_load(&(), || {
                let rows = self.backend.load_formulas()?;
                tracing::debug!(count = rows.len(), "loaded conversion formulas");
                Ok::<_, crate::error::StoreError>(
                    rows.into_iter()
                        .map(|f| ((f.characteristic_id.clone(), f.entity.clone()), f))
                        .collect(),
                )
            })
            .map_err(|e| tracing::warn!(error = %e, "cannot load conversion formulas"))
            .ok()?;

        [entity, canonical_entity(entity), ANY_ENTITY]
            .into_iter()
            .find_map(|e| formulas.get(&(characteristic.to_string(), e.to_string())))
            .cloned()
    }

    /// Global conversion config; defaults when the backend cannot be read.
    pub fn conversion_config(&self) -> Arc<ConversionConfig> {
        match self
            .config
            .get_or_try_load(&(), || self.backend.load_conversion_config())
        {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "cannot load conversion config, using defaults");
                Arc::new(ConversionConfig::default())
            }
        }
    }

    /// Must be called after any administrative edit of formulas or config.
    pub fn clear_cache(&self) {
        self.formulas.invalidate();
        self.config.invalidate();
    }
}

// =============================================================================
// CharacteristicStore
// =============================================================================

/// Cached characteristic rules, grouped by (canonical) entity type.
pub struct CharacteristicStore {
    backend: Arc<dyn CharacteristicBackend>,
    rules: Cache<(), HashMap<String, Vec<CharacteristicRule>>>,
}

impl CharacteristicStore {
    pub fn new(backend: Arc<dyn CharacteristicBackend>) -> Self {
        Self {
            backend,
            rules: Cache::new(),
        }
    }

    /// Rules attached to an entity type, after alias resolution.
    pub fn rules_for(&self, entity: &str) -> Vec<CharacteristicRule> {
        let entity = canonical_entity(entity);
        self.load()
            .and_then(|rules| rules.get(entity).cloned())
            .unwrap_or_default()
    }

    pub fn rule(&self, characteristic: &str, entity: &str) -> Option<CharacteristicRule> {
        self.rules_for(entity)
            .into_iter()
            .find(|r| r.characteristic_id == characteristic)
    }

    /// Bounds of a characteristic, if the rule has any.
    pub fn limits(&self, characteristic: &str, entity: &str) -> Option<Limits> {
        self.rule(characteristic, entity)
            .map(|r| r.limits())
            .filter(|l| !l.is_unbounded())
    }

    pub fn clear_cache(&self) {
        self.rules.invalidate();
    }

    fn load(&self) -> Option<Arc<HashMap<String, Vec<CharacteristicRule>>>> {
        self.rules
            .get_or_try_load(&(), || {
                let rows = self.backend.load_rules()?;
                let mut grouped: HashMap<String, Vec<CharacteristicRule>> = HashMap::new();
                for rule in rows {
                    grouped
                        .entry(canonical_entity(&rule.entity).to_string())
                        .or_default()
                        .push(rule);
                }
                Ok::<_, crate::error::StoreError>(grouped)
            })
            .map_err(|e| tracing::warn!(error = %e, "cannot load characteristic rules"))
            .ok()
    }
}
