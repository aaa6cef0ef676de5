//! Source and entity configuration.
//!
//! A source (e.g. `dofusdb`) is described by `<root>/<source>/source.json`;
//! each of its entities by `<root>/<source>/entities/<entity>.json`:
//!
//! ```json
//! {
//!   "entity": "monsters",
//!   "entity_type": "monster",
//!   "sub_entities": ["creatures", "monsters"],
//!   "endpoints": { "fetch_one": "/monsters/{id}", "fetch_many": "/monsters" },
//!   "filters": { "supported": ["race", "level"] },
//!   "mapping": [
//!     { "key": "level", "from": { "path": "grades.0.level" },
//!       "to": [{ "model": "creatures" }], "formatters": [{ "type": "convert_level" }] }
//!   ]
//! }
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::SubEntity;

/// An external API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub label: String,
    pub base_url: String,
    /// Language used when the caller does not pick one
    #[serde(default)]
    pub default_lang: Option<String>,
    /// Per-request HTTP timeout, overriding the global setting
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Endpoint path templates, relative to the source base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Must contain `{id}`
    pub fetch_one: String,
    pub fetch_many: String,
}

/// Skip/limit query convention of the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_skip_param")]
    pub skip_param: String,
    #[serde(default = "default_limit_param")]
    pub limit_param: String,
    /// Page size when the caller gives neither `page_size` nor `limit`
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Largest page the API serves; requests are capped to it
    #[serde(default)]
    pub max_page_size: Option<usize>,
}

fn default_skip_param() -> String {
    "$skip".to_string()
}

fn default_limit_param() -> String {
    "$limit".to_string()
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            skip_param: default_skip_param(),
            limit_param: default_limit_param(),
            page_size: None,
            max_page_size: None,
        }
    }
}

/// Filter keys callers may pass through to the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    #[serde(default)]
    pub supported: Vec<String>,
}

impl Filters {
    pub fn is_supported(&self, key: &str) -> bool {
        self.supported.iter().any(|k| k == key)
    }
}

/// Configuration of one entity of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub label: String,
    /// Entity type used for formulas, validation and integration
    pub entity_type: String,
    /// Raw field holding the external id
    #[serde(default = "default_id_path")]
    pub id_path: String,
    /// Sub-records always present in the converted output
    #[serde(default)]
    pub sub_entities: Vec<SubEntity>,
    pub endpoints: Endpoints,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub mapping: Vec<MappingRule>,
}

fn default_id_path() -> String {
    "id".to_string()
}

/// Where a mapping rule reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSource {
    /// Dotted path; numeric segments index arrays (`grades.0.level`)
    pub path: String,
}

/// Where a mapping rule writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTarget {
    pub model: SubEntity,
    /// Destination field; defaults to the rule key
    #[serde(default)]
    pub field: Option<String>,
}

/// One field mapping: read a path, run formatters, write to targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub key: String,
    pub from: MappingSource,
    pub to: Vec<MappingTarget>,
    /// Applied in order. Empty means pass-through.
    #[serde(default)]
    pub formatters: Vec<Formatter>,
}

impl MappingRule {
    /// Field name written for a target.
    pub fn target_field<'a>(&'a self, target: &'a MappingTarget) -> &'a str {
        target.field.as_deref().unwrap_or(&self.key)
    }
}

/// Closed vocabulary of mapping formatters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Formatter {
    /// Pick the context language out of `{fr: .., en: ..}`
    Translate,
    ToInt,
    ToString,
    Truncate { max: usize },
    /// Replace a null/empty value
    Default { value: Value },
    ConvertLevel,
    /// Uses the converted level already written to the output record
    ConvertLife {
        #[serde(default = "default_level_field")]
        level_field: String,
    },
    ConvertAttribute { characteristic: String },
    ConvertInitiative,
    /// Batch: resistances field map from a raw grade object
    ConvertResistances,
    /// Batch: bonus field map from a raw effects array
    EffectsToBonus,
}

fn default_level_field() -> String {
    "level".to_string()
}

impl Formatter {
    pub fn is_batch(&self) -> bool {
        matches!(self, Formatter::ConvertResistances | Formatter::EffectsToBonus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_config_defaults() {
        let config: EntityConfig = serde_json::from_value(json!({
            "entity_type": "item",
            "endpoints": { "fetch_one": "/items/{id}", "fetch_many": "/items" }
        }))
        .unwrap();

        assert_eq!(config.id_path, "id");
        assert_eq!(config.pagination.skip_param, "$skip");
        assert_eq!(config.pagination.limit_param, "$limit");
        assert!(config.mapping.is_empty());
        assert!(!config.filters.is_supported("level"));
    }

    #[test]
    fn test_mapping_rule_parsing() {
        let rule: MappingRule = serde_json::from_value(json!({
            "key": "life",
            "from": { "path": "grades.0.lifePoints" },
            "to": [{ "model": "creatures" }, { "model": "monsters", "field": "hp" }],
            "formatters": [{ "type": "convert_life" }]
        }))
        .unwrap();

        assert_eq!(rule.target_field(&rule.to[0]), "life");
        assert_eq!(rule.target_field(&rule.to[1]), "hp");
        assert_eq!(
            rule.formatters[0],
            Formatter::ConvertLife { level_field: "level".into() }
        );
    }

    #[test]
    fn test_mapping_target_typo_fails() {
        let parsed: Result<MappingRule, _> = serde_json::from_value(json!({
            "key": "name",
            "from": { "path": "name" },
            "to": [{ "model": "creature" }]
        }));
        assert!(parsed.is_err());
    }
}
