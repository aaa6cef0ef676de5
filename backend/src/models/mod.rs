//! Domain models shared by every pipeline stage.
//!
//! - [`SubEntity`] - Destination entity kinds a raw record fans out into
//! - [`ConvertedRecord`] - Output of conversion, one field map per sub-entity
//! - [`ConversionFormula`], [`ConversionConfig`] - Formula store data
//! - [`CharacteristicRule`] - Limits and validation rules per characteristic
//! - [`ValidationResult`] - Structured validation outcome
//! - [`IntegrationResult`] - Per sub-entity integration actions

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Flat field map of a single sub-record.
pub type FieldMap = Map<String, Value>;

// =============================================================================
// Sub-entities
// =============================================================================

/// Destination entity kinds.
///
/// Mapping targets in entity configs deserialize into this enum, so an unknown
/// key fails when the config is loaded instead of silently producing a stray
/// sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubEntity {
    Creatures,
    Monsters,
    Classes,
    Items,
    Spells,
}

impl SubEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubEntity::Creatures => "creatures",
            SubEntity::Monsters => "monsters",
            SubEntity::Classes => "classes",
            SubEntity::Items => "items",
            SubEntity::Spells => "spells",
        }
    }
}

impl fmt::Display for SubEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Entity aliases
// =============================================================================

/// Entity types that share the rule set of another type.
const ENTITY_ALIASES: &[(&str, &str)] = &[("breed", "class"), ("classe", "class")];

/// Resolve an entity type through the alias table (`breed` -> `class`).
pub fn canonical_entity(entity: &str) -> &str {
    ENTITY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == entity)
        .map(|(_, target)| *target)
        .unwrap_or(entity)
}

// =============================================================================
// Converted record
// =============================================================================

/// A raw record after conversion: one flat field map per sub-entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConvertedRecord {
    sub_records: BTreeMap<SubEntity, FieldMap>,
}

impl ConvertedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with an empty field map for each given sub-entity.
    pub fn with_sub_entities(kinds: impl IntoIterator<Item = SubEntity>) -> Self {
        Self {
            sub_records: kinds.into_iter().map(|k| (k, FieldMap::new())).collect(),
        }
    }

    pub fn get(&self, kind: SubEntity) -> Option<&FieldMap> {
        self.sub_records.get(&kind)
    }

    pub fn sub_record_mut(&mut self, kind: SubEntity) -> &mut FieldMap {
        self.sub_records.entry(kind).or_default()
    }

    pub fn insert_field(&mut self, kind: SubEntity, field: impl Into<String>, value: Value) {
        self.sub_record_mut(kind).insert(field.into(), value);
    }

    /// Merge a field map into one sub-record, overwriting existing keys.
    pub fn merge_fields(&mut self, kind: SubEntity, fields: FieldMap) {
        self.sub_record_mut(kind).extend(fields);
    }

    pub fn field(&self, kind: SubEntity, name: &str) -> Option<&Value> {
        self.sub_records.get(&kind).and_then(|m| m.get(name))
    }

    /// First non-null value for `name` across all sub-records.
    pub fn find_field(&self, name: &str) -> Option<(SubEntity, &Value)> {
        self.sub_records.iter().find_map(|(kind, fields)| {
            fields
                .get(name)
                .filter(|v| !v.is_null())
                .map(|v| (*kind, v))
        })
    }

    pub fn sub_entities(&self) -> impl Iterator<Item = SubEntity> + '_ {
        self.sub_records.keys().copied()
    }

    pub fn contains(&self, kind: SubEntity) -> bool {
        self.sub_records.contains_key(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubEntity, &FieldMap)> {
        self.sub_records.iter().map(|(k, v)| (*k, v))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Formulas
// =============================================================================

/// Closed set of numeric transform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaType {
    /// `round(d / divisor)`
    Linear,
    /// `round(d / divisor + level * level_factor)`
    LinearWithLevel,
    /// `round(base + coeff * sqrt(max(0, (d - offset) / denom)))`
    SqrtAttribute,
    /// `round(factor * (d - offset) / denom)` with optional ratio clamps
    RatioInitiative,
    /// `round(d)`, used for pass-through characteristics
    Identity,
}

impl FormulaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaType::Linear => "linear",
            FormulaType::LinearWithLevel => "linear_with_level",
            FormulaType::SqrtAttribute => "sqrt_attribute",
            FormulaType::RatioInitiative => "ratio_initiative",
            FormulaType::Identity => "identity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linear" => Some(FormulaType::Linear),
            "linear_with_level" => Some(FormulaType::LinearWithLevel),
            "sqrt_attribute" => Some(FormulaType::SqrtAttribute),
            "ratio_initiative" => Some(FormulaType::RatioInitiative),
            "identity" => Some(FormulaType::Identity),
            _ => None,
        }
    }
}

/// Numeric knobs of a formula (`divisor`, `level_factor`, `base`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormulaParameters(pub BTreeMap<String, f64>);

impl FormulaParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    /// Parameter value, or `default` when absent or not finite.
    pub fn get(&self, key: &str, default: f64) -> f64 {
        self.0
            .get(key)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    /// Boolean knob: any non-zero value is true.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key, 0.0) != 0.0
    }
}

/// A typed formula: shape plus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedFormula {
    pub formula_type: FormulaType,
    #[serde(default)]
    pub parameters: FormulaParameters,
}

impl TypedFormula {
    pub fn new(formula_type: FormulaType, parameters: FormulaParameters) -> Self {
        Self {
            formula_type,
            parameters,
        }
    }
}

/// A formula row keyed by (`characteristic_id`, `entity`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionFormula {
    pub characteristic_id: String,
    pub entity: String,
    #[serde(default)]
    pub formula_type: Option<FormulaType>,
    #[serde(default)]
    pub parameters: FormulaParameters,
    /// Free-form expression; wins over `formula_type` when non-empty.
    #[serde(default)]
    pub conversion_formula: Option<String>,
    #[serde(default)]
    pub handler_name: Option<String>,
}

impl ConversionFormula {
    pub fn new(characteristic_id: &str, entity: &str) -> Self {
        Self {
            characteristic_id: characteristic_id.to_string(),
            entity: entity.to_string(),
            formula_type: None,
            parameters: FormulaParameters::new(),
            conversion_formula: None,
            handler_name: None,
        }
    }

    pub fn typed(mut self, formula_type: FormulaType, parameters: FormulaParameters) -> Self {
        self.formula_type = Some(formula_type);
        self.parameters = parameters;
        self
    }

    pub fn with_expression(mut self, expression: &str) -> Self {
        self.conversion_formula = Some(expression.to_string());
        self
    }

    pub fn with_handler(mut self, handler: &str) -> Self {
        self.handler_name = Some(handler.to_string());
        self
    }

    /// Non-blank expression, if any.
    pub fn expression(&self) -> Option<&str> {
        self.conversion_formula
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn typed_formula(&self) -> Option<TypedFormula> {
        self.formula_type
            .map(|t| TypedFormula::new(t, self.parameters.clone()))
    }
}

// =============================================================================
// Global conversion configuration
// =============================================================================

/// Where clamping limits come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitsSource {
    /// Characteristic rules, falling back to local limits.
    #[default]
    Characteristics,
    /// Local `limits` table only.
    Local,
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Limits {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Round, then clamp to the integers inside the bounds (`ceil(min)..=floor(max)`).
    ///
    /// When no integer lies inside the bounds the result is `ceil(min)`.
    pub fn clamp(&self, value: f64) -> f64 {
        let mut v = value.round();
        if let Some(max) = self.max {
            v = v.min(max.floor());
        }
        if let Some(min) = self.min {
            v = v.max(min.ceil());
        }
        v
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }
}

/// Global conversion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Characteristics copied through (rounded, clamped) without a formula.
    #[serde(default)]
    pub pass_through_characteristics: Vec<String>,
    /// Default formula per characteristic, used when no formula row exists.
    #[serde(default)]
    pub characteristic_transformations: HashMap<String, TypedFormula>,
    #[serde(default)]
    pub limits_source: LimitsSource,
    /// entity -> characteristic -> limits
    #[serde(default)]
    pub limits: HashMap<String, HashMap<String, Limits>>,
    /// DofusDB element id -> resistance characteristic id
    #[serde(default = "default_element_table")]
    pub element_id_to_resistance: BTreeMap<String, String>,
    /// DofusDB effect id -> characteristic id
    #[serde(default)]
    pub effect_id_to_characteristic: BTreeMap<String, String>,
}

fn default_element_table() -> BTreeMap<String, String> {
    [
        ("0", "res_neutral"),
        ("1", "res_earth"),
        ("2", "res_fire"),
        ("3", "res_water"),
        ("4", "res_air"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            pass_through_characteristics: Vec::new(),
            characteristic_transformations: HashMap::new(),
            limits_source: LimitsSource::default(),
            limits: HashMap::new(),
            element_id_to_resistance: default_element_table(),
            effect_id_to_characteristic: BTreeMap::new(),
        }
    }
}

impl ConversionConfig {
    pub fn local_limits(&self, entity: &str, characteristic: &str) -> Option<Limits> {
        self.limits
            .get(entity)
            .and_then(|m| m.get(characteristic))
            .copied()
    }

    pub fn is_pass_through(&self, characteristic: &str) -> bool {
        self.pass_through_characteristics
            .iter()
            .any(|c| c == characteristic)
    }
}

// =============================================================================
// Characteristic rules
// =============================================================================

/// Limits and validation rule of one characteristic for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicRule {
    pub characteristic_id: String,
    pub entity: String,
    /// Destination field name when it differs from the characteristic id.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub value_available: Option<Vec<Value>>,
}

impl CharacteristicRule {
    pub fn new(characteristic_id: &str, entity: &str) -> Self {
        Self {
            characteristic_id: characteristic_id.to_string(),
            entity: entity.to_string(),
            field: None,
            required: false,
            min: None,
            max: None,
            value_available: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn bounded(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.value_available = Some(values);
        self
    }

    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.characteristic_id)
    }

    pub fn limits(&self) -> Limits {
        Limits::new(self.min, self.max)
    }
}

// =============================================================================
// Validation result
// =============================================================================

/// One validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Outcome of validating a converted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn error_paths(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.path.as_str()).collect()
    }
}

// =============================================================================
// Integration result
// =============================================================================

/// What happened (or would happen) to one sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationAction {
    Created,
    Updated,
    Skipped,
    WouldCreate,
    WouldUpdate,
    Failed,
}

impl IntegrationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationAction::Created => "created",
            IntegrationAction::Updated => "updated",
            IntegrationAction::Skipped => "skipped",
            IntegrationAction::WouldCreate => "would_create",
            IntegrationAction::WouldUpdate => "would_update",
            IntegrationAction::Failed => "failed",
        }
    }
}

impl fmt::Display for IntegrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubEntityOutcome {
    pub action: IntegrationAction,
    pub id: Option<i64>,
    pub message: String,
}

/// Outcome of integrating one converted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub success: bool,
    pub entity_type: String,
    pub dry_run: bool,
    pub outcomes: BTreeMap<SubEntity, SubEntityOutcome>,
    pub message: String,
}

impl IntegrationResult {
    /// Overall failure with no per-sub-entity outcome.
    pub fn failure(entity_type: &str, dry_run: bool, message: impl Into<String>) -> Self {
        Self {
            success: false,
            entity_type: entity_type.to_string(),
            dry_run,
            outcomes: BTreeMap::new(),
            message: message.into(),
        }
    }

    pub fn action(&self, kind: SubEntity) -> Option<IntegrationAction> {
        self.outcomes.get(&kind).map(|o| o.action)
    }

    pub fn id(&self, kind: SubEntity) -> Option<i64> {
        self.outcomes.get(&kind).and_then(|o| o.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_converted_record_serializes_by_sub_entity_key() {
        let mut record = ConvertedRecord::with_sub_entities([SubEntity::Creatures, SubEntity::Monsters]);
        record.insert_field(SubEntity::Creatures, "level", json!(5));
        record.insert_field(SubEntity::Monsters, "dofusdb_id", json!(31));

        let value = record.to_json();
        assert_eq!(value["creatures"]["level"], 5);
        assert_eq!(value["monsters"]["dofusdb_id"], 31);
    }

    #[test]
    fn test_find_field_skips_nulls() {
        let mut record = ConvertedRecord::new();
        record.insert_field(SubEntity::Creatures, "life", Value::Null);
        record.insert_field(SubEntity::Monsters, "life", json!(12));

        let (kind, value) = record.find_field("life").unwrap();
        assert_eq!(kind, SubEntity::Monsters);
        assert_eq!(value, &json!(12));
        assert!(record.find_field("missing").is_none());
    }

    #[test]
    fn test_unknown_sub_entity_is_rejected() {
        let parsed: Result<SubEntity, _> = serde_json::from_value(json!("monstres"));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_canonical_entity() {
        assert_eq!(canonical_entity("breed"), "class");
        assert_eq!(canonical_entity("class"), "class");
        assert_eq!(canonical_entity("monster"), "monster");
    }

    #[test]
    fn test_limits_clamp() {
        let limits = Limits::new(Some(1.0), Some(20.0));
        assert_eq!(limits.clamp(50.0), 20.0);
        assert_eq!(limits.clamp(-3.0), 1.0);
        assert_eq!(limits.clamp(7.0), 7.0);
        assert!(Limits::default().is_unbounded());

        let fractional = Limits::new(Some(0.5), Some(2.5));
        assert_eq!(fractional.clamp(2.6), 2.0);
        assert_eq!(fractional.clamp(2.4), 2.0);
        assert_eq!(fractional.clamp(0.2), 1.0);
        assert!(fractional.contains(fractional.clamp(99.0)));
    }

    #[test]
    fn test_expression_ignores_blank() {
        let formula = ConversionFormula::new("level", "monster").with_expression("   ");
        assert!(formula.expression().is_none());
    }

    #[test]
    fn test_conversion_config_defaults_element_table() {
        let config: ConversionConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.element_id_to_resistance.get("2").map(String::as_str), Some("res_fire"));
        assert_eq!(config.limits_source, LimitsSource::Characteristics);
    }
}
