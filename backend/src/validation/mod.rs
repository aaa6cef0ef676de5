//! Validation of converted records against characteristic rules.
//!
//! Rules are looked up for the canonical entity type (`breed` is validated
//! with the `class` rules). Each rule may require the field, bound it with an
//! inclusive `[min, max]` range, or restrict it to `value_available`.
//!
//! Validation never fails: it always returns a [`ValidationResult`], so batch
//! drivers can report every bad record instead of stopping at the first.
//!
//! # Example
//!
//! ```rust,ignore
//! let result = validator.validate(&record, "breed");
//! if !result.valid {
//!     for issue in &result.errors {
//!         println!("{}: {}", issue.path, issue.message);
//!     }
//! }
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::conversion::CharacteristicStore;
use crate::models::{canonical_entity, CharacteristicRule, ConvertedRecord, SubEntity, ValidationIssue, ValidationResult};

/// Alternative field names accepted for a characteristic.
static FIELD_SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        ("chance", &["luck"][..]),
        ("luck", &["chance"][..]),
        ("life", &["life_points"][..]),
        ("initiative", &["ini"][..]),
    ])
});

/// Validates converted records.
pub struct ValidationService {
    characteristics: Arc<CharacteristicStore>,
}

impl ValidationService {
    pub fn new(characteristics: Arc<CharacteristicStore>) -> Self {
        Self { characteristics }
    }

    /// Check `record` against every rule of `entity_type`.
    pub fn validate(&self, record: &ConvertedRecord, entity_type: &str) -> ValidationResult {
        let canonical = canonical_entity(entity_type);
        let rules = self.characteristics.rules_for(canonical);
        if rules.is_empty() {
            tracing::debug!(entity_type, "no characteristic rules, record is valid");
            return ValidationResult::ok();
        }

        let errors: Vec<ValidationIssue> = rules.iter().filter_map(|rule| check_rule(rule, record)).collect();
        let result = ValidationResult::from_errors(errors);
        if !result.valid {
            tracing::info!(
                entity_type,
                errors = result.errors.len(),
                paths = ?result.error_paths(),
                "record failed validation"
            );
        }
        result
    }
}

/// First non-null value for the rule's field, or one of its synonyms.
fn lookup<'a>(rule: &CharacteristicRule, record: &'a ConvertedRecord) -> Option<(SubEntity, String, &'a Value)> {
    let field = rule.field_name();
    let synonyms = FIELD_SYNONYMS.get(field).copied().unwrap_or_default();

    std::iter::once(field)
        .chain(synonyms.iter().copied())
        .find_map(|name| record.find_field(name).map(|(kind, v)| (kind, name.to_string(), v)))
}

fn check_rule(rule: &CharacteristicRule, record: &ConvertedRecord) -> Option<ValidationIssue> {
    let Some((kind, field, value)) = lookup(rule, record) else {
        return rule.required.then(|| ValidationIssue {
            path: rule.characteristic_id.clone(),
            message: format!("'{}' is required", rule.field_name()),
        });
    };
    let path = format!("{}.{}", kind, field);

    let limits = rule.limits();
    if !limits.is_unbounded() {
        let Some(number) = as_number(value) else {
            return Some(ValidationIssue {
                path,
                message: format!("expected a number, got {}", value),
            });
        };
        if !limits.contains(number) {
            return Some(ValidationIssue {
                path,
                message: format!("{} is outside [{}, {}]", number, bound(limits.min), bound(limits.max)),
            });
        }
    }

    if let Some(allowed) = &rule.value_available {
        if !allowed.iter().any(|candidate| same_value(candidate, value)) {
            return Some(ValidationIssue {
                path,
                message: format!("{} is not one of {}", value, Value::Array(allowed.clone())),
            });
        }
    }

    None
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bound(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Value equality where `5` and `5.0` match.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
