//! ConversionService - mapping-driven conversion of raw records.
//!
//! The entity config's `mapping` drives everything: each rule reads a dotted
//! path out of the raw payload, runs its formatters and writes the result to
//! one or more sub-records. Absent data never fails a conversion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::coerce_number;
use super::formulas::ConversionFormulas;
use crate::config::{ConfigLoader, EntityConfig, Formatter, MappingRule};
use crate::error::{ConversionError, ConversionResult};
use crate::models::{ConvertedRecord, FieldMap};

/// Language used when the requested one is missing from a localized object.
pub const FALLBACK_LANG: &str = "fr";

/// Per-call conversion context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionContext {
    /// Picks formulas and limits
    pub entity_type: String,
    /// Picks localized strings
    pub lang: String,
}

impl ConversionContext {
    pub fn new(entity_type: &str, lang: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            lang: lang.to_string(),
        }
    }
}

/// Output of a formatter chain.
#[derive(Debug, Clone, PartialEq)]
enum Formatted {
    Value(Value),
    Fields(FieldMap),
}

/// Read a dotted path (`grades.0.level`) out of a JSON value.
///
/// Numeric segments index arrays. `None` when any segment is missing.
pub fn read_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

/// Localized string out of `{fr: "...", en: "..."}`.
fn translate(value: Value, lang: &str) -> Value {
    let Value::Object(map) = &value else {
        return value;
    };
    let non_empty = |key: &str| {
        map.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
    };
    non_empty(lang)
        .or_else(|| non_empty(FALLBACK_LANG))
        .or_else(|| {
            map.values()
                .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
                .map(|s| Value::String(s.to_string()))
        })
        .unwrap_or(Value::Null)
}

fn to_int(value: Value) -> Value {
    match &value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::from(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Value::from)
            .unwrap_or_else(|| Value::from(n.as_f64().unwrap_or(0.0).round() as i64)),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Value::from(v.round() as i64),
            _ => {
                tracing::debug!(value = %s, "to_int: not a number");
                Value::Null
            }
        },
        _ => Value::Null,
    }
}

fn to_string(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Converts raw records into [`ConvertedRecord`]s.
pub struct ConversionService {
    loader: Arc<ConfigLoader>,
    formulas: Arc<ConversionFormulas>,
}

impl ConversionService {
    pub fn new(loader: Arc<ConfigLoader>, formulas: Arc<ConversionFormulas>) -> Self {
        Self { loader, formulas }
    }

    /// Convert a raw record of `source`/`entity`.
    ///
    /// Fails only when the entity config cannot be loaded or the payload is
    /// neither an object nor null.
    pub fn convert(
        &self,
        source: &str,
        entity: &str,
        raw: &Value,
        context: &ConversionContext,
    ) -> ConversionResult<ConvertedRecord> {
        let config = self.loader.load_entity(source, entity)?;
        self.convert_with(&config, raw, context)
    }

    /// Convert a raw record with an already loaded entity config.
    pub fn convert_with(
        &self,
        config: &EntityConfig,
        raw: &Value,
        context: &ConversionContext,
    ) -> ConversionResult<ConvertedRecord> {
        if !(raw.is_object() || raw.is_null()) {
            return Err(ConversionError::InvalidPayload(format!(
                "expected an object for '{}', got {}",
                config.entity,
                match raw {
                    Value::Array(_) => "an array",
                    Value::String(_) => "a string",
                    Value::Number(_) => "a number",
                    _ => "a boolean",
                }
            )));
        }

        let mut record = ConvertedRecord::with_sub_entities(config.sub_entities.iter().copied());

        for rule in &config.mapping {
            let value = read_path(raw, &rule.from.path).cloned().unwrap_or(Value::Null);
            match self.run_formatters(rule, value, &record, context) {
                Formatted::Value(value) => {
                    for target in &rule.to {
                        record.insert_field(target.model, rule.target_field(target), value.clone());
                    }
                }
                Formatted::Fields(fields) => {
                    for target in &rule.to {
                        record.merge_fields(target.model, fields.clone());
                    }
                }
            }
        }

        tracing::debug!(
            entity = %config.entity,
            entity_type = %context.entity_type,
            sub_entities = record.sub_entities().count(),
            "record converted"
        );
        Ok(record)
    }

    fn run_formatters(
        &self,
        rule: &MappingRule,
        value: Value,
        record: &ConvertedRecord,
        context: &ConversionContext,
    ) -> Formatted {
        let mut current = Formatted::Value(value);
        for formatter in &rule.formatters {
            current = match current {
                Formatted::Value(value) => self.apply(formatter, value, record, context),
                fields @ Formatted::Fields(_) => {
                    tracing::warn!(key = %rule.key, ?formatter, "formatter after a batch formatter ignored");
                    fields
                }
            };
        }
        current
    }

    fn apply(
        &self,
        formatter: &Formatter,
        value: Value,
        record: &ConvertedRecord,
        context: &ConversionContext,
    ) -> Formatted {
        let entity = context.entity_type.as_str();
        let f = &self.formulas;

        if formatter.is_batch() {
            if value.is_null() {
                return Formatted::Fields(FieldMap::new());
            }
            return Formatted::Fields(match formatter {
                Formatter::ConvertResistances => f.convert_resistances_batch(&value, entity),
                _ => f.effects_to_bonus(&value, entity),
            });
        }

        let converted = match formatter {
            Formatter::Translate => translate(value, &context.lang),
            Formatter::ToInt => to_int(value),
            Formatter::ToString => to_string(value),
            Formatter::Truncate { max } => match value {
                Value::String(s) => Value::String(s.chars().take(*max).collect()),
                other => other,
            },
            Formatter::Default { value: default } => {
                if is_blank(&value) {
                    default.clone()
                } else {
                    value
                }
            }
            _ if value.is_null() => Value::Null,
            Formatter::ConvertLevel => Value::from(f.convert_level(&value, entity)),
            Formatter::ConvertLife { level_field } => {
                let level = record.find_field(level_field).map(|(_, v)| coerce_number(v)).unwrap_or(0.0);
                Value::from(f.convert_life(&value, level, entity))
            }
            Formatter::ConvertAttribute { characteristic } => {
                Value::from(f.convert_attribute(characteristic, &value, entity))
            }
            Formatter::ConvertInitiative => Value::from(f.convert_initiative(&value, entity)),
            Formatter::ConvertResistances | Formatter::EffectsToBonus => value,
        };
        Formatted::Value(converted)
    }
}
