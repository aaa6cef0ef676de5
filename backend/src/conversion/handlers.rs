//! ConversionHandlerRegistry - named post-processing hooks.
//!
//! A formula row may name a handler. Two kinds exist:
//!
//! - **value handlers** `(entity_type, value) -> value` remap the number a
//!   formula produced;
//! - **batch handlers** `(entity_type, raw_payload, parameters) -> fields`
//!   replace a whole family of formulas (resistances) with one field map.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{coerce_number, ELEMENTS};
use crate::models::{FieldMap, FormulaParameters};

pub type ValueHandlerFn = dyn Fn(&str, f64) -> f64 + Send + Sync;
pub type BatchHandlerFn = dyn Fn(&str, &Value, &FormulaParameters) -> FieldMap + Send + Sync;

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    Value(Arc<ValueHandlerFn>),
    Batch(Arc<BatchHandlerFn>),
}

impl Handler {
    pub fn kind(&self) -> &'static str {
        match self {
            Handler::Value(_) => "value",
            Handler::Batch(_) => "batch",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.kind())
    }
}

/// Name -> handler table.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_value("level_floor_one", |_, v| v.max(1.0));
        registry.register_value("negate_to_zero", |_, v| v.max(0.0));
        registry.register_batch("resistance_tiers", resistance_tiers);
        registry
    }

    pub fn register_value<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&str, f64) -> f64 + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_string(), Handler::Value(Arc::new(handler)));
    }

    pub fn register_batch<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&str, &Value, &FormulaParameters) -> FieldMap + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_string(), Handler::Batch(Arc::new(handler)));
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    pub fn value_handler(&self, name: &str) -> Option<&ValueHandlerFn> {
        match self.handlers.get(name) {
            Some(Handler::Value(f)) => Some(f.as_ref()),
            _ => None,
        }
    }

    pub fn batch_handler(&self, name: &str) -> Option<&BatchHandlerFn> {
        match self.handlers.get(name) {
            Some(Handler::Batch(f)) => Some(f.as_ref()),
            _ => None,
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Tiered percentage resistances plus fixed resistances, from a raw grade.
///
/// Parameters: `tier_step` (percent per tier, default 10), `max_tier`
/// (default 5), `fixed_divisor` (default 1).
fn resistance_tiers(_entity: &str, raw: &Value, params: &FormulaParameters) -> FieldMap {
    let step = params.get("tier_step", 10.0);
    let step = if step == 0.0 { 10.0 } else { step };
    let max_tier = params.get("max_tier", 5.0).abs();
    let fixed_divisor = params.get("fixed_divisor", 1.0);
    let fixed_divisor = if fixed_divisor == 0.0 { 1.0 } else { fixed_divisor };

    let mut fields = FieldMap::new();
    for element in ELEMENTS.iter() {
        let percent = raw.get(element.raw_percent_key).map(coerce_number).unwrap_or(0.0);
        let tier = (percent / step).trunc().clamp(-max_tier, max_tier);
        fields.insert(element.percent_field.to_string(), json!(tier as i64));

        let fixed = raw.get(element.raw_fixed_key).map(coerce_number).unwrap_or(0.0);
        fields.insert(
            element.fixed_field.to_string(),
            json!((fixed / fixed_divisor).round() as i64),
        );
    }
    fields
}
