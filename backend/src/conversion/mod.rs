//! Conversion of raw DofusDB values into the platform's value space.
//!
//! - [`expression`] - Free-form formula expressions
//! - [`formulas`] - Typed formula shapes, resolver chain, clamping
//! - [`handlers`] - Named value/batch post-processing handlers
//! - [`store`] - Cached formula, config and characteristic lookups
//! - [`service`] - Mapping-driven conversion of whole raw records

pub mod expression;
pub mod formulas;
pub mod handlers;
pub mod service;
pub mod store;

pub use formulas::{ConversionFormulas, FormulaInput, FormulaResolver};
pub use handlers::{Handler, HandlerRegistry};
pub use service::{ConversionContext, ConversionService};
pub use store::{CharacteristicBackend, CharacteristicStore, FormulaBackend, FormulaStore, MemoryBackend};

use serde_json::Value;

/// DofusDB element, with its raw keys and destination fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub id: u8,
    pub raw_percent_key: &'static str,
    pub raw_fixed_key: &'static str,
    pub percent_field: &'static str,
    pub fixed_field: &'static str,
}

pub const ELEMENTS: [Element; 5] = [
    Element {
        id: 0,
        raw_percent_key: "neutralResistance",
        raw_fixed_key: "neutralDamageReduction",
        percent_field: "res_neutral",
        fixed_field: "res_fixed_neutral",
    },
    Element {
        id: 1,
        raw_percent_key: "earthResistance",
        raw_fixed_key: "earthDamageReduction",
        percent_field: "res_earth",
        fixed_field: "res_fixed_earth",
    },
    Element {
        id: 2,
        raw_percent_key: "fireResistance",
        raw_fixed_key: "fireDamageReduction",
        percent_field: "res_fire",
        fixed_field: "res_fixed_fire",
    },
    Element {
        id: 3,
        raw_percent_key: "waterResistance",
        raw_fixed_key: "waterDamageReduction",
        percent_field: "res_water",
        fixed_field: "res_fixed_water",
    },
    Element {
        id: 4,
        raw_percent_key: "airResistance",
        raw_fixed_key: "airDamageReduction",
        percent_field: "res_air",
        fixed_field: "res_fixed_air",
    },
];

/// Numeric value of a raw JSON value; anything non-numeric is `0.0`.
pub fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

/// True when [`coerce_number`] had to fall back to zero for a non-null value.
pub fn is_coerced(value: &Value) -> bool {
    match value {
        Value::Number(_) | Value::Null | Value::Bool(_) => false,
        Value::String(s) => s.trim().parse::<f64>().map_or(true, |v| !v.is_finite()),
        _ => true,
    }
}
