//! ConversionFormulas - numeric transforms per characteristic.
//!
//! Every conversion goes through the same steps:
//!
//! 1. resolvers are tried in order until one produces a number:
//!    expression -> typed formula -> config default (always answers);
//! 2. the formula's value handler, if registered, remaps the number;
//! 3. the result is clamped to the characteristic limits.
//!
//! Malformed raw values never fail a conversion: they are coerced to `0.0`
//! (and logged at `warn`).

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::expression;
use super::handlers::HandlerRegistry;
use super::store::{CharacteristicStore, FormulaStore};
use super::{coerce_number, is_coerced, ELEMENTS};
use crate::models::{
    canonical_entity, ConversionConfig, ConversionFormula, FieldMap, FormulaParameters, FormulaType, Limits,
    LimitsSource, TypedFormula,
};

/// Characteristic whose formula row carries the resistance batch handler.
pub const RESISTANCE_ANCHOR: &str = "res_neutral";

/// One numeric conversion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaInput<'a> {
    pub characteristic: &'a str,
    pub entity: &'a str,
    /// Raw value
    pub d: f64,
    /// Converted level, for level-dependent characteristics
    pub level: Option<f64>,
}

/// One step of the resolution chain.
pub trait FormulaResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` hands over to the next resolver.
    fn resolve(
        &self,
        input: &FormulaInput<'_>,
        formula: Option<&ConversionFormula>,
        config: &ConversionConfig,
    ) -> Option<f64>;
}

/// Evaluates the formula row's free-form expression.
pub struct ExpressionResolver;

impl FormulaResolver for ExpressionResolver {
    fn name(&self) -> &'static str {
        "expression"
    }

    fn resolve(&self, input: &FormulaInput<'_>, formula: Option<&ConversionFormula>, _: &ConversionConfig) -> Option<f64> {
        let source = formula?.expression()?;
        let mut vars = vec![("d", input.d)];
        if let Some(level) = input.level {
            vars.push(("level", level));
        }

        match expression::evaluate(source, &vars) {
            Ok(v) if v.is_finite() => Some(v.round()),
            Ok(v) => {
                tracing::warn!(characteristic = input.characteristic, expression = source, value = v, "expression is not finite");
                None
            }
            Err(e) => {
                tracing::warn!(characteristic = input.characteristic, expression = source, error = %e, "invalid expression");
                None
            }
        }
    }
}

/// Applies the formula row's typed shape.
pub struct TypedFormulaResolver;

impl FormulaResolver for TypedFormulaResolver {
    fn name(&self) -> &'static str {
        "typed_formula"
    }

    fn resolve(&self, input: &FormulaInput<'_>, formula: Option<&ConversionFormula>, _: &ConversionConfig) -> Option<f64> {
        let typed = formula?.typed_formula()?;
        Some(apply_shape(&typed, input.d, input.level))
    }
}

/// Config default, then built-in constants. Always answers.
pub struct ConfigDefaultResolver;

impl FormulaResolver for ConfigDefaultResolver {
    fn name(&self) -> &'static str {
        "config_default"
    }

    fn resolve(&self, input: &FormulaInput<'_>, _: Option<&ConversionFormula>, config: &ConversionConfig) -> Option<f64> {
        let typed = if config.is_pass_through(input.characteristic) {
            TypedFormula::new(FormulaType::Identity, FormulaParameters::new())
        } else {
            config
                .characteristic_transformations
                .get(input.characteristic)
                .cloned()
                .unwrap_or_else(|| builtin_default(input.characteristic))
        };
        Some(apply_shape(&typed, input.d, input.level))
    }
}

/// Hard-coded fallback formula of a characteristic.
pub fn builtin_default(characteristic: &str) -> TypedFormula {
    let params = FormulaParameters::new();
    match characteristic {
        "level" => TypedFormula::new(FormulaType::Linear, params.with("divisor", 10.0)),
        "life" => TypedFormula::new(
            FormulaType::LinearWithLevel,
            params.with("divisor", 10.0).with("level_factor", 1.0),
        ),
        "initiative" => TypedFormula::new(
            FormulaType::RatioInitiative,
            params
                .with("denom", 5000.0)
                .with("factor", 10.0)
                .with("clamp_unit", 1.0)
                .with("floor_zero", 1.0),
        ),
        c if c.starts_with("res_fixed_") => TypedFormula::new(FormulaType::Linear, params.with("divisor", 1.0)),
        c if c.starts_with("res_") => TypedFormula::new(FormulaType::Linear, params.with("divisor", 10.0)),
        _ => TypedFormula::new(FormulaType::SqrtAttribute, params.with("coeff", 1.0).with("denom", 10.0)),
    }
}

fn non_zero(value: f64, fallback: f64) -> f64 {
    if value == 0.0 {
        fallback
    } else {
        value
    }
}

/// Closed-form shapes. The result is rounded; non-finite results become 0.
pub fn apply_shape(formula: &TypedFormula, d: f64, level: Option<f64>) -> f64 {
    let p = &formula.parameters;
    let value = match formula.formula_type {
        FormulaType::Identity => d,
        FormulaType::Linear => d / non_zero(p.get("divisor", 1.0), 1.0),
        FormulaType::LinearWithLevel => {
            d / non_zero(p.get("divisor", 1.0), 1.0) + level.unwrap_or(0.0) * p.get("level_factor", 0.0)
        }
        FormulaType::SqrtAttribute => {
            let inner = (d - p.get("offset", 0.0)) / non_zero(p.get("denom", 1.0), 1.0);
            p.get("base", 0.0) + p.get("coeff", 1.0) * inner.max(0.0).sqrt()
        }
        FormulaType::RatioInitiative => {
            let mut ratio = (d - p.get("offset", 0.0)) / non_zero(p.get("denom", 1.0), 1.0);
            if p.flag("clamp_unit") {
                ratio = ratio.clamp(0.0, 1.0);
            } else if p.flag("cap_one") {
                ratio = ratio.min(1.0);
            }
            let k = p.get("factor", 1.0) * ratio;
            if p.flag("floor_zero") {
                k.max(0.0)
            } else {
                k
            }
        }
    };

    let rounded = value.round();
    if rounded.is_finite() {
        rounded
    } else {
        0.0
    }
}

// =============================================================================
// ConversionFormulas
// =============================================================================

/// Per-characteristic conversions backed by the formula store, the handler
/// registry and the characteristic limits.
pub struct ConversionFormulas {
    store: Arc<FormulaStore>,
    characteristics: Arc<CharacteristicStore>,
    handlers: Arc<HandlerRegistry>,
    resolvers: Vec<Box<dyn FormulaResolver>>,
}

impl ConversionFormulas {
    pub fn new(
        store: Arc<FormulaStore>,
        characteristics: Arc<CharacteristicStore>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            store,
            characteristics,
            handlers,
            resolvers: vec![
                Box::new(ExpressionResolver),
                Box::new(TypedFormulaResolver),
                Box::new(ConfigDefaultResolver),
            ],
        }
    }

    pub fn convert_level(&self, raw: &Value, entity: &str) -> i64 {
        self.convert("level", raw, None, entity)
    }

    pub fn convert_life(&self, raw: &Value, level: f64, entity: &str) -> i64 {
        self.convert("life", raw, Some(level), entity)
    }

    pub fn convert_attribute(&self, characteristic: &str, raw: &Value, entity: &str) -> i64 {
        self.convert(characteristic, raw, None, entity)
    }

    pub fn convert_initiative(&self, raw: &Value, entity: &str) -> i64 {
        self.convert("initiative", raw, None, entity)
    }

    /// Convert one elemental resistance. `None` for an unknown element id.
    pub fn convert_resistance(&self, element_id: &str, raw: &Value, entity: &str) -> Option<(String, i64)> {
        let config = self.store.conversion_config();
        let characteristic = config.element_id_to_resistance.get(element_id)?.clone();
        let value = self.convert(&characteristic, raw, None, entity);
        Some((characteristic, value))
    }

    /// All resistance fields from a raw grade.
    ///
    /// A batch handler named by the anchor formula wins; otherwise each element
    /// is converted on its own and the fixed variants are zero-filled.
    pub fn convert_resistances_batch(&self, raw: &Value, entity: &str) -> FieldMap {
        if let Some(formula) = self.store.formula(RESISTANCE_ANCHOR, entity) {
            if let Some(name) = formula.handler_name.as_deref() {
                if let Some(handler) = self.handlers.batch_handler(name) {
                    tracing::trace!(entity, handler = name, "resistances via batch handler");
                    let config = self.store.conversion_config();
                    let mut fields = handler(entity, raw, &formula.parameters);
                    for (field, value) in fields.iter_mut() {
                        if let Some(n) = value.as_f64() {
                            if let Some(limits) = self.limits(field, entity, &config) {
                                *value = json!(limits.clamp(n) as i64);
                            }
                        }
                    }
                    return fields;
                }
                tracing::warn!(entity, handler = name, "resistance handler is not a registered batch handler");
            }
        }

        let mut fields = FieldMap::new();
        for element in ELEMENTS.iter() {
            let raw_value = raw.get(element.raw_percent_key).cloned().unwrap_or(Value::Null);
            if let Some((field, value)) = self.convert_resistance(&element.id.to_string(), &raw_value, entity) {
                fields.insert(field, json!(value));
            }
            fields.insert(element.fixed_field.to_string(), json!(0));
        }
        fields
    }

    /// Bonus fields from a raw effects array (`[{effectId, from, to}, ...]`).
    ///
    /// Effects mapping to the same characteristic add up before conversion.
    /// Unknown effect ids are ignored.
    pub fn effects_to_bonus(&self, effects: &Value, entity: &str) -> FieldMap {
        let config = self.store.conversion_config();
        let mut raw_totals: BTreeMap<String, f64> = BTreeMap::new();

        for effect in effects.as_array().map(Vec::as_slice).unwrap_or_default() {
            let effect_id = match effect.get("effectId") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => continue,
            };
            let Some(characteristic) = config.effect_id_to_characteristic.get(&effect_id) else {
                tracing::debug!(effect_id = %effect_id, "no characteristic for effect");
                continue;
            };

            let from = effect.get("from").map(coerce_number).unwrap_or(0.0);
            let to = effect.get("to").map(coerce_number).unwrap_or(0.0);
            let amount = if to.abs() > from.abs() { to } else { from };
            *raw_totals.entry(characteristic.clone()).or_insert(0.0) += amount;
        }

        raw_totals
            .into_iter()
            .map(|(characteristic, total)| {
                let value = self.resolve(&characteristic, entity, total, None);
                (characteristic, json!(value))
            })
            .collect()
    }

    /// Convert a raw value for any characteristic.
    pub fn convert(&self, characteristic: &str, raw: &Value, level: Option<f64>, entity: &str) -> i64 {
        if is_coerced(raw) {
            tracing::warn!(characteristic, entity, raw = %raw, "non-numeric raw value coerced to 0");
        }
        self.resolve(characteristic, entity, coerce_number(raw), level)
    }

    /// Resolution chain, value handler, then clamping.
    pub fn resolve(&self, characteristic: &str, entity: &str, d: f64, level: Option<f64>) -> i64 {
        let config = self.store.conversion_config();
        let formula = self.store.formula(characteristic, entity);
        let input = FormulaInput {
            characteristic,
            entity,
            d,
            level,
        };

        let mut value = self
            .resolvers
            .iter()
            .find_map(|resolver| {
                let v = resolver.resolve(&input, formula.as_ref(), &config)?;
                tracing::trace!(characteristic, entity, resolver = resolver.name(), value = v, "formula resolved");
                Some(v)
            })
            .unwrap_or(0.0);

        if let Some(name) = formula.as_ref().and_then(|f| f.handler_name.as_deref()) {
            match self.handlers.value_handler(name) {
                Some(handler) => value = handler(entity, value).round(),
                None => tracing::debug!(characteristic, handler = name, "no value handler registered"),
            }
        }

        if !value.is_finite() {
            value = 0.0;
        }
        if let Some(limits) = self.limits(characteristic, entity, &config) {
            value = limits.clamp(value);
        }
        value.round() as i64
    }

    /// Limits of a characteristic according to `limits_source`.
    pub fn limits(&self, characteristic: &str, entity: &str, config: &ConversionConfig) -> Option<Limits> {
        let local = || {
            config
                .local_limits(entity, characteristic)
                .or_else(|| config.local_limits(canonical_entity(entity), characteristic))
                .filter(|l| !l.is_unbounded())
        };
        match config.limits_source {
            LimitsSource::Characteristics => self.characteristics.limits(characteristic, entity).or_else(local),
            LimitsSource::Local => local(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::store::MemoryBackend;
    use crate::models::{CharacteristicRule, ConversionFormula};
    use std::collections::HashMap;

    fn formulas_with(backend: MemoryBackend, handlers: HandlerRegistry) -> ConversionFormulas {
        let backend = Arc::new(backend);
        ConversionFormulas::new(
            Arc::new(FormulaStore::new(backend.clone())),
            Arc::new(CharacteristicStore::new(backend)),
            Arc::new(handlers),
        )
    }

    fn formulas(backend: MemoryBackend) -> ConversionFormulas {
        formulas_with(backend, HandlerRegistry::with_builtins())
    }

    #[test]
    fn test_shapes() {
        let p = FormulaParameters::new;
        let linear = TypedFormula::new(FormulaType::Linear, p().with("divisor", 10.0));
        assert_eq!(apply_shape(&linear, 54.0, None), 5.0);

        let with_level = TypedFormula::new(
            FormulaType::LinearWithLevel,
            p().with("divisor", 10.0).with("level_factor", 2.0),
        );
        assert_eq!(apply_shape(&with_level, 800.0, Some(5.0)), 90.0);

        let sqrt = TypedFormula::new(
            FormulaType::SqrtAttribute,
            p().with("base", 1.0).with("coeff", 2.0).with("offset", 10.0).with("denom", 10.0),
        );
        assert_eq!(apply_shape(&sqrt, 100.0, None), 7.0);
        assert_eq!(apply_shape(&sqrt, 0.0, None), 1.0);

        let ratio = TypedFormula::new(
            FormulaType::RatioInitiative,
            p().with("denom", 1000.0).with("factor", 10.0).with("clamp_unit", 1.0),
        );
        assert_eq!(apply_shape(&ratio, 5000.0, None), 10.0);
        assert_eq!(apply_shape(&ratio, -500.0, None), 0.0);

        let capped = TypedFormula::new(
            FormulaType::RatioInitiative,
            p().with("denom", 1000.0).with("factor", 10.0).with("cap_one", 1.0),
        );
        assert_eq!(apply_shape(&capped, -500.0, None), -5.0);
    }

    #[test]
    fn test_defaults_when_nothing_is_stored() {
        let f = formulas(MemoryBackend::new());
        assert_eq!(f.convert_level(&json!(50), "monster"), 5);
        assert_eq!(f.convert_life(&json!(800), 5.0, "monster"), 85);
        assert_eq!(f.convert_attribute("strength", &json!(1000), "monster"), 10);
        assert_eq!(f.convert_initiative(&json!(2500), "monster"), 5);
    }

    #[test]
    fn test_expression_beats_typed_formula() {
        let backend = MemoryBackend::new().with_formula(
            ConversionFormula::new("level", "monster")
                .typed(FormulaType::Linear, FormulaParameters::new().with("divisor", 10.0))
                .with_expression("d / 2"),
        );
        assert_eq!(formulas(backend).convert_level(&json!(50), "monster"), 25);
    }

    #[test]
    fn test_invalid_expression_falls_back_to_typed() {
        let backend = MemoryBackend::new().with_formula(
            ConversionFormula::new("level", "monster")
                .typed(FormulaType::Linear, FormulaParameters::new().with("divisor", 5.0))
                .with_expression("d / / 2"),
        );
        assert_eq!(formulas(backend).convert_level(&json!(50), "monster"), 10);
    }

    #[test]
    fn test_life_expression_sees_level() {
        let backend = MemoryBackend::new()
            .with_formula(ConversionFormula::new("life", "monster").with_expression("d / 100 + level * 3"));
        assert_eq!(formulas(backend).convert_life(&json!(800), 5.0, "monster"), 23);
    }

    #[test]
    fn test_config_transformation_and_pass_through() {
        let mut config = ConversionConfig::default();
        config.characteristic_transformations.insert(
            "level".into(),
            TypedFormula::new(FormulaType::Linear, FormulaParameters::new().with("divisor", 25.0)),
        );
        config.pass_through_characteristics.push("wisdom".into());
        let f = formulas(MemoryBackend::new().with_config(config));

        assert_eq!(f.convert_level(&json!(50), "monster"), 2);
        assert_eq!(f.convert_attribute("wisdom", &json!(42.4), "monster"), 42);
    }

    #[test]
    fn test_value_handler_applies_after_any_resolver() {
        let backend = MemoryBackend::new().with_formula(
            ConversionFormula::new("level", "monster")
                .with_expression("d - 100")
                .with_handler("level_floor_one"),
        );
        assert_eq!(formulas(backend).convert_level(&json!(20), "monster"), 1);
    }

    #[test]
    fn test_clamps_to_characteristic_limits() {
        let backend = MemoryBackend::new()
            .with_rule(CharacteristicRule::new("level", "monster").bounded(Some(1.0), Some(20.0)));
        let f = formulas(backend);
        assert_eq!(f.convert_level(&json!(5000), "monster"), 20);
        assert_eq!(f.convert_level(&json!(0), "monster"), 1);
    }

    #[test]
    fn test_fractional_bounds_keep_result_inside() {
        let backend = MemoryBackend::new()
            .with_rule(CharacteristicRule::new("level", "monster").bounded(Some(0.5), Some(2.5)));
        let f = formulas(backend);
        assert_eq!(f.convert_level(&json!(5000), "monster"), 2);
        assert_eq!(f.convert_level(&json!(0), "monster"), 1);
    }

    #[test]
    fn test_local_limits_source() {
        let mut config = ConversionConfig::default();
        config.limits_source = LimitsSource::Local;
        config.limits.insert(
            "monster".into(),
            HashMap::from([("level".to_string(), Limits::new(Some(1.0), Some(10.0)))]),
        );
        let backend = MemoryBackend::new()
            .with_config(config)
            .with_rule(CharacteristicRule::new("level", "monster").bounded(Some(1.0), Some(200.0)));

        assert_eq!(formulas(backend).convert_level(&json!(5000), "monster"), 10);
    }

    #[test]
    fn test_characteristics_source_falls_back_to_local_limits() {
        let mut config = ConversionConfig::default();
        config.limits.insert(
            "monster".into(),
            HashMap::from([("life".to_string(), Limits::new(Some(1.0), Some(50.0)))]),
        );
        let f = formulas(MemoryBackend::new().with_config(config));
        assert_eq!(f.convert_life(&json!(100000), 10.0, "monster"), 50);
    }

    #[test]
    fn test_non_numeric_raw_is_zero() {
        let f = formulas(MemoryBackend::new());
        assert_eq!(f.convert_level(&json!("fifty"), "monster"), 0);
        assert_eq!(f.convert_attribute("agility", &json!({"x": 1}), "monster"), 0);
    }

    #[test]
    fn test_resistance_fallback_and_unknown_element() {
        let f = formulas(MemoryBackend::new());
        assert_eq!(
            f.convert_resistance("2", &json!(30), "monster"),
            Some(("res_fire".to_string(), 3))
        );
        assert!(f.convert_resistance("9", &json!(30), "monster").is_none());

        let fields = f.convert_resistances_batch(&json!({ "earthResistance": 20, "airResistance": -10 }), "monster");
        assert_eq!(fields["res_earth"], 2);
        assert_eq!(fields["res_air"], -1);
        assert_eq!(fields["res_neutral"], 0);
        assert_eq!(fields["res_fixed_fire"], 0);
        assert_eq!(fields.len(), 10);
    }

    #[test]
    fn test_batch_handler_wins_over_fallback() {
        let mut handlers = HandlerRegistry::with_builtins();
        handlers.register_batch("all_sevens", |_, _, _| {
            let mut fields = FieldMap::new();
            fields.insert("res_neutral".into(), json!(7));
            fields.insert("res_fixed_neutral".into(), json!(7));
            fields
        });
        let backend = MemoryBackend::new()
            .with_formula(ConversionFormula::new(RESISTANCE_ANCHOR, "monster").with_handler("all_sevens"));
        let f = formulas_with(backend, handlers);

        let fields = f.convert_resistances_batch(&json!({ "neutralResistance": 50 }), "monster");
        assert_eq!(fields["res_neutral"], 7);
        assert_eq!(fields["res_fixed_neutral"], 7);
        assert!(fields.get("res_fire").is_none());

        // other entity types keep the per-element fallback
        let other = f.convert_resistances_batch(&json!({ "neutralResistance": 50 }), "class");
        assert_eq!(other["res_neutral"], 5);
    }

    #[test]
    fn test_batch_handler_output_is_clamped_inside_fractional_bounds() {
        let mut handlers = HandlerRegistry::with_builtins();
        handlers.register_batch("all_sevens", |_, _, _| {
            let mut fields = FieldMap::new();
            fields.insert("res_neutral".into(), json!(7));
            fields
        });
        let backend = MemoryBackend::new()
            .with_formula(ConversionFormula::new(RESISTANCE_ANCHOR, "monster").with_handler("all_sevens"))
            .with_rule(CharacteristicRule::new("res_neutral", "monster").bounded(Some(-5.0), Some(6.5)));
        let f = formulas_with(backend, handlers);

        let fields = f.convert_resistances_batch(&json!({}), "monster");
        assert_eq!(fields["res_neutral"], 6);
    }

    #[test]
    fn test_effects_to_bonus() {
        let mut config = ConversionConfig::default();
        config.effect_id_to_characteristic.insert("118".into(), "strength".into());
        config.effect_id_to_characteristic.insert("125".into(), "vitality".into());
        let f = formulas(MemoryBackend::new().with_config(config));

        let effects = json!([
            { "effectId": 118, "from": 60, "to": 90 },
            { "effectId": 118, "from": 10, "to": 0 },
            { "effectId": 125, "from": 250, "to": 0 },
            { "effectId": 999, "from": 5, "to": 0 }
        ]);
        let bonus = f.effects_to_bonus(&effects, "item");
        assert_eq!(bonus["strength"], 3);
        assert_eq!(bonus["vitality"], 5);
        assert_eq!(bonus.len(), 2);

        assert!(f.effects_to_bonus(&Value::Null, "item").is_empty());
    }
}
