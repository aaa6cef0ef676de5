//! Characteristics, conversion formulas and the global conversion config.
//!
//! Read by the formula and characteristic stores; written by seeding.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::Database;
use crate::conversion::{CharacteristicBackend, FormulaBackend};
use crate::error::StoreResult;
use crate::models::{CharacteristicRule, ConversionConfig, ConversionFormula, FormulaParameters, FormulaType};

/// Content of a seed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub characteristics: Vec<CharacteristicRule>,
    #[serde(default)]
    pub formulas: Vec<ConversionFormula>,
    #[serde(default)]
    pub conversion_config: Option<ConversionConfig>,
}

impl SeedData {
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Rows written by a seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub characteristics: usize,
    pub formulas: usize,
    pub conversion_config: bool,
}

impl Database {
    /// Upsert a seed in one transaction.
    pub fn seed(&self, seed: &SeedData) -> StoreResult<SeedReport> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut report = SeedReport::default();

        for rule in &seed.characteristics {
            let values = rule.value_available.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                "INSERT OR REPLACE INTO characteristics \
                 (characteristic_id, entity, field, required, min, max, value_available) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rule.characteristic_id,
                    rule.entity,
                    rule.field,
                    rule.required,
                    rule.min,
                    rule.max,
                    values
                ],
            )?;
            report.characteristics += 1;
        }

        for formula in &seed.formulas {
            tx.execute(
                "INSERT OR REPLACE INTO conversion_formulas \
                 (characteristic_id, entity, formula_type, parameters, conversion_formula, handler_name) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    formula.characteristic_id,
                    formula.entity,
                    formula.formula_type.map(|t| t.as_str()),
                    serde_json::to_string(&formula.parameters)?,
                    formula.conversion_formula,
                    formula.handler_name
                ],
            )?;
            report.formulas += 1;
        }

        if let Some(config) = &seed.conversion_config {
            tx.execute(
                "INSERT OR REPLACE INTO conversion_config (id, data) VALUES (1, ?1)",
                params![serde_json::to_string(config)?],
            )?;
            report.conversion_config = true;
        }

        tx.commit()?;
        tracing::info!(
            characteristics = report.characteristics,
            formulas = report.formulas,
            conversion_config = report.conversion_config,
            "seed loaded"
        );
        Ok(report)
    }
}

impl FormulaBackend for Database {
    fn load_formulas(&self) -> StoreResult<Vec<ConversionFormula>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT characteristic_id, entity, formula_type, parameters, conversion_formula, handler_name \
             FROM conversion_formulas ORDER BY characteristic_id, entity",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(characteristic_id, entity, formula_type, parameters, expression, handler)| -> StoreResult<ConversionFormula> {
                let formula_type = formula_type.as_deref().and_then(|t| {
                    let parsed = FormulaType::parse(t);
                    if parsed.is_none() {
                        tracing::warn!(characteristic_id = %characteristic_id, formula_type = t, "unknown formula type ignored");
                    }
                    parsed
                });
                let parameters: FormulaParameters = serde_json::from_str(&parameters)?;
                Ok(ConversionFormula {
                    characteristic_id,
                    entity,
                    formula_type,
                    parameters,
                    conversion_formula: expression,
                    handler_name: handler,
                })
            })
            .collect()
    }

    fn load_conversion_config(&self) -> StoreResult<ConversionConfig> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM conversion_config WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        match data {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Ok(ConversionConfig::default()),
        }
    }
}

impl CharacteristicBackend for Database {
    fn load_rules(&self) -> StoreResult<Vec<CharacteristicRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT characteristic_id, entity, field, required, min, max, value_available \
             FROM characteristics ORDER BY entity, characteristic_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(characteristic_id, entity, field, required, min, max, values)| -> StoreResult<CharacteristicRule> {
                Ok(CharacteristicRule {
                    characteristic_id,
                    entity,
                    field,
                    required,
                    min,
                    max,
                    value_available: values.as_deref().map(serde_json::from_str).transpose()?,
                })
            })
            .collect()
    }
}
