//! IntegrationService - writes converted records to the entity store.
//!
//! Each entity type has a profile: the ordered sub-records it writes (root
//! first) and the sub-record whose `dofusdb_id` is the idempotency key.
//!
//! | entity type | rows                                      |
//! |-------------|-------------------------------------------|
//! | `monster`   | `creatures` (root), `monsters` (`creature_id`) |
//! | `class`     | `classes`                                 |
//! | `item`      | `items`                                   |
//! | `spell`     | `spells`                                  |
//!
//! Existing rows are skipped unless `force_update` is set, so re-running an
//! import is always safe. Nothing here returns an error: every outcome is an
//! [`IntegrationResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{
    canonical_entity, ConvertedRecord, IntegrationAction, IntegrationResult, SubEntity, SubEntityOutcome,
};
use crate::store::{EntityStore, LinkedRow};

/// Field holding the external id in keyed sub-records.
pub const EXTERNAL_ID_FIELD: &str = "dofusdb_id";

/// Integration switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationOptions {
    /// Report what would happen, write nothing
    #[serde(default)]
    pub dry_run: bool,
    /// Overwrite rows that already exist
    #[serde(default)]
    pub force_update: bool,
}

#[derive(Debug, Clone, Copy)]
struct ProfileRow {
    kind: SubEntity,
    parent_fk: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
struct Profile {
    entity_type: &'static str,
    key: SubEntity,
    rows: &'static [ProfileRow],
}

const PROFILES: &[Profile] = &[
    Profile {
        entity_type: "monster",
        key: SubEntity::Creatures,
        rows: &[
            ProfileRow { kind: SubEntity::Creatures, parent_fk: None },
            ProfileRow { kind: SubEntity::Monsters, parent_fk: Some("creature_id") },
        ],
    },
    Profile {
        entity_type: "class",
        key: SubEntity::Classes,
        rows: &[ProfileRow { kind: SubEntity::Classes, parent_fk: None }],
    },
    Profile {
        entity_type: "item",
        key: SubEntity::Items,
        rows: &[ProfileRow { kind: SubEntity::Items, parent_fk: None }],
    },
    Profile {
        entity_type: "spell",
        key: SubEntity::Spells,
        rows: &[ProfileRow { kind: SubEntity::Spells, parent_fk: None }],
    },
];

fn profile(entity_type: &str) -> Option<&'static Profile> {
    let canonical = canonical_entity(entity_type);
    PROFILES.iter().find(|p| p.entity_type == canonical)
}

/// External id as stored: numbers and non-blank strings.
fn external_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Sole writer of the entity store.
pub struct IntegrationService {
    store: Arc<dyn EntityStore>,
}

impl IntegrationService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Write (or, in dry-run, plan) the sub-records of a converted record.
    pub fn integrate(
        &self,
        entity_type: &str,
        record: &ConvertedRecord,
        options: IntegrationOptions,
    ) -> IntegrationResult {
        let dry_run = options.dry_run;

        let Some(profile) = profile(entity_type) else {
            tracing::warn!(entity_type, "no integration profile");
            return IntegrationResult::failure(
                entity_type,
                dry_run,
                format!("unsupported entity type '{}'", entity_type),
            );
        };

        if let Some(missing) = profile.rows.iter().find(|row| !record.contains(row.kind)) {
            return IntegrationResult::failure(
                entity_type,
                dry_run,
                format!("missing sub-record '{}'", missing.kind),
            );
        }

        let Some(dofusdb_id) = record.field(profile.key, EXTERNAL_ID_FIELD).and_then(external_id) else {
            return IntegrationResult::failure(
                entity_type,
                dry_run,
                format!("sub-record '{}' has no {}", profile.key, EXTERNAL_ID_FIELD),
            );
        };

        let existing = match self.store.find_by_external_id(profile.key, &dofusdb_id) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(entity_type, dofusdb_id = %dofusdb_id, error = %e, "lookup failed");
                return self.failed(entity_type, dry_run, profile, &format!("lookup failed: {}", e));
            }
        };

        let action = match (existing.is_some(), options.force_update, dry_run) {
            (false, _, true) => IntegrationAction::WouldCreate,
            (true, true, true) => IntegrationAction::WouldUpdate,
            (true, false, _) => IntegrationAction::Skipped,
            (false, _, false) => IntegrationAction::Created,
            (true, true, false) => IntegrationAction::Updated,
        };

        let ids: Vec<Option<i64>> = match action {
            IntegrationAction::Created | IntegrationAction::Updated => {
                let rows: Vec<LinkedRow<'_>> = profile
                    .rows
                    .iter()
                    .filter_map(|row| {
                        record.get(row.kind).map(|data| LinkedRow {
                            kind: row.kind,
                            data,
                            parent_fk: row.parent_fk,
                        })
                    })
                    .collect();
                let written = if action == IntegrationAction::Created {
                    self.store.create_linked(&dofusdb_id, &rows)
                } else {
                    self.store.update_linked(&dofusdb_id, &rows)
                };
                match written {
                    Ok(ids) => ids.into_iter().map(Some).collect(),
                    Err(e) => {
                        tracing::error!(entity_type, dofusdb_id = %dofusdb_id, error = %e, "write failed");
                        return self.failed(entity_type, dry_run, profile, &format!("write failed: {}", e));
                    }
                }
            }
            _ => self.existing_ids(profile, &dofusdb_id),
        };

        let message = match action {
            IntegrationAction::Skipped => "already exists; use force_update to overwrite".to_string(),
            other => other.to_string(),
        };
        let outcomes: BTreeMap<SubEntity, SubEntityOutcome> = profile
            .rows
            .iter()
            .zip(ids)
            .map(|(row, id)| {
                (
                    row.kind,
                    SubEntityOutcome {
                        action,
                        id,
                        message: message.clone(),
                    },
                )
            })
            .collect();

        tracing::info!(entity_type, dofusdb_id = %dofusdb_id, action = %action, dry_run, "integrated");
        IntegrationResult {
            success: true,
            entity_type: entity_type.to_string(),
            dry_run,
            outcomes,
            message: format!("{} {} '{}'", action, profile.entity_type, dofusdb_id),
        }
    }

    /// Ids of rows already stored for each profile row.
    fn existing_ids(&self, profile: &Profile, dofusdb_id: &str) -> Vec<Option<i64>> {
        profile
            .rows
            .iter()
            .map(|row| {
                self.store
                    .find_by_external_id(row.kind, dofusdb_id)
                    .ok()
                    .flatten()
                    .map(|e| e.id)
            })
            .collect()
    }

    fn failed(&self, entity_type: &str, dry_run: bool, profile: &Profile, message: &str) -> IntegrationResult {
        let mut result = IntegrationResult::failure(entity_type, dry_run, message);
        result.outcomes = profile
            .rows
            .iter()
            .map(|row| {
                (
                    row.kind,
                    SubEntityOutcome {
                        action: IntegrationAction::Failed,
                        id: None,
                        message: message.to_string(),
                    },
                )
            })
            .collect();
        result
    }
}
