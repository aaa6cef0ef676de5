//! Destination entity rows.
//!
//! Every destination kind lives in the `entities` table, keyed by
//! `(kind, dofusdb_id)`. Linked writes (creature + monster) run in one
//! transaction: the root row's generated id is written into the dependent
//! rows' foreign key field and `parent_id` before they are inserted.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{now, Database};
use crate::error::StoreResult;
use crate::models::{FieldMap, SubEntity};

/// A persisted destination row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub id: i64,
    pub kind: SubEntity,
    pub dofusdb_id: String,
    pub parent_id: Option<i64>,
    pub data: FieldMap,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of a linked write. The first row of a write is the root.
#[derive(Debug, Clone, Copy)]
pub struct LinkedRow<'a> {
    pub kind: SubEntity,
    pub data: &'a FieldMap,
    /// Field receiving the root row id (e.g. `creature_id`)
    pub parent_fk: Option<&'a str>,
}

/// Persistent entity store. Only integration writes to it.
pub trait EntityStore: Send + Sync {
    fn find_by_external_id(&self, kind: SubEntity, dofusdb_id: &str) -> StoreResult<Option<StoredEntity>>;

    /// Insert all rows atomically. Returns the new ids, in row order.
    fn create_linked(&self, dofusdb_id: &str, rows: &[LinkedRow<'_>]) -> StoreResult<Vec<i64>>;

    /// Update all rows atomically, inserting the ones that do not exist yet.
    fn update_linked(&self, dofusdb_id: &str, rows: &[LinkedRow<'_>]) -> StoreResult<Vec<i64>>;

    fn count(&self, kind: SubEntity) -> StoreResult<usize>;
}

fn parse_kind(raw: &str) -> rusqlite::Result<SubEntity> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn find(conn: &Connection, kind: SubEntity, dofusdb_id: &str) -> StoreResult<Option<StoredEntity>> {
    let row = conn
        .query_row(
            "SELECT id, kind, dofusdb_id, parent_id, data, created_at, updated_at \
             FROM entities WHERE kind = ?1 AND dofusdb_id = ?2",
            params![kind.as_str(), dofusdb_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    parse_kind(&row.get::<_, String>(1)?)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, kind, dofusdb_id, parent_id, data, created_at, updated_at)| -> StoreResult<StoredEntity> {
        Ok(StoredEntity {
            id,
            kind,
            dofusdb_id,
            parent_id,
            data: serde_json::from_str(&data)?,
            created_at,
            updated_at,
        })
    })
    .transpose()
}

/// Row data with the parent id written into its foreign key field.
fn with_parent(row: &LinkedRow<'_>, parent: Option<i64>) -> FieldMap {
    let mut data = row.data.clone();
    if let (Some(fk), Some(parent)) = (row.parent_fk, parent) {
        data.insert(fk.to_string(), Value::from(parent));
    }
    data
}

impl EntityStore for Database {
    fn find_by_external_id(&self, kind: SubEntity, dofusdb_id: &str) -> StoreResult<Option<StoredEntity>> {
        let conn = self.conn()?;
        find(&conn, kind, dofusdb_id)
    }

    fn create_linked(&self, dofusdb_id: &str, rows: &[LinkedRow<'_>]) -> StoreResult<Vec<i64>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let timestamp = now();

        let mut ids: Vec<i64> = Vec::with_capacity(rows.len());
        for row in rows {
            let parent = ids.first().copied();
            let data = with_parent(row, parent);
            tx.execute(
                "INSERT INTO entities (kind, dofusdb_id, parent_id, data, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    row.kind.as_str(),
                    dofusdb_id,
                    parent,
                    serde_json::to_string(&data)?,
                    timestamp
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }

        tx.commit()?;
        tracing::debug!(dofusdb_id, ids = ?ids, "linked rows created");
        Ok(ids)
    }

    fn update_linked(&self, dofusdb_id: &str, rows: &[LinkedRow<'_>]) -> StoreResult<Vec<i64>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let timestamp = now();

        let mut ids: Vec<i64> = Vec::with_capacity(rows.len());
        for row in rows {
            let parent = ids.first().copied();
            let data = serde_json::to_string(&with_parent(row, parent))?;

            let id = match find(&tx, row.kind, dofusdb_id)? {
                Some(existing) => {
                    tx.execute(
                        "UPDATE entities SET data = ?1, parent_id = ?2, updated_at = ?3 WHERE id = ?4",
                        params![data, parent.or(existing.parent_id), timestamp, existing.id],
                    )?;
                    existing.id
                }
                None => {
                    tx.execute(
                        "INSERT INTO entities (kind, dofusdb_id, parent_id, data, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        params![row.kind.as_str(), dofusdb_id, parent, data, timestamp],
                    )?;
                    tx.last_insert_rowid()
                }
            };
            ids.push(id);
        }

        tx.commit()?;
        tracing::debug!(dofusdb_id, ids = ?ids, "linked rows updated");
        Ok(ids)
    }

    fn count(&self, kind: SubEntity) -> StoreResult<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => FieldMap::new(),
        }
    }

    #[test]
    fn test_create_linked_threads_parent_id() {
        let db = Database::open_in_memory().unwrap();
        let creature = fields(json!({ "name": "Bouftou", "level": 5 }));
        let monster = fields(json!({ "is_boss": false }));

        let ids = db
            .create_linked(
                "31",
                &[
                    LinkedRow { kind: SubEntity::Creatures, data: &creature, parent_fk: None },
                    LinkedRow { kind: SubEntity::Monsters, data: &monster, parent_fk: Some("creature_id") },
                ],
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let stored = db.find_by_external_id(SubEntity::Monsters, "31").unwrap().unwrap();
        assert_eq!(stored.parent_id, Some(ids[0]));
        assert_eq!(stored.data["creature_id"], json!(ids[0]));

        let root = db.find_by_external_id(SubEntity::Creatures, "31").unwrap().unwrap();
        assert_eq!(root.parent_id, None);
        assert_eq!(root.data["level"], 5);
    }

    #[test]
    fn test_create_linked_rolls_back_on_failure() {
        let db = Database::open_in_memory().unwrap();
        let data = fields(json!({ "name": "x" }));

        // Second row collides with the first on (kind, dofusdb_id).
        let result = db.create_linked(
            "7",
            &[
                LinkedRow { kind: SubEntity::Creatures, data: &data, parent_fk: None },
                LinkedRow { kind: SubEntity::Creatures, data: &data, parent_fk: None },
            ],
        );
        assert!(result.is_err());
        assert_eq!(db.count(SubEntity::Creatures).unwrap(), 0);
    }

    #[test]
    fn test_update_linked_keeps_ids() {
        let db = Database::open_in_memory().unwrap();
        let v1 = fields(json!({ "level": 1 }));
        let ids = db
            .create_linked("12", &[LinkedRow { kind: SubEntity::Items, data: &v1, parent_fk: None }])
            .unwrap();

        let v2 = fields(json!({ "level": 2 }));
        let updated = db
            .update_linked("12", &[LinkedRow { kind: SubEntity::Items, data: &v2, parent_fk: None }])
            .unwrap();
        assert_eq!(ids, updated);

        let stored = db.find_by_external_id(SubEntity::Items, "12").unwrap().unwrap();
        assert_eq!(stored.data["level"], 2);
        assert_eq!(db.count(SubEntity::Items).unwrap(), 1);
    }

    #[test]
    fn test_find_missing() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_by_external_id(SubEntity::Spells, "1").unwrap().is_none());
    }
}
