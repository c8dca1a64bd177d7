use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::{Map, Value};

use super::*;
use crate::entity::{CanonicalEntity, EntityType};
use crate::normalize::canonical_id_slug;

const ENTITY_COLUMNS: &str = "canonical_id, entity_type, canonical_name, normalized_key, \
                              metadata, created_at, updated_at";

fn entity_type_column(row: &Row, idx: usize) -> rusqlite::Result<EntityType> {
    let raw: String = row.get(idx)?;
    EntityType::parse(&raw)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, raw, Type::Text))
}

/// Metadata is stored as a JSON object. Anything else reads back empty.
pub(super) fn parse_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub(super) fn map_entity_row(row: &Row) -> rusqlite::Result<CanonicalEntity> {
    let metadata: String = row.get(4)?;
    Ok(CanonicalEntity {
        canonical_id: row.get(0)?,
        entity_type: entity_type_column(row, 1)?,
        canonical_name: row.get(2)?,
        normalized_key: row.get(3)?,
        metadata: parse_metadata(&metadata),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl EntityDb {
    pub fn get_entity(&self, canonical_id: &str) -> Result<Option<CanonicalEntity>, DbError> {
        let sql = format!("SELECT {ENTITY_COLUMNS} FROM entity_canonical WHERE canonical_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [canonical_id], map_entity_row)
            .optional()?)
    }

    /// Exact lookup on the (type, normalized key) constraint.
    pub fn find_by_normalized_key(
        &self,
        entity_type: EntityType,
        normalized_key: &str,
    ) -> Result<Option<CanonicalEntity>, DbError> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entity_canonical
             WHERE entity_type = ?1 AND normalized_key = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, params![entity_type.as_str(), normalized_key], map_entity_row)
            .optional()?)
    }

    /// Every entity of one type, in id order.
    pub fn entities_of_type(&self, entity_type: EntityType) -> Result<Vec<CanonicalEntity>, DbError> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entity_canonical
             WHERE entity_type = ?1 ORDER BY canonical_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([entity_type.as_str()], map_entity_row)?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(row?);
        }
        Ok(entities)
    }

    /// Insert a new canonical entity with a freshly minted id.
    ///
    /// A second entity with the same (type, normalized key) fails with a
    /// unique violation; callers treat that as a lost creation race.
    pub fn insert_entity(
        &self,
        entity_type: EntityType,
        canonical_name: &str,
        normalized_key: &str,
        metadata: &Map<String, Value>,
    ) -> Result<CanonicalEntity, DbError> {
        let canonical_id = self.next_canonical_id(entity_type, canonical_name)?;
        let now = now_timestamp();
        let metadata_json = Value::Object(metadata.clone()).to_string();

        self.conn.execute(
            "INSERT INTO entity_canonical (canonical_id, entity_type, canonical_name,
             normalized_key, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                canonical_id,
                entity_type.as_str(),
                canonical_name,
                normalized_key,
                metadata_json,
                now,
            ],
        )?;

        Ok(CanonicalEntity {
            canonical_id,
            entity_type,
            canonical_name: canonical_name.to_string(),
            normalized_key: normalized_key.to_string(),
            metadata: metadata.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Slug id, suffixed `_2`, `_3`, … until free. Falls back to a UUID when
    /// the name has nothing to slug.
    fn next_canonical_id(&self, entity_type: EntityType, name: &str) -> Result<String, DbError> {
        let Some(base) = canonical_id_slug(entity_type, name) else {
            return Ok(format!("{}_{}", entity_type.id_prefix(), uuid::Uuid::new_v4().simple()));
        };

        let taken = |id: &str| -> Result<bool, DbError> {
            Ok(self
                .conn
                .prepare("SELECT 1 FROM entity_canonical WHERE canonical_id = ?1")?
                .exists([id])?)
        };

        if !taken(&base)? {
            return Ok(base);
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !taken(&candidate)? {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    /// Change the display name. The normalized key is left as created.
    pub fn rename_entity(&self, canonical_id: &str, new_name: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE entity_canonical SET canonical_name = ?1, updated_at = ?2
             WHERE canonical_id = ?3",
            params![new_name, now_timestamp(), canonical_id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_entity(&self, canonical_id: &str) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM entity_canonical WHERE canonical_id = ?1", [canonical_id])?;
        Ok(deleted > 0)
    }
}
