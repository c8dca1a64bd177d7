use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Row};

use super::entities::map_entity_row;
use super::*;
use crate::entity::{Alias, AliasSource, CanonicalEntity, EntityType};

fn map_alias_row(row: &Row) -> rusqlite::Result<Alias> {
    let source: String = row.get(4)?;
    Ok(Alias {
        id: row.get(0)?,
        canonical_id: row.get(1)?,
        variant: row.get(2)?,
        variant_normalized: row.get(3)?,
        source: AliasSource::from_str_lossy(&source),
        score: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl EntityDb {
    /// Resolve a normalized variant to its entity. When the same normalized
    /// form is registered under several entities, the most recently linked
    /// row wins.
    pub fn lookup_alias(
        &self,
        entity_type: EntityType,
        variant_normalized: &str,
    ) -> Result<Option<CanonicalEntity>, DbError> {
        Ok(self
            .conn
            .query_row(
                "SELECT c.canonical_id, c.entity_type, c.canonical_name, c.normalized_key,
                        c.metadata, c.created_at, c.updated_at
                 FROM entity_alias a
                 JOIN entity_canonical c ON c.canonical_id = a.canonical_id
                 WHERE a.variant_normalized = ?1 AND c.entity_type = ?2
                 ORDER BY a.linked_seq DESC, a.id DESC
                 LIMIT 1",
                params![variant_normalized, entity_type.as_str()],
                map_entity_row,
            )
            .optional()?)
    }

    /// Append an alias row. The variant is trimmed. Returns false when the
    /// entity already carries this exact variant, which leaves that row and
    /// its precedence untouched.
    pub fn insert_alias(
        &self,
        canonical_id: &str,
        variant: &str,
        variant_normalized: &str,
        source: AliasSource,
        score: Option<f64>,
    ) -> Result<bool, DbError> {
        self.write_alias(canonical_id, variant, variant_normalized, source, score, false)
    }

    /// Like `insert_alias`, but an existing (entity, variant) row is moved to
    /// the front so the variant resolves to this entity again. Used for
    /// trusted links: manual links, review decisions and merges.
    pub fn relink_alias(
        &self,
        canonical_id: &str,
        variant: &str,
        variant_normalized: &str,
        source: AliasSource,
        score: Option<f64>,
    ) -> Result<bool, DbError> {
        self.write_alias(canonical_id, variant, variant_normalized, source, score, true)
    }

    fn write_alias(
        &self,
        canonical_id: &str,
        variant: &str,
        variant_normalized: &str,
        source: AliasSource,
        score: Option<f64>,
        refresh: bool,
    ) -> Result<bool, DbError> {
        let variant = variant.trim();
        let existed = self
            .conn
            .query_row(
                "SELECT 1 FROM entity_alias WHERE canonical_id = ?1 AND variant = ?2",
                params![canonical_id, variant],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if existed && !refresh {
            return Ok(false);
        }

        self.conn.execute(
            "INSERT INTO entity_alias
                 (canonical_id, variant, variant_normalized, source, score, created_at, linked_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                     (SELECT COALESCE(MAX(linked_seq), 0) + 1 FROM entity_alias))
             ON CONFLICT (canonical_id, variant) DO UPDATE SET linked_seq = excluded.linked_seq",
            params![
                canonical_id,
                variant,
                variant_normalized,
                source.as_str(),
                score,
                now_timestamp(),
            ],
        )?;
        Ok(!existed)
    }

    /// Aliases of one entity, oldest first.
    pub fn aliases_for(&self, canonical_id: &str) -> Result<Vec<Alias>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, canonical_id, variant, variant_normalized, source, score, created_at
             FROM entity_alias WHERE canonical_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([canonical_id], map_alias_row)?;
        let mut aliases = Vec::new();
        for row in rows {
            aliases.push(row?);
        }
        Ok(aliases)
    }

    /// Alias variants grouped by owning entity, for every entity of a type.
    pub fn alias_variants_by_entity(
        &self,
        entity_type: EntityType,
    ) -> Result<HashMap<String, Vec<String>>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.canonical_id, a.variant
             FROM entity_alias a
             JOIN entity_canonical c ON c.canonical_id = a.canonical_id
             WHERE c.entity_type = ?1
             ORDER BY a.id",
        )?;
        let rows = stmt.query_map([entity_type.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let (canonical_id, variant) = row?;
            grouped.entry(canonical_id).or_default().push(variant);
        }
        Ok(grouped)
    }

    /// Copy every alias of `from` onto `to`, keeping variant, normalized form,
    /// source, score and precedence. A variant `to` already carries keeps its
    /// row but takes the higher of the two precedences, so anything that
    /// resolved to `from` resolves to `to` once `from` is gone. Returns the
    /// number of rows added.
    pub fn copy_aliases(&self, from: &str, to: &str) -> Result<usize, DbError> {
        let added: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entity_alias s
             WHERE s.canonical_id = ?1
               AND NOT EXISTS (SELECT 1 FROM entity_alias t
                               WHERE t.canonical_id = ?2 AND t.variant = s.variant)",
            params![from, to],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO entity_alias
                 (canonical_id, variant, variant_normalized, source, score, created_at, linked_seq)
             SELECT ?2, variant, variant_normalized, source, score, ?3, linked_seq
             FROM entity_alias WHERE canonical_id = ?1
             ON CONFLICT (canonical_id, variant)
             DO UPDATE SET linked_seq = MAX(entity_alias.linked_seq, excluded.linked_seq)",
            params![from, to, now_timestamp()],
        )?;
        Ok(added as usize)
    }

    pub fn delete_aliases_for(&self, canonical_id: &str) -> Result<usize, DbError> {
        Ok(self
            .conn
            .execute("DELETE FROM entity_alias WHERE canonical_id = ?1", [canonical_id])?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use serde_json::Map;

    fn seed(db: &EntityDb, entity_type: EntityType, name: &str, key: &str) -> String {
        db.insert_entity(entity_type, name, key, &Map::new())
            .unwrap()
            .canonical_id
    }

    #[test]
    fn test_insert_alias_is_idempotent_per_variant() {
        let db = test_db();
        let id = seed(&db, EntityType::Mill, "Canfor", "canfor");
        assert!(db.insert_alias(&id, "  CANFOR ", "canfor", AliasSource::Auto, Some(1.0)).unwrap());
        assert!(!db.insert_alias(&id, "CANFOR", "canfor", AliasSource::Manual, None).unwrap());

        let aliases = db.aliases_for(&id).unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].variant, "CANFOR");
        assert_eq!(aliases[0].source, AliasSource::Auto);
        assert_eq!(aliases[0].score, Some(1.0));
    }

    #[test]
    fn test_lookup_alias_respects_type() {
        let db = test_db();
        let mill = seed(&db, EntityType::Mill, "Canfor", "canfor");
        db.insert_alias(&mill, "CANFOR", "canfor", AliasSource::Auto, Some(1.0)).unwrap();

        let hit = db.lookup_alias(EntityType::Mill, "canfor").unwrap().unwrap();
        assert_eq!(hit.canonical_id, mill);
        assert!(db.lookup_alias(EntityType::Customer, "canfor").unwrap().is_none());
        assert!(db.lookup_alias(EntityType::Mill, "canfr").unwrap().is_none());
    }

    #[test]
    fn test_latest_alias_row_wins() {
        let db = test_db();
        let a = seed(&db, EntityType::Customer, "Acme Builders", "acme builders");
        let b = seed(&db, EntityType::Customer, "Acme Supply", "acme supply");
        db.insert_alias(&a, "ACME", "acme", AliasSource::Auto, Some(0.95)).unwrap();
        db.insert_alias(&b, "Acme", "acme", AliasSource::Manual, Some(1.0)).unwrap();

        let hit = db.lookup_alias(EntityType::Customer, "acme").unwrap().unwrap();
        assert_eq!(hit.canonical_id, b);
    }

    #[test]
    fn test_relink_restores_precedence_of_existing_row() {
        let db = test_db();
        let a = seed(&db, EntityType::Customer, "Acme Builders", "acme builders");
        let b = seed(&db, EntityType::Customer, "Acme Supply", "acme supply");
        db.insert_alias(&a, "Acme", "acme", AliasSource::Auto, Some(0.95)).unwrap();
        db.insert_alias(&b, "Acme", "acme", AliasSource::Manual, Some(1.0)).unwrap();

        // Plain insert of an existing pair changes nothing
        assert!(!db.insert_alias(&a, "Acme", "acme", AliasSource::Auto, Some(0.95)).unwrap());
        assert_eq!(db.lookup_alias(EntityType::Customer, "acme").unwrap().unwrap().canonical_id, b);

        assert!(!db.relink_alias(&a, "Acme", "acme", AliasSource::Manual, Some(1.0)).unwrap());
        assert_eq!(db.lookup_alias(EntityType::Customer, "acme").unwrap().unwrap().canonical_id, a);
        let rows = db.aliases_for(&a).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, AliasSource::Auto);

        assert!(db.relink_alias(&b, "ACME Co", "acme", AliasSource::Manual, None).unwrap());
        assert_eq!(db.lookup_alias(EntityType::Customer, "acme").unwrap().unwrap().canonical_id, b);
    }

    #[test]
    fn test_copy_keeps_precedence_over_older_rows() {
        let db = test_db();
        let target = seed(&db, EntityType::Customer, "Acme", "acme");
        let other = seed(&db, EntityType::Customer, "Zeta Trading", "zeta trading");
        let source = seed(&db, EntityType::Customer, "Omega Partners", "omega partners");
        db.insert_alias(&target, "Acme", "acme", AliasSource::Canonical, Some(1.0)).unwrap();
        db.insert_alias(&other, "Acme", "acme", AliasSource::Manual, Some(1.0)).unwrap();
        db.insert_alias(&source, "Acme", "acme", AliasSource::Manual, Some(1.0)).unwrap();
        db.insert_alias(&source, "Omega", "omega", AliasSource::Manual, Some(1.0)).unwrap();
        assert_eq!(db.lookup_alias(EntityType::Customer, "acme").unwrap().unwrap().canonical_id, source);

        assert_eq!(db.copy_aliases(&source, &target).unwrap(), 1);
        db.delete_aliases_for(&source).unwrap();

        assert_eq!(db.lookup_alias(EntityType::Customer, "acme").unwrap().unwrap().canonical_id, target);
        assert_eq!(db.lookup_alias(EntityType::Customer, "omega").unwrap().unwrap().canonical_id, target);
    }

    #[test]
    fn test_copy_and_delete_aliases() {
        let db = test_db();
        let src = seed(&db, EntityType::Mill, "Canfor Southern Pine", "canfor southern pine");
        let dst = seed(&db, EntityType::Mill, "Canfor", "canfor");
        db.insert_alias(&src, "CSP", "csp", AliasSource::Dictionary, Some(1.0)).unwrap();
        db.insert_alias(&src, "Canfor", "canfor", AliasSource::Auto, Some(0.97)).unwrap();
        db.insert_alias(&dst, "Canfor", "canfor", AliasSource::Canonical, Some(1.0)).unwrap();

        // "Canfor" already on the target
        assert_eq!(db.copy_aliases(&src, &dst).unwrap(), 1);
        let moved = db.aliases_for(&dst).unwrap();
        let csp = moved.iter().find(|a| a.variant == "CSP").unwrap();
        assert_eq!(csp.source, AliasSource::Dictionary);
        assert_eq!(csp.score, Some(1.0));

        assert_eq!(db.delete_aliases_for(&src).unwrap(), 2);
        assert!(db.aliases_for(&src).unwrap().is_empty());
    }

    #[test]
    fn test_alias_variants_grouped_by_entity() {
        let db = test_db();
        let gp = seed(&db, EntityType::Mill, "GP - Gurdon", "gp gurdon");
        db.insert_alias(&gp, "GP - Gurdon", "gp gurdon", AliasSource::Canonical, Some(1.0)).unwrap();
        db.insert_alias(&gp, "Georgia Pacific Gurdon", "georgia pacific gurdon", AliasSource::Auto, Some(0.95))
            .unwrap();
        let cust = seed(&db, EntityType::Customer, "Acme", "acme");
        db.insert_alias(&cust, "Acme", "acme", AliasSource::Canonical, Some(1.0)).unwrap();

        let grouped = db.alias_variants_by_entity(EntityType::Mill).unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[&gp], vec!["GP - Gurdon", "Georgia Pacific Gurdon"]);
    }
}
