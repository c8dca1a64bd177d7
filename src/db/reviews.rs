use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::entity::{CandidateSnapshot, EntityType, ReviewItem};

const REVIEW_COLUMNS: &str = "id, input_name, entity_type, candidates, resolved_id, \
                              source_context, created_at, resolved_at";

fn map_review_row(row: &Row) -> rusqlite::Result<ReviewItem> {
    let entity_type: String = row.get(2)?;
    let candidates: String = row.get(3)?;
    Ok(ReviewItem {
        id: row.get(0)?,
        input_name: row.get(1)?,
        entity_type: EntityType::parse(&entity_type).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, entity_type, rusqlite::types::Type::Text)
        })?,
        candidates: serde_json::from_str(&candidates).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        resolved_id: row.get(4)?,
        source_context: row.get(5)?,
        created_at: row.get(6)?,
        resolved_at: row.get(7)?,
    })
}

impl EntityDb {
    /// Queue an ambiguous name with a frozen snapshot of its candidates.
    pub fn insert_review(
        &self,
        input_name: &str,
        entity_type: EntityType,
        candidates: &[CandidateSnapshot],
        source_context: &str,
    ) -> Result<ReviewItem, DbError> {
        let now = now_timestamp();
        let snapshot = serde_json::to_string(candidates)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            "INSERT INTO entity_review (input_name, entity_type, candidates, source_context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![input_name, entity_type.as_str(), snapshot, source_context, now],
        )?;
        Ok(ReviewItem {
            id: self.conn.last_insert_rowid(),
            input_name: input_name.to_string(),
            entity_type,
            candidates: candidates.to_vec(),
            resolved_id: None,
            source_context: source_context.to_string(),
            created_at: now,
            resolved_at: None,
        })
    }

    pub fn get_review(&self, id: i64) -> Result<Option<ReviewItem>, DbError> {
        let sql = format!("SELECT {REVIEW_COLUMNS} FROM entity_review WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], map_review_row).optional()?)
    }

    /// A still-pending review for exactly this input, if one exists.
    pub fn find_pending_review(
        &self,
        input_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<ReviewItem>, DbError> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM entity_review
             WHERE input_name = ?1 AND entity_type = ?2 AND resolved_id IS NULL
             ORDER BY id DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![input_name, entity_type.as_str()], map_review_row)
            .optional()?)
    }

    /// Unresolved reviews, newest first.
    pub fn pending_reviews(&self) -> Result<Vec<ReviewItem>, DbError> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM entity_review
             WHERE resolved_id IS NULL
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_review_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Resolve a pending review. Returns false when the review was already
    /// resolved (or does not exist), leaving it untouched.
    pub fn mark_review_resolved(&self, id: i64, resolved_id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE entity_review SET resolved_id = ?1, resolved_at = ?2
             WHERE id = ?3 AND resolved_id IS NULL",
            params![resolved_id, now_timestamp(), id],
        )?;
        Ok(changed == 1)
    }

    /// Point resolved reviews at a different entity. Returns rows changed.
    pub fn repoint_reviews(&self, from: &str, to: &str) -> Result<usize, DbError> {
        Ok(self.conn.execute(
            "UPDATE entity_review SET resolved_id = ?1 WHERE resolved_id = ?2",
            params![to, from],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn candidates() -> Vec<CandidateSnapshot> {
        vec![
            CandidateSnapshot {
                canonical_id: "cust_big_creek_pallets_inc".into(),
                score: 0.8512,
            },
            CandidateSnapshot {
                canonical_id: "cust_big_creek_crating".into(),
                score: 0.77,
            },
        ]
    }

    #[test]
    fn test_insert_and_get_review() {
        let db = test_db();
        let item = db
            .insert_review("Big Creek Pallet", EntityType::Customer, &candidates(), "crm")
            .unwrap();
        assert!(item.is_pending());

        let fetched = db.get_review(item.id).unwrap().unwrap();
        assert_eq!(fetched, item);
        assert_eq!(fetched.candidates[0].score, 0.8512);
        assert!(db.get_review(9999).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_candidate_snapshot_is_an_error() {
        let db = test_db();
        let item = db
            .insert_review("Big Creek Pallet", EntityType::Customer, &candidates(), "crm")
            .unwrap();
        db.conn_ref()
            .execute(
                "UPDATE entity_review SET candidates = '[{\"canonicalId\": 7' WHERE id = ?1",
                [item.id],
            )
            .unwrap();

        let err = db.get_review(item.id).unwrap_err();
        assert!(matches!(
            err,
            DbError::Sqlite(rusqlite::Error::FromSqlConversionFailure(3, _, _))
        ));
        assert!(db.pending_reviews().is_err());
    }

    #[test]
    fn test_pending_reviews_newest_first() {
        let db = test_db();
        let first = db.insert_review("A", EntityType::Mill, &[], "").unwrap();
        let second = db.insert_review("B", EntityType::Mill, &[], "").unwrap();
        let third = db.insert_review("C", EntityType::Customer, &[], "").unwrap();
        assert!(db.mark_review_resolved(second.id, "mill_b").unwrap());

        let ids: Vec<i64> = db.pending_reviews().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);
    }

    #[test]
    fn test_mark_resolved_only_once() {
        let db = test_db();
        let item = db.insert_review("Canfr", EntityType::Mill, &[], "").unwrap();
        assert!(db.mark_review_resolved(item.id, "mill_canfor").unwrap());
        assert!(!db.mark_review_resolved(item.id, "mill_other").unwrap());

        let fetched = db.get_review(item.id).unwrap().unwrap();
        assert_eq!(fetched.resolved_id.as_deref(), Some("mill_canfor"));
        assert!(fetched.resolved_at.is_some());
    }

    #[test]
    fn test_find_pending_review_ignores_resolved() {
        let db = test_db();
        let item = db.insert_review("Canfr", EntityType::Mill, &[], "").unwrap();
        assert_eq!(
            db.find_pending_review("Canfr", EntityType::Mill).unwrap().map(|r| r.id),
            Some(item.id)
        );
        assert!(db.find_pending_review("Canfr", EntityType::Customer).unwrap().is_none());
        db.mark_review_resolved(item.id, "mill_canfor").unwrap();
        assert!(db.find_pending_review("Canfr", EntityType::Mill).unwrap().is_none());
    }

    #[test]
    fn test_repoint_reviews() {
        let db = test_db();
        let item = db.insert_review("Canfr", EntityType::Mill, &[], "").unwrap();
        db.mark_review_resolved(item.id, "mill_old").unwrap();
        assert_eq!(db.repoint_reviews("mill_old", "mill_new").unwrap(), 1);
        assert_eq!(
            db.get_review(item.id).unwrap().unwrap().resolved_id.as_deref(),
            Some("mill_new")
        );
    }
}
