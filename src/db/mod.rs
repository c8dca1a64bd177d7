//! SQLite-backed store for canonical entities, the alias index and the
//! review queue.
//!
//! The store lives at `~/.millmatch/entities.db` unless configured otherwise.
//! Each thread opens its own `EntityDb`; WAL mode plus a busy timeout lets
//! readers proceed while one writer holds the `BEGIN IMMEDIATE` lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

mod aliases;
mod entities;
mod reviews;
pub mod sources;
pub mod types;

pub use sources::{ExternalRecord, LinkedSource, RecordKey};
pub use types::*;

/// How long a writer waits for another writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EntityDb {
    conn: Connection,
    path: PathBuf,
}

impl EntityDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// File this handle was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a closure within a SQLite write transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(E::from(DbError::Sqlite(e)));
                }
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the store at `~/.millmatch/entities.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a store at an explicit path.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, DbError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL so resolvers on other threads can read during a write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn)?;

        // Set after migrations so a future table rebuild can turn it off
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn, path })
    }

    /// Default store path: `~/.millmatch/entities.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".millmatch").join("entities.db"))
    }

    /// Row counts across the three tables.
    pub fn stats(&self) -> Result<EntityStats, DbError> {
        let count = |sql: &str| -> Result<i64, DbError> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(EntityStats {
            mill_entities: count("SELECT COUNT(*) FROM entity_canonical WHERE entity_type = 'mill'")?,
            customer_entities: count(
                "SELECT COUNT(*) FROM entity_canonical WHERE entity_type = 'customer'",
            )?,
            total_aliases: count("SELECT COUNT(*) FROM entity_alias")?,
            pending_reviews: count("SELECT COUNT(*) FROM entity_review WHERE resolved_id IS NULL")?,
        })
    }
}

/// Current UTC time in the format every timestamp column uses.
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}


#[cfg(test)]
mod tests {
    use super::test_utils::{test_db, test_db_path};
    use super::*;

    #[test]
    fn test_open_creates_parent_dir_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store").join("entities.db");
        let db = EntityDb::open_at(&path).expect("open");
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
        assert_eq!(db.stats().unwrap(), EntityStats::default());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let path = test_db_path();
        {
            let db = EntityDb::open_at(&path).unwrap();
            db.conn_ref()
                .execute(
                    "INSERT INTO entity_review (input_name, entity_type, created_at)
                     VALUES ('Canfr', 'mill', 'x')",
                    [],
                )
                .unwrap();
        }
        let db = EntityDb::open_at(&path).unwrap();
        assert_eq!(db.stats().unwrap().pending_reviews, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO entity_review (input_name, entity_type, created_at)
                 VALUES ('Canfr', 'mill', 'x')",
                [],
            )?;
            Err(DbError::Migration("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().pending_reviews, 0);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        db.with_transaction(|tx| -> Result<(), DbError> {
            tx.conn_ref().execute(
                "INSERT INTO entity_review (input_name, entity_type, created_at)
                 VALUES ('Canfr', 'mill', 'x')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.stats().unwrap().pending_reviews, 1);
    }

    #[test]
    fn test_unique_violation_is_detected() {
        let db = test_db();
        let insert = |id: &str| {
            db.conn_ref().execute(
                "INSERT INTO entity_canonical (canonical_id, entity_type, canonical_name,
                 normalized_key, created_at, updated_at)
                 VALUES (?1, 'mill', 'Canfor', 'canfor', 'x', 'x')",
                [id],
            )
        };
        insert("mill_canfor").unwrap();
        let err = DbError::from(insert("mill_canfor_2").unwrap_err());
        assert!(err.is_unique_violation());
        assert!(!DbError::Migration("x".into()).is_unique_violation());
    }
}
