//! Embedded schema migrations.
//!
//! Every numbered script under `migrations/` is compiled in and applied at
//! most once. Applied versions are recorded in `schema_version`. Each script
//! and its version row commit together. A store written by a newer build is
//! refused rather than opened.

use rusqlite::Connection;

use crate::db::DbError;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

fn current_version(conn: &Connection) -> Result<i32, DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })?)
}

/// Copy the store to `<path>.pre-migration.bak` with SQLite's online backup.
/// In-memory and temporary stores have no path and are skipped.
fn backup_store(conn: &Connection) -> Result<(), DbError> {
    let path: String = conn.query_row("PRAGMA database_list", [], |row| row.get(2))?;
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{path}.pre-migration.bak");
    let mut dest = Connection::open(&backup_path)?;
    rusqlite::backup::Backup::new(conn, &mut dest)?
        .step(-1)
        .map_err(|e| DbError::Migration(format!("pre-migration backup failed: {e}")))?;
    log::info!("Pre-migration backup written to {}", backup_path);
    Ok(())
}

fn apply_pending(conn: &Connection, migrations: &[Migration]) -> Result<usize, DbError> {
    let current = current_version(conn)?;
    let newest = migrations.last().map_or(0, |m| m.version);
    if current > newest {
        return Err(DbError::Migration(format!(
            "entity store schema version ({current}) is newer than this build of millmatch \
             supports ({newest}); upgrade millmatch"
        )));
    }

    let pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }
    backup_store(conn)?;

    for migration in &pending {
        let script = format!(
            "BEGIN IMMEDIATE;\n{}\nINSERT INTO schema_version (version) VALUES ({});\nCOMMIT;",
            migration.sql, migration.version
        );
        if let Err(e) = conn.execute_batch(&script) {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DbError::Migration(format!("v{} failed: {e}", migration.version)));
        }
        log::info!("Applied schema migration v{}", migration.version);
    }
    Ok(pending.len())
}

/// Bring the store up to the newest schema. Returns how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, DbError> {
    apply_pending(conn, MIGRATIONS)
}
