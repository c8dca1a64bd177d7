//! External tables that hold a `canonical_id` back-reference.
//!
//! CRM customers, CRM mills, mill-quote imports and similar tables live
//! outside the entity store. Each one is described by a [`LinkedSource`].
//! Sources in another SQLite file are `ATTACH`ed to the store connection so
//! merge and migration writes commit in the same transaction as the alias
//! changes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Row, ToSql};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::*;
use crate::entity::EntityType;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

fn check_identifier(ident: &str) -> Result<(), DbError> {
    if identifier_re().is_match(ident) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(ident.to_string()))
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_name_column() -> String {
    "name".to_string()
}

fn default_canonical_column() -> String {
    "canonical_id".to_string()
}

/// One external table whose rows name a mill or customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedSource {
    /// Short name used in stats and review context (`crm_customers`).
    pub label: String,
    pub entity_type: EntityType,
    /// SQLite file holding the table. `None` means the store's own file.
    #[serde(default)]
    pub database: Option<PathBuf>,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    #[serde(default = "default_canonical_column")]
    pub canonical_column: String,
    /// Columns copied into entity metadata when a row creates an entity.
    #[serde(default)]
    pub metadata_columns: Vec<String>,
}

impl LinkedSource {
    pub fn new(label: &str, entity_type: EntityType, table: &str) -> Self {
        Self {
            label: label.to_string(),
            entity_type,
            database: None,
            table: table.to_string(),
            id_column: default_id_column(),
            name_column: default_name_column(),
            canonical_column: default_canonical_column(),
            metadata_columns: Vec::new(),
        }
    }

    pub fn in_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }

    pub fn with_metadata_columns(mut self, columns: &[&str]) -> Self {
        self.metadata_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Every identifier that ends up in SQL text must be a plain name.
    pub fn validate(&self) -> Result<(), DbError> {
        check_identifier(&self.label)?;
        check_identifier(&self.table)?;
        check_identifier(&self.id_column)?;
        check_identifier(&self.name_column)?;
        check_identifier(&self.canonical_column)?;
        for column in &self.metadata_columns {
            check_identifier(column)?;
        }
        Ok(())
    }

    fn schema(&self) -> String {
        match self.database {
            Some(_) => format!("src_{}", self.label),
            None => "main".to_string(),
        }
    }

    fn qualified_table(&self) -> Result<String, DbError> {
        self.validate()?;
        Ok(format!("\"{}\".\"{}\"", self.schema(), self.table))
    }

    fn select_columns(&self) -> String {
        let mut columns = vec![
            format!("\"{}\"", self.id_column),
            format!("\"{}\"", self.name_column),
            format!("\"{}\"", self.canonical_column),
        ];
        columns.extend(self.metadata_columns.iter().map(|c| format!("\"{c}\"")));
        columns.join(", ")
    }

    fn map_record(&self, row: &Row) -> rusqlite::Result<ExternalRecord> {
        let key = match row.get_ref(0)? {
            ValueRef::Integer(i) => RecordKey::Int(i),
            ValueRef::Text(t) => RecordKey::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Real(f) => RecordKey::Text(f.to_string()),
            ValueRef::Null | ValueRef::Blob(_) => RecordKey::Text(String::new()),
        };
        let mut metadata = Map::new();
        for (i, column) in self.metadata_columns.iter().enumerate() {
            let value = match row.get_ref(3 + i)? {
                ValueRef::Null | ValueRef::Blob(_) => continue,
                ValueRef::Integer(n) => Value::from(n),
                ValueRef::Real(f) => Value::from(f),
                ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
            };
            metadata.insert(column.clone(), value);
        }
        Ok(ExternalRecord {
            key,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            canonical_id: row
                .get::<_, Option<String>>(2)?
                .filter(|id| !id.trim().is_empty()),
            metadata,
        })
    }
}

/// Primary key of an external row. CRM tables use integers, import tables
/// sometimes use text ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            RecordKey::Int(i) => i.to_sql(),
            RecordKey::Text(s) => s.to_sql(),
        }
    }
}

/// One row of an external source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRecord {
    pub key: RecordKey,
    pub name: String,
    pub canonical_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl EntityDb {
    /// Attach every source that lives in another file. Already attached
    /// sources are skipped, so this is safe to call more than once.
    pub fn attach_sources(&self, sources: &[LinkedSource]) -> Result<(), DbError> {
        let attached: HashSet<String> = {
            let mut stmt = self.conn.prepare("PRAGMA database_list")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
            let mut names = HashSet::new();
            for row in rows {
                names.insert(row?);
            }
            names
        };

        for source in sources {
            source.validate()?;
            let Some(path) = &source.database else {
                continue;
            };
            let schema = source.schema();
            if attached.contains(&schema) {
                continue;
            }
            self.conn.execute(
                &format!("ATTACH DATABASE ?1 AS \"{schema}\""),
                [path.to_string_lossy().into_owned()],
            )?;
            log::info!("Attached source '{}' from {}", source.label, path.display());
        }
        Ok(())
    }

    /// Rows with no canonical id yet (NULL or blank), in key order.
    pub fn unlinked_records(&self, source: &LinkedSource) -> Result<Vec<ExternalRecord>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE \"{fk}\" IS NULL OR TRIM(\"{fk}\") = '' ORDER BY \"{id}\"",
            source.select_columns(),
            source.qualified_table()?,
            fk = source.canonical_column,
            id = source.id_column,
        );
        self.query_records(source, &sql, params![])
    }

    /// Rows already linked to one entity.
    pub fn records_linked_to(
        &self,
        source: &LinkedSource,
        canonical_id: &str,
    ) -> Result<Vec<ExternalRecord>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE \"{fk}\" = ?1 ORDER BY \"{id}\"",
            source.select_columns(),
            source.qualified_table()?,
            fk = source.canonical_column,
            id = source.id_column,
        );
        self.query_records(source, &sql, [canonical_id])
    }

    /// Unlinked rows whose name equals any of `names`, ignoring case and
    /// surrounding whitespace.
    pub fn unlinked_records_named(
        &self,
        source: &LinkedSource,
        names: &[String],
    ) -> Result<Vec<ExternalRecord>, DbError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = names.iter().map(|n| n.trim().to_uppercase()).collect();
        let placeholders = (1..=wanted.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE (\"{fk}\" IS NULL OR TRIM(\"{fk}\") = '')
             AND UPPER(TRIM(\"{name}\")) IN ({placeholders}) ORDER BY \"{id}\"",
            source.select_columns(),
            source.qualified_table()?,
            fk = source.canonical_column,
            name = source.name_column,
            id = source.id_column,
        );
        self.query_records(source, &sql, params_from_iter(wanted.iter()))
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        source: &LinkedSource,
        sql: &str,
        params: P,
    ) -> Result<Vec<ExternalRecord>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| source.map_record(row))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Write the back-reference on one row.
    pub fn set_record_canonical(
        &self,
        source: &LinkedSource,
        key: &RecordKey,
        canonical_id: &str,
    ) -> Result<usize, DbError> {
        let sql = format!(
            "UPDATE {} SET \"{}\" = ?1 WHERE \"{}\" = ?2",
            source.qualified_table()?,
            source.canonical_column,
            source.id_column,
        );
        Ok(self.conn.execute(&sql, params![canonical_id, key])?)
    }

    /// Move every back-reference from one entity to another.
    pub fn repoint_records(
        &self,
        source: &LinkedSource,
        from: &str,
        to: &str,
    ) -> Result<usize, DbError> {
        let sql = format!(
            "UPDATE {} SET \"{fk}\" = ?1 WHERE \"{fk}\" = ?2",
            source.qualified_table()?,
            fk = source.canonical_column,
        );
        Ok(self.conn.execute(&sql, params![to, from])?)
    }
}
