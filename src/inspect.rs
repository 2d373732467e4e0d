//! State database inspection
//!
//! Antigravity, like VS Code, keeps UI and chat state in `state.vscdb`, a
//! SQLite file with a single `ItemTable (key TEXT, value BLOB)`. This module
//! opens it read-only and dumps rows by key prefix.

use crate::config::InspectConfig;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("unable to open database file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// One `key`/`value` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRow {
    pub key: String,
    pub value: Vec<u8>,
}

impl StateRow {
    /// UTF-8 view of the value cut to `max_chars` characters, or `None` for binary values.
    pub fn preview(&self, max_chars: usize) -> Option<String> {
        std::str::from_utf8(&self.value)
            .ok()
            .map(|text| text.chars().take(max_chars).collect())
    }
}

/// Read-only handle on a state database.
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    pub fn open(path: &Path) -> Result<Self, InspectError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| InspectError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { conn })
    }

    pub fn tables(&self) -> Result<Vec<String>, InspectError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Rows of `table` whose key starts with `prefix`, in table order.
    pub fn rows_with_prefix(&self, table: &str, prefix: &str) -> Result<Vec<StateRow>, InspectError> {
        let sql = format!(
            "SELECT key, value FROM {} WHERE key LIKE ?1 ESCAPE '\\'",
            quote_identifier(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pattern = format!("{}%", escape_like(prefix));
        let mut rows = stmt.query([pattern])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let key = String::from_utf8_lossy(&column_bytes(row.get_ref(0)?)).into_owned();
            let value = column_bytes(row.get_ref(1)?);
            out.push(StateRow { key, value });
        }
        Ok(out)
    }
}

/// Summary of an inspection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectReport {
    pub tables: Vec<String>,
    /// `None` when the configured table does not exist
    pub rows: Option<usize>,
}

/// Dump the configured table's matching rows to `out`.
pub fn inspect<W: Write>(config: &InspectConfig, out: &mut W) -> Result<InspectReport, InspectError> {
    writeln!(out, "Inspecting {}...", config.database.display())?;

    let db = StateDb::open(&config.database)?;
    let tables = db.tables()?;
    writeln!(out, "Tables: {:?}", tables)?;

    if !tables.iter().any(|t| t == &config.table) {
        tracing::info!("Table {} not present in {}", config.table, config.database.display());
        return Ok(InspectReport { tables, rows: None });
    }

    writeln!(out)?;
    writeln!(out, "--- Keys matching '{}%' ---", config.key_prefix)?;
    let rows = db.rows_with_prefix(&config.table, &config.key_prefix)?;
    for row in &rows {
        writeln!(out, "Key: {}", row.key)?;
        writeln!(out, "Size: {} bytes", row.value.len())?;
        match row.preview(config.preview_chars) {
            Some(text) => writeln!(out, "Value: {}...", text)?,
            None => writeln!(out, "Value: <binary>")?,
        }
        writeln!(out, "{}", "-".repeat(20))?;
    }

    Ok(InspectReport {
        tables,
        rows: Some(rows.len()),
    })
}

fn column_bytes(value: ValueRef<'_>) -> Vec<u8> {
    match value {
        ValueRef::Null => Vec::new(),
        ValueRef::Integer(i) => i.to_string().into_bytes(),
        ValueRef::Real(f) => f.to_string().into_bytes(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
