use crate::batch::RawOutcome;
use crate::config::{is_memory_path, OpenOptions};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::value::SqlValue;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const SQLITE_ERROR: i32 = 1;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_RANGE: i32 = 25;
/// Faults raised by rusqlite itself rather than by SQLite.
const NON_SQLITE_FAULT: i32 = -1;

/// SQL made only of whitespace, semicolons and comments. SQLite prepares it
/// to an empty statement.
static BLANK_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s|;|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/)*$").expect("blank sql pattern")
});

/// Statements whose row change sets the connection's last insert rowid.
static INSERT_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\s|;)*(?:insert|replace)\b").expect("insert statement pattern")
});

/// Side files SQLite may leave next to a database.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// SQLite Storage Engine Implementation
///
/// Adapts rusqlite (bundled SQLite) to the `Engine` capability. Every call
/// happens on the owning connection's actor thread; `rusqlite::Connection`
/// is `Send` but `!Sync`, which is exactly what the actor model needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteEngine;

impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for SqliteEngine {
    type Connection = Connection;

    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Connection, EngineError> {
        let conn = if is_memory_path(path) {
            Connection::open_in_memory().map_err(engine_error)?
        } else {
            if let Some(template) = &options.create_from {
                if !path.exists() {
                    std::fs::copy(template, path).map_err(|e| {
                        EngineError::new(
                            SQLITE_CANTOPEN,
                            format!("failed to copy {}: {}", template.display(), e),
                        )
                    })?;
                }
            }
            Connection::open_with_flags(path, open_flags(options)).map_err(engine_error)?
        };

        if let Some(timeout) = options.busy_timeout {
            conn.busy_timeout(timeout).map_err(engine_error)?;
        }
        Ok(conn)
    }

    fn execute(
        &self,
        conn: &mut Connection,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<RawOutcome, EngineError> {
        if BLANK_SQL.is_match(sql) {
            return Ok(RawOutcome::Changes {
                count: 0,
                last_insert_id: None,
            });
        }
        let mut stmt = conn.prepare(sql).map_err(engine_error)?;
        let bound = params_from_iter(params.iter().map(to_sqlite_value));

        if stmt.column_count() > 0 {
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let width = columns.len();
            let mut rows = stmt.query(bound).map_err(engine_error)?;
            let mut materialized = Vec::new();
            while let Some(row) = rows.next().map_err(engine_error)? {
                let mut record = Vec::with_capacity(width);
                for idx in 0..width {
                    let value: Value = row.get(idx).map_err(engine_error)?;
                    record.push(from_sqlite_value(value));
                }
                materialized.push(record);
            }
            return Ok(RawOutcome::Rows {
                columns,
                rows: materialized,
            });
        }

        // Inserts report the rowid even when it equals the previous one;
        // other statements only when something (a trigger) moved it.
        let before = conn.last_insert_rowid();
        let count = stmt.execute(bound).map_err(engine_error)?;
        let after = conn.last_insert_rowid();
        let inserted = INSERT_STATEMENT.is_match(sql) || after != before;
        Ok(RawOutcome::Changes {
            count: count as u64,
            last_insert_id: (count > 0 && inserted).then_some(after),
        })
    }

    fn close(&self, conn: Connection) {
        if let Err((_conn, e)) = conn.close() {
            tracing::warn!(error = %e, "sqlite close reported an error, dropping handle");
        }
    }

    fn destroy(&self, path: &Path) -> std::io::Result<bool> {
        if is_memory_path(path) {
            return Ok(false);
        }
        let existed = remove_if_present(path)?;
        for suffix in SIDE_FILE_SUFFIXES {
            remove_if_present(&with_suffix(path, suffix))?;
        }
        Ok(existed)
    }
}

fn open_flags(options: &OpenOptions) -> OpenFlags {
    let mode = if options.read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else if options.create_if_missing {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    };
    mode | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn engine_error(err: rusqlite::Error) -> EngineError {
    match err {
        rusqlite::Error::SqliteFailure(inner, message) => EngineError::new(
            inner.extended_code,
            message.unwrap_or_else(|| inner.to_string()),
        ),
        rusqlite::Error::InvalidParameterCount(given, expected) => EngineError::new(
            SQLITE_RANGE,
            format!("wrong number of parameters: got {}, expected {}", given, expected),
        ),
        rusqlite::Error::InvalidParameterName(name) => {
            EngineError::new(SQLITE_RANGE, format!("unknown parameter {}", name))
        }
        rusqlite::Error::MultipleStatement => {
            EngineError::new(SQLITE_ERROR, "only one statement per operation is allowed")
        }
        other => EngineError::new(NON_SQLITE_FAULT, other.to_string()),
    }
}

fn to_sqlite_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_sqlite_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(v),
        Value::Real(v) => SqlValue::Real(v),
        Value::Text(v) => SqlValue::Text(v),
        Value::Blob(v) => SqlValue::Blob(v),
    }
}
