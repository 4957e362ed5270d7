use crate::error::ErrorKind;
use crate::value::SqlValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Statements that modify the database. Checked against `read_only`
/// operations before they reach the engine.
static WRITE_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\s|;)*(?:alter|create|delete|drop|insert|reindex|replace|update)")
        .expect("write statement pattern")
});

/// One SQL statement with its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<SqlValue>,
    #[serde(default)]
    pub read_only: bool,
}

impl Operation {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            read_only: false,
        }
    }

    pub fn with_params<I, V>(sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        Self {
            sql: sql.into(),
            params: params.into_iter().map(Into::into).collect(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Whether `sql` starts with a statement that modifies the database.
pub fn is_write_statement(sql: &str) -> bool {
    WRITE_STATEMENT.is_match(sql)
}

/// Ordered operations submitted together against one connection.
pub type Batch = Vec<Operation>;

/// What to do with the rest of a batch once an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    #[default]
    StopOnError,
    ContinueOnError,
}

/// Raw successful outcome of a single engine call, before assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue>>,
    },
    Changes {
        count: u64,
        last_insert_id: Option<i64>,
    },
}

/// Normalized outcome of one operation, index-aligned with its batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationResult {
    RowSet {
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue>>,
    },
    RowsAffected {
        count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_insert_id: Option<i64>,
    },
    Failure {
        kind: ErrorKind,
        code: i32,
        message: String,
    },
    NotExecuted,
}

impl OperationResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        OperationResult::Failure {
            kind,
            code: kind.code(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OperationResult::RowSet { .. } | OperationResult::RowsAffected { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OperationResult::Failure { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            OperationResult::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Rows of a `RowSet` keyed by column name, the shape JavaScript callers
    /// read through `rows.item(i)`.
    pub fn rows_as_objects(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let OperationResult::RowSet { columns, rows } = self else {
            return Vec::new();
        };
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(name, value)| {
                        let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                        (name.clone(), json)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Result of a batch run inside one `BEGIN`/`COMMIT` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub committed: bool,
    pub results: Vec<OperationResult>,
    /// Set when `BEGIN`, `COMMIT` or `ROLLBACK` itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_failure: Option<OperationResult>,
}
