//! Turns raw engine outcomes into `OperationResult`s.
//!
//! Nothing in here returns an error or panics: every input, including a
//! captured panic payload, becomes a well-formed result slot.

use crate::batch::{OperationResult, RawOutcome};
use crate::error::{EngineError, ErrorKind};
use std::any::Any;

// Primary SQLite result codes used by the mapping table.
const SQLITE_ERROR: i32 = 1;
const SQLITE_INTERNAL: i32 = 2;
const SQLITE_PERM: i32 = 3;
const SQLITE_ABORT: i32 = 4;
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_READONLY: i32 = 8;
const SQLITE_INTERRUPT: i32 = 9;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTFOUND: i32 = 12;
const SQLITE_FULL: i32 = 13;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_PROTOCOL: i32 = 15;
const SQLITE_SCHEMA: i32 = 17;
const SQLITE_TOOBIG: i32 = 18;
const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_MISMATCH: i32 = 20;
const SQLITE_MISUSE: i32 = 21;
const SQLITE_AUTH: i32 = 23;
const SQLITE_RANGE: i32 = 25;
const SQLITE_NOTADB: i32 = 26;

/// Maps a primary engine code (and its message) onto the public taxonomy.
///
/// Extended codes are reduced to their primary code first. SQLite reports
/// both parse errors and missing objects as `SQLITE_ERROR`, so the message is
/// consulted to split out syntax errors.
pub fn map_engine_code(code: i32, message: &str) -> ErrorKind {
    let primary = if code > 0 { code & 0xff } else { code };
    match primary {
        SQLITE_ERROR if message.contains("syntax error") => ErrorKind::Syntax,
        SQLITE_ERROR => ErrorKind::Database,
        SQLITE_INTERNAL | SQLITE_PERM | SQLITE_ABORT | SQLITE_READONLY | SQLITE_INTERRUPT
        | SQLITE_IOERR | SQLITE_CORRUPT | SQLITE_NOTFOUND | SQLITE_CANTOPEN | SQLITE_PROTOCOL
        | SQLITE_MISMATCH | SQLITE_MISUSE | SQLITE_AUTH | SQLITE_RANGE | SQLITE_NOTADB => {
            ErrorKind::Database
        }
        SQLITE_BUSY | SQLITE_LOCKED => ErrorKind::Timeout,
        SQLITE_FULL => ErrorKind::Quota,
        SQLITE_SCHEMA => ErrorKind::Version,
        SQLITE_TOOBIG => ErrorKind::TooLarge,
        SQLITE_CONSTRAINT => ErrorKind::Constraint,
        _ => ErrorKind::Unknown,
    }
}

pub fn assemble(outcome: Result<RawOutcome, EngineError>) -> OperationResult {
    match outcome {
        Ok(RawOutcome::Rows { columns, rows }) => OperationResult::RowSet { columns, rows },
        Ok(RawOutcome::Changes {
            count,
            last_insert_id,
        }) => OperationResult::RowsAffected {
            count,
            last_insert_id,
        },
        Err(err) => {
            let kind = map_engine_code(err.code, &err.message);
            OperationResult::failure(kind, err.message)
        }
    }
}

/// Result slot for an engine call that panicked.
pub fn assemble_fault(payload: Box<dyn Any + Send>) -> OperationResult {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unrecognized panic payload".to_string()
    };
    OperationResult::failure(ErrorKind::Unknown, format!("internal fault: {}", detail))
}
