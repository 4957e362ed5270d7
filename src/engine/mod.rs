use crate::batch::RawOutcome;
use crate::config::OpenOptions;
use crate::error::EngineError;
use crate::value::SqlValue;
use std::path::Path;

/// Embedded SQL engine capability.
///
/// A connection produced by `open` is moved onto the connection's actor
/// thread and only ever touched there, so it must be `Send` but need not be
/// `Sync`. The engine itself is shared by every actor.
pub trait Engine: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn open(&self, path: &Path, options: &OpenOptions) -> Result<Self::Connection, EngineError>;

    fn execute(
        &self,
        conn: &mut Self::Connection,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<RawOutcome, EngineError>;

    fn close(&self, conn: Self::Connection);

    /// Removes the persisted store at `path`. Returns `false` when there was
    /// nothing to remove.
    fn destroy(&self, path: &Path) -> std::io::Result<bool>;
}

pub mod sqlite;
