pub mod actor;
pub mod assembler;
pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod registry;
pub mod selftest;
pub mod transport;
pub mod value;

pub use actor::ConnectionHandle;
pub use batch::{Batch, ContinuationPolicy, Operation, OperationResult, TransactionOutcome};
pub use config::{BridgeConfig, DatabaseLocation, OpenOptions};
pub use dispatcher::{Command, Dispatcher, Response};
pub use engine::sqlite::SqliteEngine;
pub use engine::Engine;
pub use error::{DispatchError, EngineError, ErrorKind, RegistryError};
pub use registry::Registry;
pub use value::SqlValue;
