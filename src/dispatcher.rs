//! Bridge Dispatcher
//!
//! The transport decodes whatever arrived from JavaScript into a `Command`,
//! hands it to `Dispatcher::dispatch` and encodes the returned `Response`.
//! Nothing in here knows about the transport itself.

use crate::batch::{ContinuationPolicy, Operation, OperationResult, TransactionOutcome};
use crate::config::{is_memory_path, BridgeConfig, DatabaseLocation, OpenOptions, MEMORY_DB};
use crate::engine::sqlite::SqliteEngine;
use crate::engine::Engine;
use crate::error::{DispatchError, RegistryError};
use crate::registry::Registry;
use crate::selftest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Echo {
        value: String,
    },
    Open {
        name: String,
        #[serde(default)]
        location: DatabaseLocation,
        #[serde(default)]
        read_only: bool,
        /// Template database copied into place if the file does not exist.
        #[serde(default)]
        create_from_resource: Option<PathBuf>,
        #[serde(default)]
        busy_timeout_ms: Option<u64>,
    },
    Close {
        name: String,
    },
    Delete {
        name: String,
        #[serde(default)]
        location: DatabaseLocation,
    },
    Batch {
        name: String,
        #[serde(default)]
        policy: ContinuationPolicy,
        operations: Vec<Operation>,
    },
    Transaction {
        name: String,
        #[serde(default)]
        read_only: bool,
        operations: Vec<Operation>,
    },
    SelfTest,
}

impl Command {
    /// Database the command targets, if any.
    pub fn database(&self) -> Option<&str> {
        match self {
            Command::Open { name, .. }
            | Command::Close { name }
            | Command::Delete { name, .. }
            | Command::Batch { name, .. }
            | Command::Transaction { name, .. } => Some(name),
            Command::Echo { .. } | Command::SelfTest => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Echo { value: String },
    Opened { name: String, dbid: u64 },
    Closed { name: String },
    Deleted { name: String },
    Batch { results: Vec<OperationResult> },
    Transaction { outcome: TransactionOutcome },
    SelfTest { ok: bool },
    Error { code: String, message: String },
}

impl From<DispatchError> for Response {
    fn from(err: DispatchError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub struct Dispatcher<E: Engine = SqliteEngine> {
    registry: Arc<Registry<E>>,
    config: BridgeConfig,
}

impl<E: Engine> Dispatcher<E> {
    pub fn new(registry: Arc<Registry<E>>, config: BridgeConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Registry<E> {
        &self.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs one command. Failures come back as `Response::Error`.
    pub async fn dispatch(&self, command: Command) -> Response {
        match self.try_dispatch(command).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(code = err.code(), error = %err, "command failed");
                err.into()
            }
        }
    }

    async fn try_dispatch(&self, command: Command) -> Result<Response, DispatchError> {
        match command {
            Command::Echo { value } => Ok(Response::Echo { value }),
            Command::Open {
                name,
                location,
                read_only,
                create_from_resource,
                busy_timeout_ms,
            } => {
                validate_name(&name)?;
                let path = self.config.resolve(&name, location);
                if self.config.create_dirs {
                    ensure_parent_dir(&name, &path)?;
                }
                let busy_timeout = busy_timeout_ms
                    .map_or_else(|| self.config.busy_timeout(), Duration::from_millis);
                let options = OpenOptions {
                    read_only,
                    create_if_missing: !read_only,
                    busy_timeout: Some(busy_timeout),
                    create_from: create_from_resource,
                };
                let handle = self.registry.open(&name, &path, options).await?;
                Ok(Response::Opened {
                    name,
                    dbid: handle.dbid(),
                })
            }
            Command::Close { name } => {
                validate_name(&name)?;
                self.registry.close(&name).await?;
                Ok(Response::Closed { name })
            }
            Command::Delete { name, location } => {
                validate_name(&name)?;
                let path = self.config.resolve(&name, location);
                self.registry.delete(&name, &path).await?;
                Ok(Response::Deleted { name })
            }
            Command::Batch {
                name,
                policy,
                operations,
            } => {
                validate_name(&name)?;
                let results = self.registry.run_batch(&name, operations, policy).await?;
                Ok(Response::Batch { results })
            }
            Command::Transaction {
                name,
                read_only,
                operations,
            } => {
                validate_name(&name)?;
                let outcome = self
                    .registry
                    .run_transaction(&name, operations, read_only)
                    .await?;
                Ok(Response::Transaction { outcome })
            }
            Command::SelfTest => {
                selftest::run(&self.registry, &self.config)
                    .await
                    .map_err(|e| DispatchError::SelfTest(format!("{:#}", e)))?;
                Ok(Response::SelfTest { ok: true })
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), DispatchError> {
    if name.is_empty() {
        return Err(DispatchError::Invalid("database name is missing".to_string()));
    }
    let has_separator = name.contains('/') || name.contains('\\') || name == "..";
    if name != MEMORY_DB && has_separator {
        return Err(DispatchError::Invalid(format!(
            "database name must be a plain file name: {}",
            name
        )));
    }
    Ok(())
}

fn ensure_parent_dir(name: &str, path: &Path) -> Result<(), DispatchError> {
    if is_memory_path(path) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RegistryError::Open {
            id: name.to_string(),
            reason: format!("failed to create {}: {}", parent.display(), e),
        })?;
    }
    Ok(())
}
