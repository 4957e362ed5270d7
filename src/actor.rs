use crate::assembler::{assemble, assemble_fault};
use crate::batch::{
    is_write_statement, Batch, ContinuationPolicy, Operation, OperationResult, TransactionOutcome,
};
use crate::config::OpenOptions;
use crate::engine::Engine;
use crate::error::{ErrorKind, RegistryError};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::{mpsc, oneshot, watch};

static NEXT_DBID: AtomicU64 = AtomicU64::new(1);

const READ_ONLY_VIOLATION: &str = "invalid sql for a read-only transaction";

/// Connection Actor
///
/// Owns one open engine connection and executes everything submitted to it,
/// one operation at a time, in arrival order.
///
/// Thread Safety:
/// This struct lives on its own thread and is never shared. All interaction
/// goes through a `ConnectionHandle` via message passing, which is what keeps
/// two callers from ever touching the same engine handle at once.
pub struct ConnectionActor<E: Engine> {
    engine: Arc<E>,
    conn: E::Connection,
    id: String,
    dbid: u64,
}

/// Messages accepted by the actor's queue.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Run a batch under the given continuation policy.
    RunBatch {
        batch: Batch,
        policy: ContinuationPolicy,
        resp: oneshot::Sender<Vec<OperationResult>>,
    },
    /// Run a batch between `BEGIN` and `COMMIT`/`ROLLBACK` in one queue slot.
    RunTransaction {
        batch: Batch,
        read_only: bool,
        resp: oneshot::Sender<TransactionOutcome>,
    },
    /// Always the last message: close the engine connection and exit.
    Shutdown,
}

/// Handle to a Connection Actor
///
/// `Clone` and `Send`; cloning does not open anything new. The sender sits
/// behind a gate so that accepting a submission and starting a close are
/// mutually exclusive: every batch is queued strictly before `Shutdown`, or
/// rejected with `RegistryError::Closed`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    dbid: u64,
    path: PathBuf,
    gate: Arc<Mutex<Option<mpsc::UnboundedSender<ConnectionMessage>>>>,
    closed: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Spawns the actor on a dedicated thread and opens the engine there.
    ///
    /// Engine calls block, so they must stay off the async workers. Resolves
    /// once the open has succeeded or failed.
    pub async fn spawn<E: Engine>(
        engine: Arc<E>,
        id: &str,
        path: &Path,
        options: OpenOptions,
    ) -> Result<Self, RegistryError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let dbid = NEXT_DBID.fetch_add(1, Ordering::Relaxed);

        let thread_id = id.to_string();
        let thread_path = path.to_path_buf();
        thread::Builder::new()
            .name(format!("sqlbridge-db-{}", dbid))
            .spawn(move || {
                // A minimal runtime drives the receiving side; the actor logic
                // itself is synchronous.
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to start runtime: {}", e)));
                        let _ = closed_tx.send(true);
                        return;
                    }
                };

                let conn = match engine.open(&thread_path, &options) {
                    Ok(conn) => conn,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        let _ = closed_tx.send(true);
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let actor = ConnectionActor {
                    engine,
                    conn,
                    id: thread_id,
                    dbid,
                };
                rt.block_on(actor.run(rx));
                let _ = closed_tx.send(true);
            })
            .map_err(|e| RegistryError::Open {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                id: id.to_string(),
                dbid,
                path: path.to_path_buf(),
                gate: Arc::new(Mutex::new(Some(tx))),
                closed: closed_rx,
            }),
            Ok(Err(reason)) => Err(RegistryError::Open {
                id: id.to_string(),
                reason,
            }),
            Err(_) => Err(RegistryError::Open {
                id: id.to_string(),
                reason: "connection thread exited during open".to_string(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process-unique number of the underlying connection.
    pub fn dbid(&self) -> u64 {
        self.dbid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues a batch and waits for its results.
    pub async fn run_batch(
        &self,
        batch: Batch,
        policy: ContinuationPolicy,
    ) -> Result<Vec<OperationResult>, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.submit(ConnectionMessage::RunBatch {
            batch,
            policy,
            resp: tx,
        })?;
        rx.await.map_err(|_| RegistryError::Closed(self.id.clone()))
    }

    /// Queues a transactional batch and waits for its outcome.
    pub async fn run_transaction(
        &self,
        batch: Batch,
        read_only: bool,
    ) -> Result<TransactionOutcome, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.submit(ConnectionMessage::RunTransaction {
            batch,
            read_only,
            resp: tx,
        })?;
        rx.await.map_err(|_| RegistryError::Closed(self.id.clone()))
    }

    /// True once a close has been accepted, even if the queue is still
    /// draining.
    pub fn is_closing(&self) -> bool {
        self.lock_gate().is_none()
    }

    /// True once the actor has exited and the engine connection is gone.
    pub fn is_closed(&self) -> bool {
        let done = *self.closed.borrow();
        done || self.closed.has_changed().is_err()
    }

    /// Waits until the actor has drained its queue and closed the engine.
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        // Err means the actor thread is gone, which is closed as well.
        let _ = closed.wait_for(|done| *done).await;
    }

    /// Stops accepting submissions and queues `Shutdown` behind everything
    /// already accepted. Returns `false` if a close was already underway.
    pub(crate) fn begin_close(&self) -> bool {
        let mut gate = self.lock_gate();
        match gate.take() {
            Some(sender) => {
                let _ = sender.send(ConnectionMessage::Shutdown);
                true
            }
            None => false,
        }
    }

    fn submit(&self, msg: ConnectionMessage) -> Result<(), RegistryError> {
        let gate = self.lock_gate();
        let sender = gate
            .as_ref()
            .ok_or_else(|| RegistryError::Closed(self.id.clone()))?;
        sender
            .send(msg)
            .map_err(|_| RegistryError::Closed(self.id.clone()))
    }

    fn lock_gate(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<ConnectionMessage>>> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<E: Engine> ConnectionActor<E> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ConnectionMessage>) {
        tracing::debug!(db = %self.id, dbid = self.dbid, "connection actor started");
        while let Some(msg) = rx.recv().await {
            match msg {
                ConnectionMessage::Shutdown => break,
                other => self.handle_message(other),
            }
        }
        let ConnectionActor {
            engine,
            conn,
            id,
            dbid,
        } = self;
        engine.close(conn);
        tracing::debug!(db = %id, dbid, "connection actor stopped");
    }

    /// Executes one queued request. Runs on the actor thread only.
    fn handle_message(&mut self, msg: ConnectionMessage) {
        match msg {
            ConnectionMessage::RunBatch {
                batch,
                policy,
                resp,
            } => {
                let results = self.run_batch(&batch, policy, false);
                let _ = resp.send(results);
            }
            ConnectionMessage::RunTransaction {
                batch,
                read_only,
                resp,
            } => {
                let outcome = self.run_transaction(&batch, read_only);
                let _ = resp.send(outcome);
            }
            ConnectionMessage::Shutdown => {}
        }
    }

    fn run_batch(
        &mut self,
        batch: &[Operation],
        policy: ContinuationPolicy,
        force_read_only: bool,
    ) -> Vec<OperationResult> {
        tracing::debug!(db = %self.id, ops = batch.len(), ?policy, "running batch");
        let mut results = Vec::with_capacity(batch.len());
        let mut halted = false;
        for (index, op) in batch.iter().enumerate() {
            if halted {
                results.push(OperationResult::NotExecuted);
                continue;
            }
            let result = self.execute_one(op, force_read_only);
            if let OperationResult::Failure { kind, message, .. } = &result {
                tracing::debug!(db = %self.id, index, ?kind, %message, "operation failed");
                if policy == ContinuationPolicy::StopOnError {
                    halted = true;
                }
            }
            results.push(result);
        }
        results
    }

    fn run_transaction(&mut self, batch: &[Operation], read_only: bool) -> TransactionOutcome {
        let begin = self.execute_one(&Operation::new("BEGIN"), false);
        if begin.is_failure() {
            return TransactionOutcome {
                committed: false,
                results: vec![OperationResult::NotExecuted; batch.len()],
                control_failure: Some(begin),
            };
        }

        let results = self.run_batch(batch, ContinuationPolicy::StopOnError, read_only);
        if results.iter().any(OperationResult::is_failure) {
            let rollback = self.execute_one(&Operation::new("ROLLBACK"), false);
            return TransactionOutcome {
                committed: false,
                results,
                control_failure: rollback.is_failure().then_some(rollback),
            };
        }

        let commit = self.execute_one(&Operation::new("COMMIT"), false);
        if commit.is_failure() {
            let _ = self.execute_one(&Operation::new("ROLLBACK"), false);
            return TransactionOutcome {
                committed: false,
                results,
                control_failure: Some(commit),
            };
        }
        TransactionOutcome {
            committed: true,
            results,
            control_failure: None,
        }
    }

    /// Runs a single operation. Engine failures and panics both end up in
    /// the returned slot.
    fn execute_one(&mut self, op: &Operation, force_read_only: bool) -> OperationResult {
        if (op.read_only || force_read_only) && is_write_statement(&op.sql) {
            return OperationResult::failure(ErrorKind::Database, READ_ONLY_VIOLATION);
        }
        let engine = &self.engine;
        let conn = &mut self.conn;
        match panic::catch_unwind(AssertUnwindSafe(|| {
            engine.execute(conn, &op.sql, &op.params)
        })) {
            Ok(outcome) => assemble(outcome),
            Err(payload) => {
                tracing::error!(db = %self.id, sql = %op.sql, "engine panicked during execute");
                assemble_fault(payload)
            }
        }
    }
}
