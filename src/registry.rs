//! Connection Registry
//!
//! Maps database identifiers to live `ConnectionHandle`s and owns their
//! lifecycle. The map is the only state shared by every caller and sits
//! behind one async mutex, which is never held across engine work; the
//! engine connections themselves are owned by their actor threads.

use crate::actor::ConnectionHandle;
use crate::batch::{Batch, ContinuationPolicy, OperationResult, TransactionOutcome};
use crate::config::{is_memory_path, OpenOptions};
use crate::engine::sqlite::SqliteEngine;
use crate::engine::Engine;
use crate::error::RegistryError;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tokio::sync::{watch, Mutex};

static GLOBAL: LazyLock<Registry<SqliteEngine>> =
    LazyLock::new(|| Registry::new(SqliteEngine::new()));

pub struct Registry<E: Engine = SqliteEngine> {
    engine: Arc<E>,
    entries: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    live: HashMap<String, ConnectionHandle>,
    /// Identifiers closed since they were last opened.
    retired: HashSet<String>,
    /// Identifiers with an open or delete in flight. The task doing the work
    /// holds the sender; dropping it wakes every waiter.
    pending: HashMap<String, watch::Receiver<()>>,
}

impl Entries {
    fn get(&self, id: &str) -> Option<&ConnectionHandle> {
        self.live.get(id)
    }

    fn insert(&mut self, handle: ConnectionHandle) {
        self.retired.remove(handle.id());
        self.live.insert(handle.id().to_string(), handle);
    }

    /// Drops the entry for `id` if it still belongs to connection `dbid`.
    fn retire(&mut self, id: &str, dbid: u64) {
        if self.live.get(id).is_some_and(|h| h.dbid() == dbid) {
            self.live.remove(id);
            self.retired.insert(id.to_string());
        }
    }

    /// Marks `id` busy until the returned sender is dropped.
    fn reserve(&mut self, id: &str) -> watch::Sender<()> {
        let (tx, rx) = watch::channel(());
        self.pending.insert(id.to_string(), rx);
        tx
    }

    /// Waiter for work in flight on `id`. Markers whose owner went away
    /// (a cancelled open or delete) are cleared here.
    fn pending(&mut self, id: &str) -> Option<watch::Receiver<()>> {
        let waiter = self.pending.get(id)?;
        if waiter.has_changed().is_err() {
            self.pending.remove(id);
            return None;
        }
        Some(waiter.clone())
    }
}

async fn wait_pending(mut waiter: watch::Receiver<()>) {
    // Nothing is ever sent; this resolves once the owner drops its sender.
    let _ = waiter.changed().await;
}

impl Registry<SqliteEngine> {
    /// Process-wide registry backed by SQLite.
    pub fn global() -> &'static Registry<SqliteEngine> {
        &GLOBAL
    }
}

impl<E: Engine> Registry<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Opens `id` at `path`, or returns the already open connection.
    ///
    /// If `id` is in the middle of closing, waits for the drain to finish and
    /// then opens a fresh connection. Concurrent opens of one identifier
    /// share a single engine open. The registry lock is not held while the
    /// engine opens, so other identifiers are never held up.
    pub async fn open(
        &self,
        id: &str,
        path: impl AsRef<Path>,
        options: OpenOptions,
    ) -> Result<ConnectionHandle, RegistryError> {
        let path = path.as_ref();
        loop {
            let mut entries = self.entries.lock().await;
            if let Some(waiter) = entries.pending(id) {
                drop(entries);
                tracing::debug!(db = %id, "open waiting for in-flight open or delete");
                wait_pending(waiter).await;
                continue;
            }
            if let Some(existing) = entries.get(id) {
                if existing.is_closed() {
                    let dbid = existing.dbid();
                    entries.retire(id, dbid);
                } else if existing.is_closing() {
                    let draining = existing.clone();
                    drop(entries);
                    tracing::debug!(db = %id, "open waiting for pending close");
                    draining.wait_closed().await;
                    continue;
                } else {
                    tracing::debug!(db = %id, dbid = existing.dbid(), "database already open");
                    return Ok(existing.clone());
                }
            }
            let _reservation = entries.reserve(id);
            drop(entries);

            let engine = Arc::clone(&self.engine);
            let spawned = ConnectionHandle::spawn(engine, id, path, options).await;
            let mut entries = self.entries.lock().await;
            entries.pending.remove(id);
            let handle = spawned?;
            tracing::info!(
                db = %id,
                dbid = handle.dbid(),
                path = %path.display(),
                "database opened"
            );
            entries.insert(handle.clone());
            return Ok(handle);
        }
    }

    /// Closes `id` once everything already queued on it has run.
    ///
    /// Submissions made after this call starts are rejected with `Closed`.
    pub async fn close(&self, id: &str) -> Result<(), RegistryError> {
        let handle = {
            let entries = self.entries.lock().await;
            entries
                .get(id)
                .cloned()
                .ok_or_else(|| RegistryError::Closed(id.to_string()))?
        };
        if !handle.begin_close() {
            return Err(RegistryError::Closed(id.to_string()));
        }
        tracing::info!(db = %id, dbid = handle.dbid(), "closing database");
        handle.wait_closed().await;
        self.entries.lock().await.retire(id, handle.dbid());
        tracing::info!(db = %id, "database closed");
        Ok(())
    }

    /// Closes `id` if it is open, then removes its persisted store.
    ///
    /// Fails with `InUse` while another identifier has the same file open,
    /// and with `NotFound` when there is neither an entry nor a file. Opens
    /// of `id` wait until the delete is done; the file removal itself runs
    /// on the blocking pool with the registry unlocked.
    pub async fn delete(&self, id: &str, path: impl AsRef<Path>) -> Result<(), RegistryError> {
        let path = path.as_ref();
        let (existing, _reservation) = loop {
            let mut entries = self.entries.lock().await;
            if let Some(waiter) = entries.pending(id) {
                drop(entries);
                wait_pending(waiter).await;
                continue;
            }
            let existing = entries.get(id).cloned();
            let target = existing.as_ref().map_or(path, |h| h.path());
            Self::check_not_shared(&entries, id, target)?;
            break (existing, entries.reserve(id));
        };

        let target = match &existing {
            Some(handle) => {
                if handle.begin_close() {
                    tracing::info!(db = %id, dbid = handle.dbid(), "closing database for delete");
                }
                handle.wait_closed().await;
                handle.path().to_path_buf()
            }
            None => path.to_path_buf(),
        };

        {
            let mut entries = self.entries.lock().await;
            if let Some(handle) = &existing {
                entries.retire(id, handle.dbid());
            }
            if let Err(e) = Self::check_not_shared(&entries, id, &target) {
                entries.pending.remove(id);
                return Err(e);
            }
        }

        let engine = Arc::clone(&self.engine);
        let doomed = target.clone();
        let destroyed = tokio::task::spawn_blocking(move || engine.destroy(&doomed)).await;

        let mut entries = self.entries.lock().await;
        entries.pending.remove(id);
        let removed = destroyed
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string()))
            .map_err(|reason| RegistryError::Delete {
                id: id.to_string(),
                reason,
            })?;
        if !removed && existing.is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        entries.retired.remove(id);
        tracing::info!(db = %id, path = %target.display(), "database deleted");
        Ok(())
    }

    /// Live handle for `id`. Closing or closed identifiers report `Closed`;
    /// ones never opened (or deleted) report `NotFound`.
    pub async fn lookup(&self, id: &str) -> Result<ConnectionHandle, RegistryError> {
        let entries = self.entries.lock().await;
        match entries.get(id) {
            Some(handle) if handle.is_closing() || handle.is_closed() => {
                Err(RegistryError::Closed(id.to_string()))
            }
            Some(handle) => Ok(handle.clone()),
            None if entries.retired.contains(id) => Err(RegistryError::Closed(id.to_string())),
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    pub async fn run_batch(
        &self,
        id: &str,
        batch: Batch,
        policy: ContinuationPolicy,
    ) -> Result<Vec<OperationResult>, RegistryError> {
        self.lookup(id).await?.run_batch(batch, policy).await
    }

    pub async fn run_transaction(
        &self,
        id: &str,
        batch: Batch,
        read_only: bool,
    ) -> Result<TransactionOutcome, RegistryError> {
        self.lookup(id).await?.run_transaction(batch, read_only).await
    }

    /// Identifiers with an entry, including ones still draining.
    pub async fn open_ids(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut ids: Vec<String> = entries.live.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Closes every connection, draining each queue first.
    pub async fn close_all(&self) {
        let handles: Vec<ConnectionHandle> = {
            let entries = self.entries.lock().await;
            entries.live.values().cloned().collect()
        };
        for handle in &handles {
            handle.begin_close();
        }
        for handle in &handles {
            handle.wait_closed().await;
            self.entries.lock().await.retire(handle.id(), handle.dbid());
        }
        tracing::info!(count = handles.len(), "closed all databases");
    }

    fn check_not_shared(
        entries: &Entries,
        id: &str,
        path: &Path,
    ) -> Result<(), RegistryError> {
        if is_memory_path(path) {
            return Ok(());
        }
        let other = entries
            .live
            .iter()
            .find(|(other_id, h)| other_id.as_str() != id && !h.is_closing() && h.path() == path);
        match other {
            Some((other_id, _)) => Err(RegistryError::InUse {
                id: id.to_string(),
                other: other_id.clone(),
            }),
            None => Ok(()),
        }
    }
}
