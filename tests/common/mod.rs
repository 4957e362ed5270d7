#![allow(dead_code)]

use sqlbridge::batch::RawOutcome;
use sqlbridge::{Engine, EngineError, OpenOptions, SqlValue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Engine driven by the SQL text, for exercising the executor without SQLite.
///
/// - `PANIC` panics inside `execute`
/// - `FAIL <code>` returns an engine error with that code
/// - `WAIT` blocks until `release()` is called
/// - `SLEEP <ms>` sleeps
/// - anything else succeeds with one changed row
///
/// Every statement is appended to the log as `<file name>:<sql>` before it
/// runs. Opening a path whose file name starts with `bad` fails; one whose
/// file name starts with `hold` blocks until `release()`, like `WAIT`.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<String>>,
    gate: Mutex<bool>,
    gate_cv: Condvar,
    files: Mutex<HashSet<PathBuf>>,
    attempts: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn release(&self) {
        *self.shared.gate.lock().unwrap() = true;
        self.shared.gate_cv.notify_all();
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn file_exists(&self, path: &Path) -> bool {
        self.shared.files.lock().unwrap().contains(path)
    }

    fn wait_for_release(&self) {
        let mut open = self.shared.gate.lock().unwrap();
        while !*open {
            open = self.shared.gate_cv.wait(open).unwrap();
        }
    }

    /// Polls until `count` engine opens have started.
    pub async fn wait_for_open_attempts(&self, count: usize) {
        for _ in 0..500 {
            if self.shared.attempts.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never saw {} open attempts", count);
    }

    /// Polls the log until an entry ends with `suffix`.
    pub async fn wait_for_log(&self, suffix: &str) {
        for _ in 0..500 {
            if self.log().iter().any(|entry| entry.ends_with(suffix)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log never recorded {}", suffix);
    }
}

impl Engine for ScriptedEngine {
    type Connection = PathBuf;

    fn open(&self, path: &Path, _options: &OpenOptions) -> Result<PathBuf, EngineError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with("bad") {
            return Err(EngineError::new(14, "unable to open database file"));
        }
        if name.starts_with("hold") {
            self.wait_for_release();
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared.files.lock().unwrap().insert(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    fn execute(
        &self,
        conn: &mut PathBuf,
        sql: &str,
        _params: &[SqlValue],
    ) -> Result<RawOutcome, EngineError> {
        let name = conn.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.shared.log.lock().unwrap().push(format!("{}:{}", name, sql));

        if sql == "PANIC" {
            panic!("scripted panic");
        }
        if let Some(code) = sql.strip_prefix("FAIL ") {
            return Err(EngineError::new(code.parse().unwrap(), "scripted failure"));
        }
        if let Some(ms) = sql.strip_prefix("SLEEP ") {
            std::thread::sleep(Duration::from_millis(ms.parse().unwrap()));
        }
        if sql == "WAIT" {
            self.wait_for_release();
        }
        Ok(RawOutcome::Changes {
            count: 1,
            last_insert_id: None,
        })
    }

    fn close(&self, _conn: PathBuf) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy(&self, path: &Path) -> std::io::Result<bool> {
        Ok(self.shared.files.lock().unwrap().remove(path))
    }
}
