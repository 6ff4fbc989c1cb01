//! Single-writer serialized task queue over one SQLite file.
//!
//! All reads and writes against one thumbnail database go through a
//! dedicated worker thread, which is what makes concurrent upserts from
//! multiple callers safe without external locking. The worker opens a
//! fresh connection per task execution (WAL mode + busy timeout set on
//! every open), retries transient lock errors with linear backoff, and
//! self-terminates after an idle period - it is transparently restarted
//! by the next scheduled task.

use crate::error::DbError;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Linear backoff step between retry attempts.
const BACKOFF_STEP: Duration = Duration::from_millis(50);

/// Busy timeout set on every fresh connection.
const BUSY_TIMEOUT_MS: u32 = 3_000;

/// Default retry budget for writes.
pub const WRITE_RETRIES: u32 = 5;

/// Default retry budget for reads.
pub const READ_RETRIES: u32 = 2;

/// A pending task result.
///
/// `wait()` blocks the calling thread; only the adapter's documented
/// blocking conveniences should do that.
pub struct DbFuture<T> {
    rx: Receiver<Result<T, DbError>>,
}

impl<T> DbFuture<T> {
    /// Block until the task resolves.
    pub fn wait(self) -> Result<T, DbError> {
        self.rx.recv().map_err(|_| DbError::WorkerGone)?
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, DbError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(DbError::Busy("task timed out".to_string())),
            Err(RecvTimeoutError::Disconnected) => Err(DbError::WorkerGone),
        }
    }
}

enum WorkerMsg {
    Task(Box<dyn FnOnce(&Path) + Send>),
    Wake,
}

struct WorkerSlot {
    running: bool,
    handle: Option<JoinHandle<()>>,
}

/// Serialized single-writer access to one SQLite file.
///
/// The creator owns the operator and is responsible for calling
/// [`DbOperator::shutdown`]; there is no ambient registry.
pub struct DbOperator {
    db_path: PathBuf,
    tx: Sender<WorkerMsg>,
    rx: Receiver<WorkerMsg>,
    slot: Arc<Mutex<WorkerSlot>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
    idle_timeout: Duration,
}

impl DbOperator {
    /// Create an operator for the database at `db_path`.
    ///
    /// No I/O happens here; the worker thread starts lazily with the
    /// first scheduled task.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self::with_idle_timeout(db_path, Duration::from_secs(30))
    }

    /// As [`DbOperator::new`] with a custom idle self-stop period.
    pub fn with_idle_timeout(db_path: impl Into<PathBuf>, idle_timeout: Duration) -> Self {
        let (tx, rx) = unbounded();
        Self {
            db_path: db_path.into(),
            tx,
            rx,
            slot: Arc::new(Mutex::new(WorkerSlot {
                running: false,
                handle: None,
            })),
            stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            idle_timeout,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a fresh connection with WAL mode and a busy timeout.
    pub fn open_connection(db_path: &Path) -> Result<Connection, DbError> {
        let conn = Connection::open(db_path).map_err(|e| DbError::OpenFailed {
            path: db_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA busy_timeout={BUSY_TIMEOUT_MS};"
        ))?;
        Ok(conn)
    }

    /// Schedule a write task with the default retry budget.
    pub fn schedule_write<T, F>(&self, task: F) -> DbFuture<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule(WRITE_RETRIES, task)
    }

    /// Schedule a read task with a small retry budget.
    pub fn schedule_read<T, F>(&self, task: F) -> DbFuture<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule(READ_RETRIES, task)
    }

    /// Schedule a task with an explicit retry budget.
    ///
    /// The task runs on the worker thread against a fresh connection.
    /// On busy/locked errors it is re-run up to `retries` times with
    /// linear backoff (`50ms * attempt`); an exhausted budget surfaces
    /// the busy error on the returned future.
    pub fn schedule<T, F>(&self, retries: u32, task: F) -> DbFuture<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);

        // After shutdown nothing will ever drain the queue; resolve the
        // future immediately instead of letting a blocking wait() hang.
        if self.stop.load(std::sync::atomic::Ordering::Acquire) {
            let _ = result_tx.send(Err(DbError::WorkerGone));
            return DbFuture { rx: result_rx };
        }

        let envelope: Box<dyn FnOnce(&Path) + Send> = Box::new(move |db_path: &Path| {
            let mut attempt: u32 = 0;
            let result = loop {
                let attempt_result = Self::open_connection(db_path)
                    .and_then(|conn| task(&conn).map_err(DbError::from));
                match attempt_result {
                    Err(e) if e.is_busy() && attempt < retries => {
                        attempt += 1;
                        debug!(attempt, "database busy, retrying");
                        thread::sleep(BACKOFF_STEP * attempt);
                    }
                    other => break other,
                }
            };
            if let Err(e) = &result {
                // The caller may have dropped its future; log here so
                // fire-and-forget failures are not silent.
                warn!("db task failed: {e}");
            }
            let _ = result_tx.send(result);
        });

        let _ = self.tx.send(WorkerMsg::Task(envelope));
        self.ensure_worker();

        DbFuture { rx: result_rx }
    }

    /// Execute a list of operations as one atomic transaction.
    ///
    /// On a busy retry the transaction is rolled back and the whole
    /// batch re-runs, so it commits all-or-nothing.
    pub fn schedule_write_batch(
        &self,
        ops: Vec<Box<dyn Fn(&Connection) -> rusqlite::Result<()> + Send>>,
    ) -> DbFuture<()> {
        self.schedule(WRITE_RETRIES, move |conn| {
            let tx = conn.unchecked_transaction()?;
            for op in &ops {
                op(&tx)?;
            }
            tx.commit()
        })
    }

    /// Stop the worker. Tasks queued before the stop flag still run
    /// during the shutdown drain. With `wait`, joins the worker.
    pub fn shutdown(&self, wait: bool) {
        self.stop.store(true, std::sync::atomic::Ordering::Release);
        let _ = self.tx.send(WorkerMsg::Wake);
        let handle = match self.slot.lock() {
            Ok(mut slot) => {
                if !slot.running {
                    // No worker to drain the queue; drop whatever raced
                    // in so pending futures resolve with WorkerGone.
                    while self.rx.try_recv().is_ok() {}
                }
                if wait {
                    slot.handle.take()
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("db worker thread panicked on shutdown");
            }
        }
    }

    /// Spawn the worker if it is not running. Worker exit and restart
    /// both take the slot lock, which closes the race between an idle
    /// worker leaving and a new task arriving.
    fn ensure_worker(&self) {
        let mut slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        if slot.running {
            return;
        }
        if self.stop.load(std::sync::atomic::Ordering::Acquire) {
            // No worker will run again; drop anything a racing caller
            // queued so its future resolves with WorkerGone.
            while self.rx.try_recv().is_ok() {}
            return;
        }

        let rx = self.rx.clone();
        let db_path = self.db_path.clone();
        let stop = Arc::clone(&self.stop);
        let shared_slot = Arc::clone(&self.slot);
        let idle = self.idle_timeout;

        slot.running = true;
        let handle = thread::Builder::new()
            .name("db-operator".into())
            .spawn(move || worker_loop(rx, db_path, stop, shared_slot, idle));
        match handle {
            Ok(handle) => slot.handle = Some(handle),
            Err(e) => {
                slot.running = false;
                warn!("failed to spawn db worker: {e}");
            }
        }
    }
}

impl Drop for DbOperator {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn worker_loop(
    rx: Receiver<WorkerMsg>,
    db_path: PathBuf,
    stop: Arc<std::sync::atomic::AtomicBool>,
    slot: Arc<Mutex<WorkerSlot>>,
    idle: Duration,
) {
    loop {
        if stop.load(std::sync::atomic::Ordering::Acquire) {
            // Drain tasks that were queued before the stop flag so
            // fire-and-forget writes still commit.
            while let Ok(WorkerMsg::Task(envelope)) = rx.try_recv() {
                let db_path = db_path.clone();
                if catch_unwind(AssertUnwindSafe(move || envelope(&db_path))).is_err() {
                    warn!("db task panicked during shutdown drain");
                }
            }
            if let Ok(mut slot) = slot.lock() {
                slot.running = false;
            }
            return;
        }

        match rx.recv_timeout(idle) {
            Ok(WorkerMsg::Task(envelope)) => {
                // A panicking task must not take the worker down; the
                // caller sees WorkerGone on its future instead.
                let db_path = db_path.clone();
                if catch_unwind(AssertUnwindSafe(move || envelope(&db_path))).is_err() {
                    warn!("db task panicked; worker continues");
                }
            }
            Ok(WorkerMsg::Wake) => {}
            Err(RecvTimeoutError::Timeout) => {
                let Ok(mut slot) = slot.lock() else { return };
                if rx.is_empty() {
                    debug!("db worker idle, stopping");
                    slot.running = false;
                    return;
                }
                // A task raced in; keep going.
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Ok(mut slot) = slot.lock() {
                    slot.running = false;
                }
                return;
            }
        }
    }
}
