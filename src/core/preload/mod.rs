//! # Preload Worker Module
//!
//! One-shot, cancellable pass over a folder's image files that streams
//! already-cached thumbnail rows out of the database and collects the
//! files still missing a valid thumbnail. Every signal carries the
//! worker's generation id; callers must ignore signals from superseded
//! generations.

use crate::core::db::{ThumbDbAdapter, ThumbRow};
use crate::core::folder::stat_file;
use crate::core::paths::canonical_key;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Default number of files processed per database batch.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Default cap on the missing-thumbnail list.
pub const DEFAULT_MISSING_CAP: usize = 512;

/// Tuning for one preload run.
#[derive(Debug, Clone, Copy)]
pub struct PreloadConfig {
    /// Target thumbnail dimensions rows must match to count as valid.
    pub target_w: u32,
    pub target_h: u32,
    pub chunk_size: usize,
    /// Upper bound on how many missing paths are reported.
    pub missing_cap: usize,
}

impl PreloadConfig {
    pub fn new(target_w: u32, target_h: u32) -> Self {
        Self {
            target_w,
            target_h,
            chunk_size: DEFAULT_CHUNK_SIZE,
            missing_cap: DEFAULT_MISSING_CAP,
        }
    }
}

/// Signals emitted during a preload run, tagged with the generation.
#[derive(Debug, Clone)]
pub enum PreloadSignal {
    /// Rows with valid, non-empty thumbnail bytes for the current file
    /// versions.
    CachedChunk { generation: u64, rows: Vec<ThumbRow> },
    /// (processed, total) after each chunk.
    Progress {
        generation: u64,
        processed: usize,
        total: usize,
    },
    /// Always emitted, even on cancellation. `missing` holds canonical
    /// keys that need thumbnail generation, capped at `missing_cap`.
    Finished {
        generation: u64,
        missing: Vec<String>,
        cancelled: bool,
    },
}

/// Callback invoked on the worker thread for each signal.
pub type PreloadCallback = Arc<dyn Fn(PreloadSignal) + Send + Sync>;

/// Handle to a running preload pass.
pub struct PreloadWorker {
    generation: u64,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PreloadWorker {
    /// Start a preload pass over `files` against `adapter`.
    pub fn spawn(
        generation: u64,
        files: Vec<PathBuf>,
        adapter: Arc<ThumbDbAdapter>,
        config: PreloadConfig,
        on_signal: PreloadCallback,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name(format!("preload-{generation}"))
            .spawn(move || run(generation, files, adapter, config, cancel_flag, on_signal))
            .ok();
        if handle.is_none() {
            warn!(generation, "failed to spawn preload worker");
        }

        Self {
            generation,
            cancel,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Request early exit. The run still emits its finished signal.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Wait for the run to end.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PreloadWorker {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run(
    generation: u64,
    files: Vec<PathBuf>,
    adapter: Arc<ThumbDbAdapter>,
    config: PreloadConfig,
    cancel: Arc<AtomicBool>,
    on_signal: PreloadCallback,
) {
    let total = files.len();
    let chunk_size = config.chunk_size.max(1);
    let mut processed = 0usize;
    let mut missing: Vec<String> = Vec::new();
    let mut cancelled = false;

    for chunk in files.chunks(chunk_size) {
        if cancel.load(Ordering::Acquire) {
            cancelled = true;
            break;
        }

        // Stat first; files that vanished mid-scan are skipped entirely.
        let stats: Vec<(PathBuf, String, u64, i64)> = chunk
            .iter()
            .filter_map(|path| {
                stat_file(path).map(|(size, mtime)| {
                    (path.clone(), canonical_key(path), size, mtime)
                })
            })
            .collect();

        let paths: Vec<PathBuf> = stats.iter().map(|(p, ..)| p.clone()).collect();
        let rows: HashMap<String, ThumbRow> = match adapter.get_rows_for_paths(&paths) {
            Ok(rows) => rows.into_iter().map(|r| (r.path.clone(), r)).collect(),
            Err(e) => {
                warn!(generation, "preload row fetch failed: {e}");
                HashMap::new()
            }
        };

        let mut cached = Vec::new();
        for (_, key, size, mtime) in stats {
            let valid = rows.get(&key).filter(|row| {
                row.is_valid_for(mtime, size, config.target_w, config.target_h)
                    && row.has_thumbnail()
            });
            match valid {
                Some(row) => cached.push(row.clone()),
                None => {
                    if missing.len() < config.missing_cap {
                        missing.push(key);
                    }
                }
            }
        }

        processed += chunk.len();
        if !cached.is_empty() {
            on_signal(PreloadSignal::CachedChunk {
                generation,
                rows: cached,
            });
        }
        on_signal(PreloadSignal::Progress {
            generation,
            processed,
            total,
        });
    }

    debug!(
        generation,
        processed,
        missing = missing.len(),
        cancelled,
        "preload finished"
    );
    on_signal(PreloadSignal::Finished {
        generation,
        missing,
        cancelled,
    });
}
