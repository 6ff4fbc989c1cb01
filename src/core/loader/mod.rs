//! # Request Loader Module
//!
//! Schedules decode calls onto a bounded worker pool, dedupes identical
//! in-flight requests and tags each request with a monotonic id so
//! stale completions can be detected and dropped.
//!
//! ## Staleness
//! A path's *latest* request id is authoritative. Issuing new params for
//! a path that is already in flight bumps the latest id; when the older
//! decode eventually finishes, its id no longer matches and the result
//! is discarded. In-flight work cannot be preempted - cancellation is
//! at-most-effort, the result is dropped on arrival.

use crate::core::decode::{DecodeFn, DecodeJob, DecodeMode, DecodedBuffer};
use crate::core::paths::canonical_key;
use crate::error::EngineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// A finished load, stale-filtered.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub path: PathBuf,
    /// Canonical key for `path`.
    pub key: String,
    pub mode: DecodeMode,
    /// Target params the decode was requested with; completions for a
    /// superseded size must not be stamped with the current one.
    pub target_w: Option<u32>,
    pub target_h: Option<u32>,
    pub buffer: Option<DecodedBuffer>,
    pub error: Option<String>,
    pub request_id: u64,
}

/// Callback invoked on the worker thread for each non-stale completion.
pub type LoadCallback = Arc<dyn Fn(LoadResult) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingParams {
    id: u64,
    target_w: Option<u32>,
    target_h: Option<u32>,
    mode: DecodeMode,
}

#[derive(Default)]
struct LoaderState {
    /// Authoritative latest request id per canonical key.
    latest: HashMap<String, u64>,
    /// In-flight request bookkeeping per canonical key.
    pending: HashMap<String, PendingParams>,
}

/// Fire-and-forget decode scheduler.
pub struct RequestLoader {
    pool: rayon::ThreadPool,
    decode: DecodeFn,
    state: Arc<Mutex<LoaderState>>,
    next_id: AtomicU64,
    on_complete: LoadCallback,
    stopped: Arc<AtomicBool>,
}

impl RequestLoader {
    /// Create a loader with a bounded pool of `threads` decode workers.
    pub fn new(
        threads: usize,
        decode: DecodeFn,
        on_complete: LoadCallback,
    ) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.clamp(1, 8))
            .thread_name(|i| format!("decode-{i}"))
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            decode,
            state: Arc::new(Mutex::new(LoaderState::default())),
            next_id: AtomicU64::new(1),
            on_complete,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Schedule a decode. Fire-and-forget; the result arrives through
    /// the completion callback unless it is superseded first.
    ///
    /// An identical pending `(path, params)` request is a no-op and
    /// returns the in-flight id. Differing params issue a new id,
    /// making the earlier completion stale.
    pub fn request_load(
        &self,
        path: &Path,
        target_w: Option<u32>,
        target_h: Option<u32>,
        mode: DecodeMode,
    ) -> u64 {
        let key = canonical_key(path);

        let id = {
            let mut state = self.state.lock().expect("loader state poisoned");
            if let Some(pending) = state.pending.get(&key) {
                if pending.target_w == target_w
                    && pending.target_h == target_h
                    && pending.mode == mode
                {
                    trace!(%key, id = pending.id, "duplicate request deduped");
                    return pending.id;
                }
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.latest.insert(key.clone(), id);
            state.pending.insert(
                key.clone(),
                PendingParams {
                    id,
                    target_w,
                    target_h,
                    mode,
                },
            );
            id
        };

        let job = DecodeJob {
            path: path.to_path_buf(),
            target_w,
            target_h,
            mode,
        };
        let decode = Arc::clone(&self.decode);
        let state = Arc::clone(&self.state);
        let on_complete = Arc::clone(&self.on_complete);
        let stopped = Arc::clone(&self.stopped);

        self.pool.spawn(move || {
            if stopped.load(Ordering::Acquire) {
                return;
            }
            // Skip decoding work that is already superseded.
            {
                let state = state.lock().expect("loader state poisoned");
                if state.latest.get(&key) != Some(&id) {
                    trace!(%key, id, "request superseded before decode");
                    return;
                }
            }

            let outcome = decode(&job);

            {
                let mut state = state.lock().expect("loader state poisoned");
                if state.latest.get(&key) != Some(&id) {
                    debug!(%key, id, "stale completion dropped");
                    return;
                }
                state.latest.remove(&key);
                state.pending.remove(&key);
            }

            on_complete(LoadResult {
                path: outcome.path,
                key,
                mode,
                target_w: job.target_w,
                target_h: job.target_h,
                buffer: outcome.buffer,
                error: outcome.error,
                request_id: id,
            });
        });

        id
    }

    /// Drop pending bookkeeping for a path; the eventual completion,
    /// if any, is discarded on arrival.
    pub fn ignore_path(&self, path: &Path) {
        let key = canonical_key(path);
        let mut state = self.state.lock().expect("loader state poisoned");
        state.latest.remove(&key);
        state.pending.remove(&key);
    }

    /// Reset all bookkeeping (folder switch). Every in-flight
    /// completion becomes stale.
    pub fn clear_pending(&self) {
        let mut state = self.state.lock().expect("loader state poisoned");
        state.latest.clear();
        state.pending.clear();
    }

    /// Number of in-flight requests (for tests and introspection).
    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("loader state poisoned").pending.len()
    }

    /// Stop accepting results; queued-but-unstarted work is skipped.
    /// Does not wait for in-flight decodes.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.clear_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decode::DecodeOutcome;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    /// Decode stub that signals when it starts and blocks until released.
    fn gated_decoder(
        started_tx: crossbeam_channel::Sender<u64>,
        release_rx: crossbeam_channel::Receiver<()>,
    ) -> DecodeFn {
        Arc::new(move |job: &DecodeJob| {
            let _ = started_tx.send(job.target_w.unwrap_or(0) as u64);
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            DecodeOutcome {
                path: job.path.clone(),
                buffer: Some(DecodedBuffer::Pixels {
                    rgba: vec![0; 4],
                    width: job.target_w.unwrap_or(1),
                    height: job.target_h.unwrap_or(1),
                }),
                error: None,
            }
        })
    }

    fn instant_decoder() -> DecodeFn {
        Arc::new(|job: &DecodeJob| DecodeOutcome {
            path: job.path.clone(),
            buffer: Some(DecodedBuffer::Pixels {
                rgba: vec![0; 4],
                width: job.target_w.unwrap_or(1),
                height: job.target_h.unwrap_or(1),
            }),
            error: None,
        })
    }

    fn collecting_callback() -> (LoadCallback, crossbeam_channel::Receiver<LoadResult>) {
        let (tx, rx) = unbounded();
        let callback: LoadCallback = Arc::new(move |result| {
            let _ = tx.send(result);
        });
        (callback, rx)
    }

    #[test]
    fn superseding_params_drops_the_older_completion() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let (callback, results) = collecting_callback();

        let loader = RequestLoader::new(
            2,
            gated_decoder(started_tx, release_rx),
            callback,
        )
        .unwrap();

        let path = Path::new("/photos/a.jpg");
        let id1 = loader.request_load(path, Some(100), Some(100), DecodeMode::Pixels);
        // Wait until the first decode is running, then supersede it.
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let id2 = loader.request_load(path, Some(200), Some(200), DecodeMode::Pixels);
        assert_ne!(id1, id2);

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();

        // Exactly one completion, reflecting the newer params.
        let result = results.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.request_id, id2);
        match result.buffer.unwrap() {
            DecodedBuffer::Pixels { width, .. } => assert_eq!(width, 200),
            _ => panic!("expected pixels"),
        }
        assert!(results.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn identical_pending_request_is_a_noop() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let (callback, results) = collecting_callback();

        let loader = RequestLoader::new(
            2,
            gated_decoder(started_tx, release_rx),
            callback,
        )
        .unwrap();

        let path = Path::new("/photos/a.jpg");
        let id1 = loader.request_load(path, Some(64), Some(64), DecodeMode::Pixels);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let id2 = loader.request_load(path, Some(64), Some(64), DecodeMode::Pixels);
        assert_eq!(id1, id2);

        release_tx.send(()).unwrap();
        let _ = results.recv_timeout(Duration::from_secs(5)).unwrap();

        // No second decode was started.
        assert!(started_rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(results.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn ignore_path_discards_the_completion() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let (callback, results) = collecting_callback();

        let loader = RequestLoader::new(
            2,
            gated_decoder(started_tx, release_rx),
            callback,
        )
        .unwrap();

        let path = Path::new("/photos/a.jpg");
        loader.request_load(path, Some(64), Some(64), DecodeMode::Pixels);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        loader.ignore_path(path);
        release_tx.send(()).unwrap();

        assert!(results.recv_timeout(Duration::from_millis(500)).is_err());
        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn clear_pending_resets_all_bookkeeping() {
        let (callback, _results) = collecting_callback();
        let loader = RequestLoader::new(2, instant_decoder(), callback).unwrap();

        loader.request_load(Path::new("/a.jpg"), None, None, DecodeMode::Pixels);
        loader.request_load(Path::new("/b.jpg"), None, None, DecodeMode::Pixels);
        loader.clear_pending();

        assert_eq!(loader.pending_count(), 0);
    }

    #[test]
    fn completions_carry_their_requested_target_params() {
        let (callback, results) = collecting_callback();
        let loader = RequestLoader::new(2, instant_decoder(), callback).unwrap();

        loader.request_load(Path::new("/a.jpg"), Some(10), Some(20), DecodeMode::Pixels);

        let result = results.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.target_w, Some(10));
        assert_eq!(result.target_h, Some(20));
    }

    #[test]
    fn different_paths_complete_independently() {
        let (callback, results) = collecting_callback();
        let loader = RequestLoader::new(2, instant_decoder(), callback).unwrap();

        loader.request_load(Path::new("/a.jpg"), Some(10), Some(10), DecodeMode::Pixels);
        loader.request_load(Path::new("/b.jpg"), Some(10), Some(10), DecodeMode::Pixels);

        let first = results.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = results.recv_timeout(Duration::from_secs(5)).unwrap();
        let mut keys = vec![first.key, second.key];
        keys.sort();
        assert!(keys[0].ends_with("a.jpg"));
        assert!(keys[1].ends_with("b.jpg"));
    }
}
