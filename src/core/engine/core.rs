//! # Engine Core Module
//!
//! Folder lifecycle state machine living entirely on its own thread:
//! Idle -> Scanning -> Watching. Owns the filesystem watcher, the
//! per-folder thumbnail database adapter and the missing-thumbnail
//! queue. Everything it emits crosses the thread boundary as events
//! carrying only primitive and byte payloads.

use crate::core::db::{Patch, ThumbDbAdapter, ThumbPatch, ThumbRow};
use crate::core::decode::{default_decoder, DecodeMode, DecodedBuffer};
use crate::core::folder::{dir_signature, image_files, scan_folder, stat_file, FileEntry};
use crate::core::loader::{LoadResult, RequestLoader};
use crate::core::paths::canonical_key;
use crate::core::preload::{PreloadConfig, PreloadSignal, PreloadWorker};
use crate::error::{EngineError, WatchError};
use crate::events::{Event, EventSender};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Quiet period after a watcher event before rescanning.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Missing-thumbnail drain tick.
const DRAIN_TICK: Duration = Duration::from_millis(25);

/// Thumbnail requests issued per drain tick.
const DRAIN_BATCH: usize = 8;

/// Window during which watcher events are attributed to our own
/// database writes and ignored.
const SUPPRESS_WINDOW: Duration = Duration::from_millis(500);

/// Decode threads dedicated to thumbnail generation.
const THUMB_DECODE_THREADS: usize = 2;

enum CoreCommand {
    OpenFolder(PathBuf),
    RequestThumbnail(PathBuf),
    SetThumbnailSize(u32, u32),
    Shutdown,
}

enum InternalMsg {
    FsChanged,
    ThumbDecoded(LoadResult),
    Preload(PreloadSignal),
}

/// Handle to the core thread. Cheap to use from any thread; commands
/// are fire-and-forget.
pub struct EngineCoreHandle {
    tx: Sender<CoreCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EngineCoreHandle {
    /// Spawn the core thread with the given thumbnail target size.
    pub fn spawn(events: EventSender, thumb_w: u32, thumb_h: u32) -> Result<Self, EngineError> {
        let (tx, cmd_rx) = unbounded();
        let (internal_tx, internal_rx) = unbounded();

        let loader_tx = internal_tx.clone();
        let thumb_loader = RequestLoader::new(
            THUMB_DECODE_THREADS,
            default_decoder(),
            Arc::new(move |result| {
                let _ = loader_tx.send(InternalMsg::ThumbDecoded(result));
            }),
        )?;

        let handle = thread::Builder::new()
            .name("engine-core".into())
            .spawn(move || {
                let core = EngineCore {
                    events,
                    internal_tx,
                    thumb_loader,
                    watcher: None,
                    folder: None,
                    folder_key: None,
                    adapter: None,
                    signature: Vec::new(),
                    pending: HashSet::new(),
                    done: HashMap::new(),
                    queue: VecDeque::new(),
                    queued: HashSet::new(),
                    preload: None,
                    generation: 0,
                    thumb_w,
                    thumb_h,
                    suppress_until: Instant::now(),
                    debounce_deadline: None,
                };
                run(core, cmd_rx, internal_rx);
            })
            .map_err(|e| EngineError::Pool(format!("failed to spawn core thread: {e}")))?;

        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn open_folder(&self, path: impl Into<PathBuf>) {
        let _ = self.tx.send(CoreCommand::OpenFolder(path.into()));
    }

    pub fn request_thumbnail(&self, path: impl Into<PathBuf>) {
        let _ = self.tx.send(CoreCommand::RequestThumbnail(path.into()));
    }

    pub fn set_thumbnail_size(&self, w: u32, h: u32) {
        let _ = self.tx.send(CoreCommand::SetThumbnailSize(w, h));
    }

    /// Stop the core thread and wait for it to finish.
    pub fn shutdown(&self) {
        let _ = self.tx.send(CoreCommand::Shutdown);
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!("engine core thread panicked on shutdown");
                }
            }
        }
    }
}

impl Drop for EngineCoreHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Thumbnail state already persisted for a file version.
#[derive(Debug, Clone, Copy)]
struct DoneRecord {
    mtime_ms: i64,
    size_bytes: u64,
    thumb_w: u32,
    thumb_h: u32,
}

struct EngineCore {
    events: EventSender,
    internal_tx: Sender<InternalMsg>,
    thumb_loader: RequestLoader,
    watcher: Option<RecommendedWatcher>,
    folder: Option<PathBuf>,
    folder_key: Option<String>,
    adapter: Option<Arc<ThumbDbAdapter>>,
    signature: Vec<(String, u64, i64)>,
    /// Keys with a thumbnail decode in flight.
    pending: HashSet<String>,
    /// Keys whose persisted thumbnail matches a known file version.
    done: HashMap<String, DoneRecord>,
    /// Deduplicated FIFO of files awaiting a thumbnail request.
    queue: VecDeque<PathBuf>,
    queued: HashSet<String>,
    preload: Option<PreloadWorker>,
    generation: u64,
    thumb_w: u32,
    thumb_h: u32,
    suppress_until: Instant,
    debounce_deadline: Option<Instant>,
}

fn run(mut core: EngineCore, cmd_rx: Receiver<CoreCommand>, internal_rx: Receiver<InternalMsg>) {
    let ticker = tick(DRAIN_TICK);
    loop {
        select! {
            recv(cmd_rx) -> msg => match msg {
                Ok(CoreCommand::OpenFolder(path)) => core.open_folder(&path),
                Ok(CoreCommand::RequestThumbnail(path)) => core.request_thumbnail(&path),
                Ok(CoreCommand::SetThumbnailSize(w, h)) => {
                    core.thumb_w = w;
                    core.thumb_h = h;
                }
                Ok(CoreCommand::Shutdown) | Err(_) => break,
            },
            recv(internal_rx) -> msg => match msg {
                Ok(msg) => core.handle_internal(msg),
                Err(_) => break,
            },
            recv(ticker) -> _ => core.on_tick(),
        }
    }
    core.teardown();
}

impl EngineCore {
    fn open_folder(&mut self, path: &Path) {
        let key = canonical_key(path);
        let same = self.folder_key.as_deref() == Some(key.as_str());

        let entries = match scan_folder(path) {
            Ok(entries) => entries,
            Err(e) => {
                self.events.send(Event::FolderError {
                    folder: key,
                    message: e.to_string(),
                });
                return;
            }
        };

        let mut created = false;
        if !same {
            self.reset_folder_state();

            match ThumbDbAdapter::open(path) {
                Ok((adapter, was_created)) => {
                    created = was_created;
                    self.adapter = Some(Arc::new(adapter));
                }
                Err(e) => {
                    self.events.send(Event::FolderError {
                        folder: key,
                        message: e.to_string(),
                    });
                    return;
                }
            }

            match build_watcher(self.internal_tx.clone(), path) {
                Ok(watcher) => self.watcher = Some(watcher),
                Err(e) => warn!("folder watch unavailable: {e}"),
            }

            self.folder = Some(path.to_path_buf());
            self.folder_key = Some(key.clone());
            info!(folder = %key, created, "folder opened");
        } else {
            debug!(folder = %key, "same folder reopened, keeping thumbnail state");
        }

        self.signature = dir_signature(path);
        self.publish_snapshot(&key, &entries);

        let images: Vec<PathBuf> = entries
            .iter()
            .filter(|e| e.is_image)
            .map(|e| PathBuf::from(&e.path))
            .collect();

        if created {
            // Fresh database: a preload pass would find nothing, so
            // request generation for every image file right away.
            for path in images {
                self.enqueue_missing(path);
            }
        } else if let Some(adapter) = self.adapter.clone() {
            self.generation += 1;
            let preload_tx = self.internal_tx.clone();
            self.preload = Some(PreloadWorker::spawn(
                self.generation,
                images,
                adapter,
                PreloadConfig::new(self.thumb_w, self.thumb_h),
                Arc::new(move |signal| {
                    let _ = preload_tx.send(InternalMsg::Preload(signal));
                }),
            ));
        }
    }

    fn reset_folder_state(&mut self) {
        if let Some(preload) = self.preload.take() {
            preload.cancel();
        }
        if let Some(adapter) = self.adapter.take() {
            adapter.shutdown(false);
        }
        self.watcher = None;
        self.pending.clear();
        self.done.clear();
        self.queue.clear();
        self.queued.clear();
        self.signature.clear();
        self.debounce_deadline = None;
        self.thumb_loader.clear_pending();
    }

    fn publish_snapshot(&self, folder_key: &str, entries: &[FileEntry]) {
        let files = image_files(entries);
        self.events.send(Event::ExplorerEntriesChanged {
            folder: folder_key.to_string(),
            entries: entries.to_vec(),
        });
        self.events.send(Event::FileListUpdated { files });
    }

    fn handle_internal(&mut self, msg: InternalMsg) {
        match msg {
            InternalMsg::FsChanged => {
                if Instant::now() < self.suppress_until {
                    debug!("watcher event during suppression window ignored");
                    return;
                }
                self.debounce_deadline = Some(Instant::now() + DEBOUNCE);
            }
            InternalMsg::ThumbDecoded(result) => self.on_thumb_decoded(result),
            InternalMsg::Preload(signal) => self.on_preload(signal),
        }
    }

    fn on_tick(&mut self) {
        if let Some(deadline) = self.debounce_deadline {
            if Instant::now() >= deadline {
                self.debounce_deadline = None;
                self.rescan_after_change();
            }
        }

        for _ in 0..DRAIN_BATCH {
            let Some(path) = self.queue.pop_front() else { break };
            self.queued.remove(&canonical_key(&path));
            self.request_thumbnail(&path);
        }
    }

    fn rescan_after_change(&mut self) {
        let Some(folder) = self.folder.clone() else { return };
        let Some(folder_key) = self.folder_key.clone() else { return };

        let signature = dir_signature(&folder);
        if signature == self.signature {
            debug!("directory signature unchanged, rescan skipped");
            return;
        }
        self.signature = signature;

        let entries = match scan_folder(&folder) {
            Ok(entries) => entries,
            Err(e) => {
                self.events.send(Event::FolderError {
                    folder: folder_key,
                    message: e.to_string(),
                });
                return;
            }
        };

        let files = image_files(&entries);
        self.drop_removed_rows(&files);

        self.events.send(Event::FolderChanged {
            folder: folder_key.clone(),
            files: files.clone(),
        });
        self.publish_snapshot(&folder_key, &entries);

        for key in files {
            self.enqueue_missing(PathBuf::from(key));
        }
    }

    /// Delete persisted rows for files no longer present.
    fn drop_removed_rows(&mut self, current_files: &[String]) {
        let current: HashSet<&str> = current_files.iter().map(String::as_str).collect();
        let gone: Vec<String> = self
            .done
            .keys()
            .filter(|k| !current.contains(k.as_str()))
            .cloned()
            .collect();
        if gone.is_empty() {
            return;
        }

        if let Some(adapter) = self.adapter.clone() {
            self.arm_suppression();
            for key in &gone {
                drop(adapter.delete_row(Path::new(key)));
            }
        }
        for key in gone {
            self.done.remove(&key);
            self.pending.remove(&key);
        }
    }

    fn enqueue_missing(&mut self, path: PathBuf) {
        let key = canonical_key(&path);
        if self.queued.insert(key) {
            self.queue.push_back(path);
        }
    }

    fn request_thumbnail(&mut self, path: &Path) {
        let key = canonical_key(path);
        if self.pending.contains(&key) {
            return;
        }
        let Some((size, mtime)) = stat_file(path) else {
            return;
        };
        if let Some(done) = self.done.get(&key) {
            if done.mtime_ms == mtime
                && done.size_bytes == size
                && done.thumb_w == self.thumb_w
                && done.thumb_h == self.thumb_h
            {
                return;
            }
        }

        self.pending.insert(key);
        self.thumb_loader.request_load(
            path,
            Some(self.thumb_w),
            Some(self.thumb_h),
            DecodeMode::ThumbnailBytes,
        );
    }

    fn on_thumb_decoded(&mut self, result: LoadResult) {
        self.pending.remove(&result.key);

        let Some(DecodedBuffer::Encoded { bytes, width, height }) = result.buffer else {
            if let Some(error) = result.error {
                warn!(key = %result.key, "thumbnail decode failed: {error}");
            }
            return;
        };
        let Some((size, mtime)) = stat_file(&result.path) else {
            return;
        };
        let Some(adapter) = self.adapter.clone() else {
            return;
        };

        // Stamp the dims this decode was requested with, not the
        // current target; a completion racing a size change would
        // otherwise record dims it was never rendered at.
        let thumb_w = result.target_w.unwrap_or(self.thumb_w);
        let thumb_h = result.target_h.unwrap_or(self.thumb_h);

        self.arm_suppression();
        // Fire-and-forget; the operator serializes and retries.
        drop(adapter.upsert_meta(
            &result.path,
            mtime,
            size,
            ThumbPatch {
                thumbnail: Patch::Set(Some(bytes.clone())),
                width: Patch::Set(width),
                height: Patch::Set(height),
                thumb_width: Patch::Set(thumb_w),
                thumb_height: Patch::Set(thumb_h),
            },
        ));

        self.done.insert(
            result.key.clone(),
            DoneRecord {
                mtime_ms: mtime,
                size_bytes: size,
                thumb_w,
                thumb_h,
            },
        );

        self.events.send(Event::ExplorerThumbGenerated {
            row: ThumbRow {
                path: result.key,
                thumbnail: Some(bytes),
                width,
                height,
                mtime_ms: mtime,
                size_bytes: size,
                thumb_width: thumb_w,
                thumb_height: thumb_h,
                created_at: chrono::Utc::now().timestamp_millis(),
            },
        });
    }

    fn on_preload(&mut self, signal: PreloadSignal) {
        match signal {
            PreloadSignal::CachedChunk { generation, rows } if generation == self.generation => {
                for row in &rows {
                    self.done.insert(
                        row.path.clone(),
                        DoneRecord {
                            mtime_ms: row.mtime_ms,
                            size_bytes: row.size_bytes,
                            // Legacy rows with (0, 0) count as matching
                            // the current target.
                            thumb_w: if row.thumb_width == 0 {
                                self.thumb_w
                            } else {
                                row.thumb_width
                            },
                            thumb_h: if row.thumb_height == 0 {
                                self.thumb_h
                            } else {
                                row.thumb_height
                            },
                        },
                    );
                }
                self.events.send(Event::ExplorerThumbRows { rows });
            }
            PreloadSignal::Progress {
                generation,
                processed,
                total,
            } if generation == self.generation => {
                self.events.send(Event::PreloadProgress { processed, total });
            }
            PreloadSignal::Finished {
                generation,
                missing,
                cancelled,
            } if generation == self.generation => {
                debug!(generation, missing = missing.len(), cancelled, "preload done");
                for key in missing {
                    self.enqueue_missing(PathBuf::from(key));
                }
                self.preload = None;
            }
            _ => debug!("signal from superseded preload generation ignored"),
        }
    }

    fn arm_suppression(&mut self) {
        self.suppress_until = Instant::now() + SUPPRESS_WINDOW;
    }

    fn teardown(&mut self) {
        if let Some(preload) = self.preload.take() {
            preload.cancel();
        }
        self.thumb_loader.shutdown();
        self.watcher = None;
        if let Some(adapter) = self.adapter.take() {
            adapter.shutdown(true);
        }
    }
}

fn build_watcher(
    tx: Sender<InternalMsg>,
    folder: &Path,
) -> Result<RecommendedWatcher, WatchError> {
    let mut watcher = notify::recommended_watcher(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                ) {
                    let _ = tx.send(InternalMsg::FsChanged);
                }
            }
        },
    )
    .map_err(|e| WatchError::InitFailed(e.to_string()))?;

    watcher
        .watch(folder, RecursiveMode::NonRecursive)
        .map_err(|e| WatchError::WatchFailed {
            path: folder.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(watcher)
}
