//! # Image Engine Module
//!
//! The façade callers talk to. Owns the pixmap LRU cache, the metadata
//! cache, the decode loader and the converter, and drives the folder
//! lifecycle through [`EngineCoreHandle`]. All results are delivered as
//! [`Event`]s on the channel supplied at construction.

pub mod core;

pub use self::core::EngineCoreHandle;

use crate::core::cache::{FileInfo, MetadataCache, PixmapCache, PixmapCacheStats};
use crate::core::convert::{ConvertJob, Converted, Converter};
use crate::core::decode::{default_decoder, DecodeMode, DecodingStrategy};
use crate::core::loader::{LoadResult, RequestLoader};
use crate::core::paths::canonical_key;
use crate::error::Result;
use crate::events::{Event, EventChannel, EventSender, PresentImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Engine construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Pixmap LRU capacity.
    pub cache_capacity: usize,
    /// Decode worker threads for full-size requests.
    pub decode_threads: usize,
    /// Thumbnail target dimensions.
    pub thumb_w: u32,
    pub thumb_h: u32,
    /// Initial decoding strategy.
    pub strategy: DecodingStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            decode_threads: 4,
            thumb_w: 128,
            thumb_h: 128,
            strategy: DecodingStrategy::Fast {
                max_w: 1920,
                max_h: 1080,
            },
        }
    }
}

/// Asynchronous image decode and thumbnail caching engine.
///
/// Construct once per consumer with an event channel; every operation
/// is non-blocking and results arrive as events.
pub struct ImageEngine {
    events: EventSender,
    pixmaps: Arc<Mutex<PixmapCache>>,
    metadata: Arc<Mutex<MetadataCache>>,
    loader: RequestLoader,
    converter: Arc<Converter>,
    core: EngineCoreHandle,
    strategy: Mutex<DecodingStrategy>,
    open_folder_key: Mutex<Option<String>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ImageEngine {
    /// Build the engine and start its worker threads.
    pub fn new(config: EngineConfig, events: EventSender) -> Result<Self> {
        let pixmaps = Arc::new(Mutex::new(PixmapCache::new(config.cache_capacity)));
        let metadata = Arc::new(Mutex::new(MetadataCache::new()));

        // Conversion finalization: cache insert happens here, then the
        // ready event goes out. Failures leave the cache untouched.
        let finalize_pixmaps = Arc::clone(&pixmaps);
        let finalize_events = events.clone();
        let converter = Arc::new(Converter::spawn(Arc::new(move |converted: Converted| {
            finalize(&finalize_pixmaps, &finalize_events, converted);
        })));

        let convert = Arc::clone(&converter);
        let loader = RequestLoader::new(
            config.decode_threads,
            default_decoder(),
            Arc::new(move |result: LoadResult| {
                convert.submit(ConvertJob {
                    key: result.key,
                    path: result.path,
                    buffer: result.buffer,
                    error: result.error,
                });
            }),
        )?;

        // The core emits into an engine-internal channel; a forwarder
        // thread harvests metadata from thumbnail rows, then republishes
        // every event upstream.
        let (core_events, core_rx) = EventChannel::new();
        let core = EngineCoreHandle::spawn(core_events, config.thumb_w, config.thumb_h)?;

        let forward_metadata = Arc::clone(&metadata);
        let forward_events = events.clone();
        let forwarder = thread::Builder::new()
            .name("engine-events".into())
            .spawn(move || {
                while let Some(event) = core_rx.recv() {
                    harvest_metadata(&forward_metadata, &event);
                    forward_events.send(event);
                }
            })
            .ok();
        if forwarder.is_none() {
            warn!("failed to spawn event forwarder thread");
        }

        Ok(Self {
            events,
            pixmaps,
            metadata,
            loader,
            converter,
            core,
            strategy: Mutex::new(config.strategy),
            open_folder_key: Mutex::new(None),
            forwarder: Mutex::new(forwarder),
        })
    }

    /// Open `path` as the working folder.
    ///
    /// Reopening the folder that is already open is an idempotent
    /// refresh: caches survive and the core just rescans. A different
    /// folder clears the pixmap cache, pending loads and metadata,
    /// publishes an empty snapshot immediately, then scans
    /// asynchronously.
    pub fn open_folder(&self, path: &Path) {
        let key = canonical_key(path);

        if !path.is_dir() {
            self.events.send(Event::FolderError {
                folder: key,
                message: format!("not a directory: {}", path.display()),
            });
            return;
        }

        let mut open = self.open_folder_key.lock().expect("folder key poisoned");
        if open.as_deref() == Some(key.as_str()) {
            self.core.open_folder(path);
            return;
        }

        self.pixmaps.lock().expect("pixmap cache poisoned").clear();
        self.metadata.lock().expect("metadata cache poisoned").clear();
        self.loader.clear_pending();
        *open = Some(key.clone());
        drop(open);

        self.events.send(Event::ExplorerEntriesChanged {
            folder: key,
            entries: Vec::new(),
        });
        self.events.send(Event::FileListUpdated { files: Vec::new() });

        self.core.open_folder(path);
    }

    /// Request a decoded image for `path`.
    ///
    /// A cache hit emits the cached image immediately and refreshes its
    /// recency; a miss schedules a decode whose result arrives as an
    /// `ImageReady` event.
    pub fn request_decode(&self, path: &Path, target: Option<(u32, u32)>) {
        let key = canonical_key(path);

        let hit = {
            let mut cache = self.pixmaps.lock().expect("pixmap cache poisoned");
            if cache.touch(&key) {
                cache.get(&key).cloned()
            } else {
                None
            }
        };
        if let Some(image) = hit {
            self.events.send(Event::ImageReady {
                path: key,
                image: Some(image),
                error: None,
            });
            return;
        }

        let (w, h) = self.resolve_target(target);
        self.loader.request_load(path, w, h, DecodeMode::Pixels);
    }

    /// Pure cache read; does not affect recency.
    pub fn get_cached_pixmap(&self, path: &Path) -> Option<PresentImage> {
        let key = canonical_key(path);
        self.pixmaps
            .lock()
            .expect("pixmap cache poisoned")
            .get(&key)
            .cloned()
    }

    /// Best-effort warm-up for paths not already cached.
    pub fn prefetch(&self, paths: &[PathBuf], target: Option<(u32, u32)>) {
        let (w, h) = self.resolve_target(target);
        for path in paths {
            let key = canonical_key(path);
            let cached = self
                .pixmaps
                .lock()
                .expect("pixmap cache poisoned")
                .contains(&key);
            if !cached {
                self.loader.request_load(path, w, h, DecodeMode::Pixels);
            }
        }
    }

    /// Drop pending work for one path, or all pending work when `None`.
    pub fn cancel_pending(&self, path: Option<&Path>) {
        match path {
            Some(path) => self.loader.ignore_path(path),
            None => self.loader.clear_pending(),
        }
    }

    pub fn remove_from_cache(&self, path: &Path) {
        let key = canonical_key(path);
        self.pixmaps
            .lock()
            .expect("pixmap cache poisoned")
            .remove(&key);
    }

    pub fn clear_cache(&self) {
        self.pixmaps.lock().expect("pixmap cache poisoned").clear();
    }

    /// Swap fast/full decoding without a restart. Affects subsequent
    /// requests only.
    pub fn set_decoding_strategy(&self, strategy: DecodingStrategy) {
        *self.strategy.lock().expect("strategy poisoned") = strategy;
    }

    pub fn set_thumbnail_size(&self, w: u32, h: u32) {
        self.core.set_thumbnail_size(w, h);
    }

    /// Ask the core to generate (or confirm) a thumbnail for `path`.
    pub fn request_thumbnail(&self, path: &Path) {
        self.core.request_thumbnail(path);
    }

    /// Metadata from the in-memory cache only; never triggers I/O.
    pub fn get_file_info(&self, path: &Path) -> Option<FileInfo> {
        let key = canonical_key(path);
        self.metadata
            .lock()
            .expect("metadata cache poisoned")
            .get(&key)
    }

    /// Source resolution, if the metadata cache knows it.
    pub fn get_resolution(&self, path: &Path) -> Option<(u32, u32)> {
        let key = canonical_key(path);
        self.metadata
            .lock()
            .expect("metadata cache poisoned")
            .resolution(&key)
    }

    pub fn cache_stats(&self) -> PixmapCacheStats {
        self.pixmaps.lock().expect("pixmap cache poisoned").stats()
    }

    /// Stop every worker. Idempotent.
    pub fn shutdown(&self) {
        self.loader.shutdown();
        self.core.shutdown();
        self.converter.shutdown();
        if let Ok(mut guard) = self.forwarder.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!("event forwarder thread panicked on shutdown");
                }
            }
        }
    }

    fn resolve_target(&self, target: Option<(u32, u32)>) -> (Option<u32>, Option<u32>) {
        match target {
            Some((w, h)) => (Some(w), Some(h)),
            None => self
                .strategy
                .lock()
                .expect("strategy poisoned")
                .target_size(),
        }
    }
}

impl Drop for ImageEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn finalize(pixmaps: &Mutex<PixmapCache>, events: &EventSender, converted: Converted) {
    if let Some(error) = converted.error {
        events.send(Event::ImageReady {
            path: converted.key,
            image: None,
            error: Some(error),
        });
        return;
    }

    if let Ok(mut cache) = pixmaps.lock() {
        cache.insert(converted.key.clone(), converted.image.clone());
    }
    events.send(Event::ImageReady {
        path: converted.key,
        image: Some(converted.image),
        error: None,
    });
}

fn harvest_metadata(metadata: &Mutex<MetadataCache>, event: &Event) {
    let Ok(mut metadata) = metadata.lock() else {
        return;
    };
    match event {
        Event::ExplorerThumbRows { rows } => {
            for row in rows {
                metadata.insert(
                    row.path.clone(),
                    FileInfo {
                        width: row.width,
                        height: row.height,
                        size_bytes: row.size_bytes,
                        mtime_ms: row.mtime_ms,
                    },
                );
            }
        }
        Event::ExplorerThumbGenerated { row } => {
            metadata.insert(
                row.path.clone(),
                FileInfo {
                    width: row.width,
                    height: row.height,
                    size_bytes: row.size_bytes,
                    mtime_ms: row.mtime_ms,
                },
            );
        }
        _ => {}
    }
}
