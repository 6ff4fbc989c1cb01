//! # Core Module
//!
//! The GUI-agnostic caching and decoding engine.
//!
//! ## Modules
//! - `paths` - Canonical path keys shared by caches and the database
//! - `decode` - Image decoding, resizing and thumbnail encoding
//! - `loader` - Staleness-aware decode scheduling on a worker pool
//! - `convert` - Pixel-to-presentation conversion on its own thread
//! - `cache` - In-memory pixmap LRU and metadata caches
//! - `db` - Serialized SQLite operator, migrations and the adapter
//! - `folder` - Folder scanning and change signatures
//! - `preload` - Cancellable folder/DB preload passes
//! - `engine` - The engine façade and its core thread

pub mod cache;
pub mod convert;
pub mod db;
pub mod decode;
pub mod engine;
pub mod folder;
pub mod loader;
pub mod paths;
pub mod preload;

// Re-export commonly used types
pub use cache::{FileInfo, MetadataCache, PixmapCache, PixmapCacheStats};
pub use db::{DbOperator, ThumbDbAdapter, ThumbRow};
pub use decode::{DecodeMode, DecodingStrategy};
pub use engine::{EngineConfig, EngineCoreHandle, ImageEngine};
pub use folder::FileEntry;
pub use loader::RequestLoader;
