//! Event type definitions emitted by the engine.
//!
//! Every payload is restricted to primitives and byte buffers so events
//! can cross thread (and process) boundaries without dragging along
//! GUI-only resources. Paths are canonical keys (absolute, `/`-separated,
//! upper-cased drive prefix).

use crate::core::db::ThumbRow;
use crate::core::folder::FileEntry;
use serde::{Deserialize, Serialize};

/// A decoded, display-ready image.
///
/// Plain RGBA bytes; any GUI-specific texture or pixmap materialization
/// happens in the consumer, on the consumer's thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA pixel data (row-major, 4 bytes per pixel).
    pub rgba: Vec<u8>,
}

impl PresentImage {
    /// The empty placeholder emitted on conversion failure.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            rgba: Vec::new(),
        }
    }

    /// Whether this is the empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.rgba.is_empty()
    }

    /// Byte size of the pixel data.
    pub fn byte_size(&self) -> usize {
        self.rgba.len()
    }
}

/// All events emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A decode request finished (successfully or not).
    ImageReady {
        path: String,
        image: Option<PresentImage>,
        error: Option<String>,
    },
    /// The ordered list of decodable images in the open folder changed.
    FileListUpdated { files: Vec<String> },
    /// The watched folder's contents changed on disk.
    FolderChanged { folder: String, files: Vec<String> },
    /// Full directory entries for the open folder.
    ExplorerEntriesChanged {
        folder: String,
        entries: Vec<FileEntry>,
    },
    /// A chunk of cached thumbnail rows streamed back from the database.
    ExplorerThumbRows { rows: Vec<ThumbRow> },
    /// A single thumbnail was freshly generated and persisted.
    ExplorerThumbGenerated { row: ThumbRow },
    /// Preload scan progress, per chunk.
    PreloadProgress { processed: usize, total: usize },
    /// A non-fatal folder-level failure (folder removed, scan error, ...).
    FolderError { folder: String, message: String },
}
