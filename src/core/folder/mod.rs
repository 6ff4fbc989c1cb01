//! # Folder Module
//!
//! Single-level folder scanning and change detection. Produces ordered
//! snapshots of a folder's entries and a directory signature used to
//! tell real changes from the engine's own thumbnail database writes.

use crate::core::db::THUMB_DB_FILENAME;
use crate::core::paths::canonical_key;
use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// File extensions treated as decodable images.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff",
];

/// One entry of a folder snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Canonical key for the file.
    pub path: String,
    pub name: String,
    /// Lower-cased extension without the dot, empty if none.
    pub suffix: String,
    pub size_bytes: u64,
    pub mtime_ms: i64,
    pub is_image: bool,
}

/// Whether `path` has a decodable image extension.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

fn is_db_sidecar(name: &str) -> bool {
    // The database file plus its WAL/SHM companions.
    name.starts_with(THUMB_DB_FILENAME)
}

fn mtime_ms(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// File size and mtime for staleness checks.
pub fn stat_file(path: &Path) -> Option<(u64, i64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), mtime_ms(&meta)))
}

/// Scan `folder` one level deep, name-ordered, excluding the thumbnail
/// database and its sidecars.
pub fn scan_folder(folder: &Path) -> Result<Vec<FileEntry>, ScanError> {
    if !folder.exists() {
        return Err(ScanError::DirectoryNotFound {
            path: folder.to_path_buf(),
        });
    }
    if !folder.is_dir() {
        return Err(ScanError::NotADirectory {
            path: folder.to_path_buf(),
        });
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| ScanError::ReadDirectory {
            path: folder.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_db_sidecar(&name) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let suffix = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        entries.push(FileEntry {
            path: canonical_key(entry.path()),
            is_image: is_image_path(entry.path()),
            suffix,
            size_bytes: meta.len(),
            mtime_ms: mtime_ms(&meta),
            name,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Canonical keys of the image files in a snapshot, in snapshot order.
pub fn image_files(entries: &[FileEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.is_image)
        .map(|e| e.path.clone())
        .collect()
}

/// Directory signature: sorted (name, size, mtime) tuples, excluding
/// the thumbnail database file. Two scans with equal signatures are
/// treated as unchanged. An approximation: coincidentally identical
/// tuple sets across two real changes are not distinguished.
pub fn dir_signature(folder: &Path) -> Vec<(String, u64, i64)> {
    let mut sig = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_db_sidecar(&name) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            sig.push((name, meta.len(), mtime_ms(&meta)));
        }
    }
    sig.sort();
    sig
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_orders_by_name_and_excludes_the_db_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.jpg"), b"bb").unwrap();
        fs::write(dir.path().join("a.png"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        fs::write(dir.path().join(THUMB_DB_FILENAME), b"db").unwrap();
        fs::write(dir.path().join(format!("{THUMB_DB_FILENAME}-wal")), b"w").unwrap();

        let entries = scan_folder(dir.path()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "notes.txt"]);

        assert!(entries[0].is_image);
        assert!(entries[1].is_image);
        assert!(!entries[2].is_image);
        assert_eq!(entries[2].suffix, "txt");
    }

    #[test]
    fn scan_is_single_level() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("top.jpg"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("nested.jpg"), b"y").unwrap();

        let entries = scan_folder(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "top.jpg");
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(matches!(
            scan_folder(&gone),
            Err(ScanError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn file_path_is_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            scan_folder(&file),
            Err(ScanError::NotADirectory { .. })
        ));
    }

    #[test]
    fn signature_ignores_db_writes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();

        let before = dir_signature(dir.path());
        fs::write(dir.path().join(THUMB_DB_FILENAME), b"db grew").unwrap();
        let after = dir_signature(dir.path());
        assert_eq!(before, after);

        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        let changed = dir_signature(dir.path());
        assert_ne!(after, changed);
    }

    #[test]
    fn image_extension_check_is_case_insensitive() {
        assert!(is_image_path(Path::new("/x/A.JPG")));
        assert!(is_image_path(Path::new("/x/a.WebP")));
        assert!(!is_image_path(Path::new("/x/a.txt")));
        assert!(!is_image_path(Path::new("/x/noext")));
    }
}
