//! Integration tests for the full engine.
//!
//! These tests verify end-to-end behavior including:
//! - Opening a large fresh folder: empty snapshot first, full snapshot
//!   and thumbnail generation asynchronously
//! - Persisted thumbnails being served from the database on a later run

use image_cache_engine::core::db::THUMB_DB_FILENAME;
use image_cache_engine::{EngineConfig, Event, EventChannel, ImageEngine};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

/// Create a minimal valid PNG image (1x1, white).
fn create_test_image(path: &std::path::Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG header
        0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44,
        0x41, 0x54, 0x08, 0xD7, 0x63, 0xF8, 0xFF, 0xFF, 0x3F, 0x00, 0x05, 0xFE, 0x02, 0xFE, 0xDC,
        0xCC, 0x59, 0xE7, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ])?;
    Ok(())
}

#[test]
fn fresh_folder_delivers_snapshot_then_all_thumbnails() {
    const FILE_COUNT: usize = 500;

    let temp_dir = TempDir::new().unwrap();
    for i in 0..FILE_COUNT {
        // Image content sniffing ignores the extension.
        create_test_image(&temp_dir.path().join(format!("photo_{i:03}.jpg"))).unwrap();
    }

    let (events, rx) = EventChannel::new();
    let engine = ImageEngine::new(EngineConfig::default(), events).unwrap();
    engine.open_folder(temp_dir.path());

    // The empty snapshot must arrive before any scan result.
    match rx.recv_timeout(Duration::from_secs(10)) {
        Some(Event::ExplorerEntriesChanged { entries, .. }) => assert!(entries.is_empty()),
        other => panic!("expected empty snapshot first, got {other:?}"),
    }

    let mut saw_full_snapshot = false;
    let mut generated = HashSet::new();
    while generated.len() < FILE_COUNT {
        match rx.recv_timeout(Duration::from_secs(60)) {
            Some(Event::FileListUpdated { files }) if files.len() == FILE_COUNT => {
                saw_full_snapshot = true;
            }
            Some(Event::ExplorerThumbGenerated { row }) => {
                assert!(row.has_thumbnail());
                generated.insert(row.path);
            }
            Some(Event::FolderError { message, .. }) => panic!("folder error: {message}"),
            Some(_) => {}
            None => panic!(
                "timed out with {}/{FILE_COUNT} thumbnails generated",
                generated.len()
            ),
        }
    }
    assert!(saw_full_snapshot);

    // The database landed next to the images.
    assert!(temp_dir.path().join(THUMB_DB_FILENAME).exists());

    engine.shutdown();
}

#[test]
fn persisted_thumbnails_are_served_on_the_next_run() {
    let temp_dir = TempDir::new().unwrap();
    for i in 0..5 {
        create_test_image(&temp_dir.path().join(format!("{i}.png"))).unwrap();
    }

    // First run generates and persists everything.
    {
        let (events, rx) = EventChannel::new();
        let engine = ImageEngine::new(EngineConfig::default(), events).unwrap();
        engine.open_folder(temp_dir.path());

        let mut generated = 0;
        while generated < 5 {
            match rx.recv_timeout(Duration::from_secs(60)) {
                Some(Event::ExplorerThumbGenerated { .. }) => generated += 1,
                Some(Event::FolderError { message, .. }) => panic!("folder error: {message}"),
                Some(_) => {}
                None => panic!("timed out during first run"),
            }
        }
        engine.shutdown();
    }

    // Second run preloads rows from the database instead of decoding.
    let (events, rx) = EventChannel::new();
    let engine = ImageEngine::new(EngineConfig::default(), events).unwrap();
    engine.open_folder(temp_dir.path());

    let mut cached = 0;
    while cached < 5 {
        match rx.recv_timeout(Duration::from_secs(60)) {
            Some(Event::ExplorerThumbRows { rows }) => {
                assert!(rows.iter().all(|r| r.has_thumbnail()));
                cached += rows.len();
            }
            Some(Event::ExplorerThumbGenerated { row }) => {
                panic!("unexpected regeneration for {}", row.path)
            }
            Some(Event::FolderError { message, .. }) => panic!("folder error: {message}"),
            Some(_) => {}
            None => panic!("timed out waiting for cached rows"),
        }
    }

    engine.shutdown();
}
