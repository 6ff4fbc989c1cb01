//! # Thumbnail DB Adapter
//!
//! Per-folder view over the thumbnail database. Every path is stored
//! under its canonical key; lookups fall back to the raw path string so
//! rows written by older tooling stay reachable. All access is funneled
//! through the folder's [`DbOperator`], which serializes it on one
//! worker thread.
//!
//! The documented blocking calls are `open` (schema init), `probe` and
//! `get_rows_for_paths`; everything else is fire-and-forget through a
//! [`DbFuture`].

use crate::core::db::migrations::apply_migrations;
use crate::core::db::operator::{DbFuture, DbOperator};
use crate::core::db::ThumbRow;
use crate::core::paths::canonical_key;
use crate::error::DbError;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Deterministic per-folder database file name. Excluded from folder
/// scans and watcher-triggered rescans.
pub const THUMB_DB_FILENAME: &str = ".icache_thumbs.db";

/// Stay under SQLite's default 999 bound-parameter limit.
const SQLITE_PARAM_LIMIT: usize = 900;

/// Tri-state column update: leave the stored value alone or overwrite it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }
}

/// Column-preserving update for one thumbnail row.
///
/// Only `Set` fields are written; `Keep` fields retain whatever the row
/// already holds. `thumbnail: Set(None)` clears just the blob. This is
/// what enables the two-phase "metadata now, bytes later" write pattern.
#[derive(Debug, Clone, Default)]
pub struct ThumbPatch {
    pub thumbnail: Patch<Option<Vec<u8>>>,
    pub width: Patch<u32>,
    pub height: Patch<u32>,
    pub thumb_width: Patch<u32>,
    pub thumb_height: Patch<u32>,
}

/// Per-folder thumbnail database handle.
pub struct ThumbDbAdapter {
    folder: PathBuf,
    operator: Arc<DbOperator>,
}

impl ThumbDbAdapter {
    /// Open (creating if needed) the thumbnail database for `folder`.
    ///
    /// Blocks until the schema is migrated. The second return value is
    /// true when the database file did not exist before this call.
    pub fn open(folder: impl Into<PathBuf>) -> Result<(Self, bool), DbError> {
        let folder = folder.into();
        let db_path = folder.join(THUMB_DB_FILENAME);
        let created = !db_path.exists();

        let operator = Arc::new(DbOperator::new(&db_path));
        operator.schedule_write(apply_migrations).wait()?;
        debug!(db = %db_path.display(), created, "thumbnail db ready");

        Ok((Self { folder, operator }, created))
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn db_path(&self) -> &Path {
        self.operator.db_path()
    }

    pub fn operator(&self) -> &Arc<DbOperator> {
        &self.operator
    }

    /// Insert or update the row for `path`, overwriting only the
    /// columns the patch sets. `mtime_ms` and `size_bytes` are always
    /// written; `created_at` is set on first insert only.
    pub fn upsert_meta(
        &self,
        path: &Path,
        mtime_ms: i64,
        size_bytes: u64,
        patch: ThumbPatch,
    ) -> DbFuture<()> {
        let key = canonical_key(path);
        let now_ms = chrono::Utc::now().timestamp_millis();

        self.operator.schedule_write(move |conn| {
            // One transaction: a partial row would read as legacy-valid
            // for any target and never be regenerated.
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO thumbnails (path, mtime, size, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path) DO UPDATE SET
                    mtime = excluded.mtime,
                    size = excluded.size",
                params![key, mtime_ms, size_bytes as i64, now_ms],
            )?;

            if let Patch::Set(blob) = &patch.thumbnail {
                tx.execute(
                    "UPDATE thumbnails SET thumbnail = ?1 WHERE path = ?2",
                    params![blob, key],
                )?;
            }
            if let Patch::Set(width) = &patch.width {
                tx.execute(
                    "UPDATE thumbnails SET width = ?1 WHERE path = ?2",
                    params![width, key],
                )?;
            }
            if let Patch::Set(height) = &patch.height {
                tx.execute(
                    "UPDATE thumbnails SET height = ?1 WHERE path = ?2",
                    params![height, key],
                )?;
            }
            if let Patch::Set(tw) = &patch.thumb_width {
                tx.execute(
                    "UPDATE thumbnails SET thumb_width = ?1 WHERE path = ?2",
                    params![tw, key],
                )?;
            }
            if let Patch::Set(th) = &patch.thumb_height {
                tx.execute(
                    "UPDATE thumbnails SET thumb_height = ?1 WHERE path = ?2",
                    params![th, key],
                )?;
            }
            tx.commit()
        })
    }

    /// Look up the row for `path`. Blocking.
    ///
    /// Falls back to the raw (non-canonical) path string when the
    /// canonical key misses.
    pub fn probe(&self, path: &Path) -> Result<Option<ThumbRow>, DbError> {
        let key = canonical_key(path);
        let raw = path.to_string_lossy().into_owned();

        self.operator
            .schedule_read(move |conn| {
                if let Some(row) = select_row(conn, &key)? {
                    return Ok(Some(row));
                }
                if raw != key {
                    return select_row(conn, &raw);
                }
                Ok(None)
            })
            .wait()
    }

    /// Fetch rows for a batch of paths in one pass. Blocking.
    ///
    /// Batches via a parameterized IN clause, re-chunking when the path
    /// count would exceed SQLite's bound-parameter limit.
    pub fn get_rows_for_paths(&self, paths: &[PathBuf]) -> Result<Vec<ThumbRow>, DbError> {
        let keys: Vec<String> = paths.iter().map(|p| canonical_key(p)).collect();
        let mut futures = Vec::new();

        for chunk in keys.chunks(SQLITE_PARAM_LIMIT) {
            let chunk: Vec<String> = chunk.to_vec();
            futures.push(self.operator.schedule_read(move |conn| {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT path, thumbnail, width, height, mtime, size,
                            thumb_width, thumb_height, created_at
                     FROM thumbnails WHERE path IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), row_from)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            }));
        }

        let mut out = Vec::new();
        for future in futures {
            out.extend(future.wait()?);
        }
        Ok(out)
    }

    /// Delete the row for `path` (source removed or renamed).
    pub fn delete_row(&self, path: &Path) -> DbFuture<usize> {
        let key = canonical_key(path);
        self.operator.schedule_write(move |conn| {
            conn.execute("DELETE FROM thumbnails WHERE path = ?1", [&key])
        })
    }

    /// Total persisted rows. Blocking; for tests and diagnostics.
    pub fn count_rows(&self) -> Result<i64, DbError> {
        self.operator
            .schedule_read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM thumbnails", [], |r| r.get(0))
            })
            .wait()
    }

    /// Stop the underlying operator.
    pub fn shutdown(&self, wait: bool) {
        self.operator.shutdown(wait);
    }
}

fn select_row(conn: &Connection, key: &str) -> rusqlite::Result<Option<ThumbRow>> {
    let full = conn
        .query_row(
            "SELECT path, thumbnail, width, height, mtime, size,
                    thumb_width, thumb_height, created_at
             FROM thumbnails WHERE path = ?1",
            [key],
            row_from,
        )
        .optional();

    match full {
        Ok(row) => Ok(row),
        // Pre-migration databases lack the thumb dimension columns;
        // read the reduced set until apply_migrations has run.
        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg))) if msg.contains("no such column") => {
            conn.query_row(
                "SELECT path, thumbnail, width, height, mtime, size, created_at
                 FROM thumbnails WHERE path = ?1",
                [key],
                |row| {
                    Ok(ThumbRow {
                        path: row.get(0)?,
                        thumbnail: row.get(1)?,
                        width: row.get(2)?,
                        height: row.get(3)?,
                        mtime_ms: row.get(4)?,
                        size_bytes: row.get::<_, i64>(5)? as u64,
                        thumb_width: 0,
                        thumb_height: 0,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
        }
        Err(e) => Err(e),
    }
}

fn row_from(row: &rusqlite::Row) -> rusqlite::Result<ThumbRow> {
    Ok(ThumbRow {
        path: row.get(0)?,
        thumbnail: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        mtime_ms: row.get(4)?,
        size_bytes: row.get::<_, i64>(5)? as u64,
        thumb_width: row.get(6)?,
        thumb_height: row.get(7)?,
        created_at: row.get(8)?,
    })
}
