//! Thumbnail persistence: serialized operator, schema migrations and
//! the per-folder adapter.

pub mod adapter;
pub mod migrations;
pub mod operator;

pub use adapter::{Patch, ThumbDbAdapter, ThumbPatch, THUMB_DB_FILENAME};
pub use migrations::{apply_migrations, schema_version, LATEST_VERSION};
pub use operator::{DbFuture, DbOperator};

use serde::{Deserialize, Serialize};

/// One persisted thumbnail record.
///
/// `path` is the canonical key. `width`/`height` are the source image
/// dimensions (0 if unknown); `thumb_width`/`thumb_height` are the
/// target dimensions the blob was generated for, where (0, 0) means a
/// legacy/unconstrained row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbRow {
    pub path: String,
    pub thumbnail: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub mtime_ms: i64,
    pub size_bytes: u64,
    pub thumb_width: u32,
    pub thumb_height: u32,
    pub created_at: i64,
}

impl ThumbRow {
    /// Whether this row is still valid for the file version described
    /// by `(mtime_ms, size_bytes)` at the given target dimensions.
    pub fn is_valid_for(
        &self,
        mtime_ms: i64,
        size_bytes: u64,
        target_w: u32,
        target_h: u32,
    ) -> bool {
        if self.mtime_ms != mtime_ms || self.size_bytes != size_bytes {
            return false;
        }
        (self.thumb_width == 0 && self.thumb_height == 0)
            || (self.thumb_width == target_w && self.thumb_height == target_h)
    }

    /// Whether the row carries actual thumbnail bytes.
    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail.as_ref().is_some_and(|b| !b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ThumbRow {
        ThumbRow {
            path: "/photos/a.jpg".into(),
            thumbnail: Some(vec![1, 2, 3]),
            width: 800,
            height: 600,
            mtime_ms: 1_000,
            size_bytes: 2_048,
            thumb_width: 128,
            thumb_height: 128,
            created_at: 42,
        }
    }

    #[test]
    fn valid_when_stat_and_target_match() {
        assert!(row().is_valid_for(1_000, 2_048, 128, 128));
    }

    #[test]
    fn stale_stat_invalidates() {
        assert!(!row().is_valid_for(1_001, 2_048, 128, 128));
        assert!(!row().is_valid_for(1_000, 2_049, 128, 128));
    }

    #[test]
    fn differing_target_invalidates() {
        assert!(!row().is_valid_for(1_000, 2_048, 256, 256));
    }

    #[test]
    fn legacy_zero_dims_match_any_target() {
        let mut legacy = row();
        legacy.thumb_width = 0;
        legacy.thumb_height = 0;
        assert!(legacy.is_valid_for(1_000, 2_048, 256, 256));
        assert!(legacy.is_valid_for(1_000, 2_048, 64, 64));
    }

    #[test]
    fn empty_blob_is_not_a_thumbnail() {
        let mut r = row();
        assert!(r.has_thumbnail());
        r.thumbnail = Some(Vec::new());
        assert!(!r.has_thumbnail());
        r.thumbnail = None;
        assert!(!r.has_thumbnail());
    }
}
