//! Schema migrations for the thumbnail database.
//!
//! Migrations form an ordered map of integer versions to forward (and
//! backward) steps over `PRAGMA user_version`. Every step checks
//! table/column existence before altering, so re-running is safe.

use rusqlite::Connection;
use tracing::info;

/// Latest schema version.
pub const LATEST_VERSION: i64 = 2;

/// Bring the database to [`LATEST_VERSION`].
///
/// If the stored version is older, forward steps run in ascending
/// order; if newer (a downgrade), backward steps run in descending
/// order. Each step and its version bump commit in one transaction.
/// Idempotent: running on an up-to-date database changes nothing.
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let current = schema_version(conn)?;

    if current < LATEST_VERSION {
        for version in (current + 1)..=LATEST_VERSION {
            let tx = conn.unchecked_transaction()?;
            migrate_up(&tx, version)?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()?;
            info!(version, "applied forward migration");
        }
    } else if current > LATEST_VERSION {
        for version in ((LATEST_VERSION + 1)..=current).rev() {
            let tx = conn.unchecked_transaction()?;
            migrate_down(&tx, version)?;
            tx.pragma_update(None, "user_version", version - 1)?;
            tx.commit()?;
            info!(version, "applied backward migration");
        }
    }

    Ok(())
}

/// Current persisted schema version.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn migrate_up(conn: &Connection, version: i64) -> rusqlite::Result<()> {
    match version {
        1 => {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS thumbnails (
                    path TEXT PRIMARY KEY,
                    mtime INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    width INTEGER NOT NULL DEFAULT 0,
                    height INTEGER NOT NULL DEFAULT 0,
                    thumbnail BLOB,
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_thumbnails_mtime ON thumbnails(mtime)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_thumbnails_created_at ON thumbnails(created_at)",
                [],
            )?;
            Ok(())
        }
        2 => {
            // Target-dimension columns; legacy rows read as 0 meaning
            // "unconstrained".
            if !column_exists(conn, "thumbnails", "thumb_width")? {
                conn.execute(
                    "ALTER TABLE thumbnails ADD COLUMN thumb_width INTEGER NOT NULL DEFAULT 0",
                    [],
                )?;
            }
            if !column_exists(conn, "thumbnails", "thumb_height")? {
                conn.execute(
                    "ALTER TABLE thumbnails ADD COLUMN thumb_height INTEGER NOT NULL DEFAULT 0",
                    [],
                )?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn migrate_down(conn: &Connection, version: i64) -> rusqlite::Result<()> {
    match version {
        2 => {
            if column_exists(conn, "thumbnails", "thumb_width")? {
                conn.execute("ALTER TABLE thumbnails DROP COLUMN thumb_width", [])?;
            }
            if column_exists(conn, "thumbnails", "thumb_height")? {
                conn.execute("ALTER TABLE thumbnails DROP COLUMN thumb_height", [])?;
            }
            Ok(())
        }
        1 => {
            conn.execute("DROP INDEX IF EXISTS idx_thumbnails_created_at", [])?;
            conn.execute("DROP INDEX IF EXISTS idx_thumbnails_mtime", [])?;
            conn.execute("DROP TABLE IF EXISTS thumbnails", [])?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Whether `column` exists on `table`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `table` exists.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_migrates_to_latest() {
        let conn = open_memory();
        apply_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), LATEST_VERSION);
        assert!(table_exists(&conn, "thumbnails").unwrap());
        assert!(column_exists(&conn, "thumbnails", "thumb_width").unwrap());
        assert!(column_exists(&conn, "thumbnails", "thumb_height").unwrap());
    }

    #[test]
    fn apply_migrations_is_idempotent() {
        let conn = open_memory();
        apply_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO thumbnails (path, mtime, size, created_at) VALUES ('/a.jpg', 1, 2, 3)",
            [],
        )
        .unwrap();

        apply_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), LATEST_VERSION);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM thumbnails", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upgrades_a_version_one_database() {
        let conn = open_memory();

        // Simulate a database created before thumb dimension tracking.
        conn.execute(
            "CREATE TABLE thumbnails (
                path TEXT PRIMARY KEY,
                mtime INTEGER NOT NULL,
                size INTEGER NOT NULL,
                width INTEGER NOT NULL DEFAULT 0,
                height INTEGER NOT NULL DEFAULT 0,
                thumbnail BLOB,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO thumbnails (path, mtime, size, created_at) VALUES ('/a.jpg', 1, 2, 3)",
            [],
        )
        .unwrap();

        apply_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), LATEST_VERSION);
        // Legacy rows read their new columns as 0.
        let (tw, th): (i64, i64) = conn
            .query_row(
                "SELECT thumb_width, thumb_height FROM thumbnails WHERE path = '/a.jpg'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((tw, th), (0, 0));
    }

    #[test]
    fn downgrade_removes_thumb_dimension_columns() {
        let conn = open_memory();
        apply_migrations(&conn).unwrap();

        // Pretend a newer schema is running against this code.
        conn.pragma_update(None, "user_version", 2).unwrap();

        let tx = conn.unchecked_transaction().unwrap();
        migrate_down(&tx, 2).unwrap();
        tx.commit().unwrap();

        assert!(!column_exists(&conn, "thumbnails", "thumb_width").unwrap());
        assert!(!column_exists(&conn, "thumbnails", "thumb_height").unwrap());
    }
}
