//! SQLite handle shared by the repositories.
//!
//! One rusqlite Connection behind a Mutex. File databases run in WAL mode so
//! readers (listing files, streaming comments) are not blocked by uploads.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use scanshelf_core::error::ScanshelfError;

use crate::migrations;

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;
     PRAGMA cache_size = -16384;";

const MEMORY_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

/// Metadata store for accounts, sessions, uploads and comments.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`, creating parent
    /// directories, then apply pending migrations.
    pub fn new(path: &Path) -> Result<Self, ScanshelfError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            ScanshelfError::Storage(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let db = Self::prepare(conn, FILE_PRAGMAS)?;
        info!(path = %path.display(), "Metadata database ready");
        Ok(db)
    }

    /// Private in-memory database, used by tests.
    pub fn in_memory() -> Result<Self, ScanshelfError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScanshelfError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::prepare(conn, MEMORY_PRAGMAS)
    }

    fn prepare(conn: Connection, pragmas: &str) -> Result<Self, ScanshelfError> {
        conn.execute_batch(pragmas)
            .map_err(|e| ScanshelfError::Storage(format!("Failed to set pragmas: {}", e)))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` while holding the connection lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ScanshelfError>
    where
        F: FnOnce(&Connection) -> Result<T, ScanshelfError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ScanshelfError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(|e| ScanshelfError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count(&db, "uploads"), 0);
        assert_eq!(count(&db, "comments"), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(count(&db, "users"), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        drop(Database::new(&path).unwrap());
        let db = Database::new(&path).unwrap();
        assert_eq!(count(&db, "schema_migrations"), 1);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| ScanshelfError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();
    }
}
