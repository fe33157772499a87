//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use scanshelf_core::error::ScanshelfError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ScanshelfError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ScanshelfError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ScanshelfError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: users, sessions, uploads, comments.
///
/// Timestamps are Unix milliseconds so comment order survives bursts.
fn apply_v1(conn: &Connection) -> Result<(), ScanshelfError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY NOT NULL,
            email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash   TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token           TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions (user_id);

        CREATE TABLE IF NOT EXISTS uploads (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            name            TEXT NOT NULL,
            storage_key     TEXT NOT NULL UNIQUE,
            size_bytes      INTEGER NOT NULL CHECK (size_bytes >= 0),
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_uploads_user_created
            ON uploads (user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS comments (
            id              TEXT PRIMARY KEY NOT NULL,
            file_id         TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            user_email      TEXT NOT NULL,
            content         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES uploads(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_comments_file_created
            ON comments (file_id, created_at ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ScanshelfError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_user_email_unique_case_insensitive() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES ('a', 'A@x.io', 'h', 0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES ('b', 'a@X.io', 'h', 0)",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_comments_cascade_with_upload() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO uploads (id, user_id, name, storage_key, size_bytes, created_at)
             VALUES ('f', 'u', 'a.png', 'u/k.png', 3, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO comments (id, file_id, user_id, user_email, content, created_at)
             VALUES ('c', 'f', 'u', 'u@x.io', 'hi', 0)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM uploads WHERE id = 'f'", []).unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
