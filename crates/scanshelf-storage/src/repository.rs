//! Repository implementations for SQLite-backed persistence.
//!
//! Provides UserRepository, SessionRepository, UploadRepository and
//! CommentRepository that operate on the Database struct using raw SQL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::types::{Comment, NewUpload, UploadRecord, User};

use crate::db::Database;
use crate::upload::UploadCatalog;

fn storage_err(e: rusqlite::Error) -> ScanshelfError {
    ScanshelfError::Storage(e.to_string())
}

fn parse_uuid(raw: &str) -> Result<Uuid, ScanshelfError> {
    Uuid::parse_str(raw).map_err(|e| ScanshelfError::Storage(format!("Invalid UUID: {}", e)))
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

// =============================================================================
// Users
// =============================================================================

/// A user row including the stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// Repository for accounts.
pub struct UserRepository {
    db: Arc<Database>,
}

impl UserRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new user. A duplicate email yields `Conflict`.
    pub fn create(&self, email: &str, password_hash: &str) -> Result<User, ScanshelfError> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    user.id.to_string(),
                    user.email,
                    password_hash,
                    user.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    ScanshelfError::Conflict("An account with this email already exists".into())
                }
                other => ScanshelfError::Storage(format!("Failed to create user: {}", other)),
            })?;
            Ok(())
        })?;
        Ok(user)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<UserCredentials>, ScanshelfError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
                    rusqlite::params![email],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage_err)?;

            match row {
                Some((id, email, password_hash, created_at)) => Ok(Some(UserCredentials {
                    user: User {
                        id: parse_uuid(&id)?,
                        email,
                        created_at: from_millis(created_at),
                    },
                    password_hash,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn count(&self) -> Result<u64, ScanshelfError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Repository for bearer-token sessions.
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        token: &str,
        user_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<(), ScanshelfError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![token, user_id.to_string(), created_at.timestamp_millis()],
            )
            .map_err(|e| ScanshelfError::Storage(format!("Failed to create session: {}", e)))?;
            Ok(())
        })
    }

    /// Resolve a token to its user and session start.
    pub fn find_user(
        &self,
        token: &str,
    ) -> Result<Option<(User, DateTime<Utc>)>, ScanshelfError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.email, u.created_at, s.created_at
                     FROM sessions s JOIN users u ON u.id = s.user_id
                     WHERE s.token = ?1",
                    rusqlite::params![token],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage_err)?;

            match row {
                Some((id, email, user_created, session_created)) => Ok(Some((
                    User {
                        id: parse_uuid(&id)?,
                        email,
                        created_at: from_millis(user_created),
                    },
                    from_millis(session_created),
                ))),
                None => Ok(None),
            }
        })
    }

    /// Delete a session. Returns whether it existed.
    pub fn delete(&self, token: &str) -> Result<bool, ScanshelfError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute("DELETE FROM sessions WHERE token = ?1", rusqlite::params![token])
                .map_err(|e| ScanshelfError::Storage(format!("Failed to delete session: {}", e)))?;
            Ok(affected > 0)
        })
    }
}

// =============================================================================
// Uploads
// =============================================================================

/// Repository for upload metadata rows.
pub struct UploadRepository {
    db: Arc<Database>,
}

impl UploadRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn count(&self) -> Result<u64, ScanshelfError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM uploads", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

fn row_to_upload(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, String, i64, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build_upload(
    (id, user_id, name, storage_key, size_bytes, created_at): (String, String, String, String, i64, i64),
) -> Result<UploadRecord, ScanshelfError> {
    Ok(UploadRecord {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        name,
        storage_key,
        size_bytes: size_bytes.max(0) as u64,
        created_at: from_millis(created_at),
    })
}

impl UploadCatalog for UploadRepository {
    fn insert(&self, upload: &NewUpload) -> Result<UploadRecord, ScanshelfError> {
        let record = UploadRecord {
            id: Uuid::new_v4(),
            user_id: upload.user_id,
            name: upload.name.clone(),
            storage_key: upload.storage_key.clone(),
            size_bytes: upload.size_bytes,
            created_at: Utc::now(),
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO uploads (id, user_id, name, storage_key, size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.id.to_string(),
                    record.user_id.to_string(),
                    record.name,
                    record.storage_key,
                    record.size_bytes as i64,
                    record.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| ScanshelfError::Storage(format!("Failed to save upload: {}", e)))?;
            Ok(())
        })?;
        Ok(record)
    }

    fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, ScanshelfError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, name, storage_key, size_bytes, created_at
                     FROM uploads WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    row_to_upload,
                )
                .optional()
                .map_err(storage_err)?;
            row.map(build_upload).transpose()
        })
    }

    fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UploadRecord>, ScanshelfError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, name, storage_key, size_bytes, created_at
                     FROM uploads WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![user_id.to_string()], row_to_upload)
                .map_err(storage_err)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(build_upload(row.map_err(storage_err)?)?);
            }
            Ok(records)
        })
    }

    fn delete(&self, id: Uuid) -> Result<bool, ScanshelfError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM uploads WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(|e| ScanshelfError::Storage(format!("Failed to delete upload: {}", e)))?;
            Ok(affected > 0)
        })
    }
}

// =============================================================================
// Comments
// =============================================================================

/// Repository for file comments. Append-only.
pub struct CommentRepository {
    db: Arc<Database>,
}

impl CommentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, comment: &Comment) -> Result<(), ScanshelfError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, file_id, user_id, user_email, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    comment.id.to_string(),
                    comment.file_id.to_string(),
                    comment.user_id.to_string(),
                    comment.user_email,
                    comment.content,
                    comment.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| ScanshelfError::Storage(format!("Failed to save comment: {}", e)))?;
            Ok(())
        })
    }

    /// Comments on a file, oldest first. Same-millisecond comments keep insert order.
    pub fn list_for_file(&self, file_id: Uuid) -> Result<Vec<Comment>, ScanshelfError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, file_id, user_id, user_email, content, created_at
                     FROM comments WHERE file_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(storage_err)?;

            let rows = stmt
                .query_map(rusqlite::params![file_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(storage_err)?;

            let mut comments = Vec::new();
            for row in rows {
                let (id, file_id, user_id, user_email, content, created_at) =
                    row.map_err(storage_err)?;
                comments.push(Comment {
                    id: parse_uuid(&id)?,
                    file_id: parse_uuid(&file_id)?,
                    user_id: parse_uuid(&user_id)?,
                    user_email,
                    content,
                    created_at: from_millis(created_at),
                });
            }
            Ok(comments)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    fn new_upload(user_id: Uuid, name: &str) -> NewUpload {
        NewUpload {
            user_id,
            name: name.to_string(),
            storage_key: format!("{}/{}", user_id, Uuid::new_v4()),
            size_bytes: 42,
        }
    }

    #[test]
    fn test_user_create_and_find() {
        let repo = UserRepository::new(setup());
        let user = repo.create("ada@example.com", "salt$hash").unwrap();

        let found = repo.find_by_email("ADA@example.com").unwrap().unwrap();
        assert_eq!(found.user.id, user.id);
        assert_eq!(found.password_hash, "salt$hash");
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_user_duplicate_email_conflict() {
        let repo = UserRepository::new(setup());
        repo.create("ada@example.com", "h").unwrap();
        let err = repo.create("ada@example.com", "h").unwrap_err();
        assert!(matches!(err, ScanshelfError::Conflict(_)));
    }

    #[test]
    fn test_session_lifecycle() {
        let db = setup();
        let users = UserRepository::new(db.clone());
        let sessions = SessionRepository::new(db);
        let user = users.create("bob@example.com", "h").unwrap();

        sessions.create("tok", user.id, Utc::now()).unwrap();
        let (found, _) = sessions.find_user("tok").unwrap().unwrap();
        assert_eq!(found.email, "bob@example.com");

        assert!(sessions.delete("tok").unwrap());
        assert!(!sessions.delete("tok").unwrap());
        assert!(sessions.find_user("tok").unwrap().is_none());
    }

    #[test]
    fn test_upload_insert_get_delete() {
        let repo = UploadRepository::new(setup());
        let user_id = Uuid::new_v4();
        let record = repo.insert(&new_upload(user_id, "scan.png")).unwrap();

        let fetched = repo.get(record.id).unwrap().unwrap();
        assert_eq!(fetched.name, "scan.png");
        assert_eq!(fetched.size_bytes, 42);
        assert_eq!(fetched.user_id, user_id);

        assert!(repo.delete(record.id).unwrap());
        assert!(repo.get(record.id).unwrap().is_none());
        assert!(!repo.delete(record.id).unwrap());
    }

    #[test]
    fn test_upload_list_newest_first_and_scoped_to_user() {
        let repo = UploadRepository::new(setup());
        let user_id = Uuid::new_v4();
        let first = repo.insert(&new_upload(user_id, "first.txt")).unwrap();
        let second = repo.insert(&new_upload(user_id, "second.txt")).unwrap();
        repo.insert(&new_upload(Uuid::new_v4(), "other.txt")).unwrap();

        let listed = repo.list_for_user(user_id).unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn test_comments_ordered_by_creation() {
        let db = setup();
        let uploads = UploadRepository::new(db.clone());
        let comments = CommentRepository::new(db);
        let file = uploads.insert(&new_upload(Uuid::new_v4(), "a.png")).unwrap();

        let now = Utc::now();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            comments
                .insert(&Comment {
                    id: Uuid::new_v4(),
                    file_id: file.id,
                    user_id: Uuid::new_v4(),
                    user_email: "x@y.z".into(),
                    content: text.to_string(),
                    // Same timestamp for the last two: insert order breaks the tie.
                    created_at: now + chrono::Duration::milliseconds(i.min(1) as i64),
                })
                .unwrap();
        }

        let listed: Vec<String> = comments
            .list_for_file(file.id)
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(listed, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_comment_requires_existing_file() {
        let comments = CommentRepository::new(setup());
        let result = comments.insert(&Comment {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            user_email: "x@y.z".into(),
            content: "orphan".into(),
            created_at: Utc::now(),
        });
        assert!(matches!(result, Err(ScanshelfError::Storage(_))));
    }
}
