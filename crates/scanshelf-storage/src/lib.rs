//! Scanshelf Storage crate - SQLite persistence, blobs, uploads, comments, auth.
//!
//! Provides a WAL-mode SQLite database with migrations, repositories for
//! users/sessions/uploads/comments, a filesystem blob store, the upload
//! orchestrator (with compensating blob cleanup), the comment stream and
//! the local authentication service.

pub mod auth;
pub mod blob;
pub mod comments;
pub mod db;
pub mod migrations;
pub mod repository;
pub mod upload;

pub use auth::{generate_token, AuthService, SIGN_IN_FAILED_MESSAGE};
pub use blob::{BlobStore, FilesystemBlobStore};
pub use comments::{CommentHub, CommentService, CommentSubscription, COMMENT_FAILED_MESSAGE};
pub use db::Database;
pub use repository::{CommentRepository, SessionRepository, UploadRepository, UserRepository};
pub use upload::{
    generate_storage_key, size_limit_message, validate_file, UploadCatalog, UploadOrchestrator,
    UPLOAD_FAILED_MESSAGE,
};
