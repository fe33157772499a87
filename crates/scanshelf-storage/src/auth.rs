//! Local accounts and bearer-token sessions.
//!
//! Passwords are stored as Argon2id PHC strings with a random 16-byte salt.
//! A signed-in user holds a random 32-character hex token; every request
//! resolves it back into an explicit [`Session`].

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use rand::Rng;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::events::{is_auth_event, DomainEvent, EventBus};
use scanshelf_core::types::{Session, User};

use crate::db::Database;
use crate::repository::{SessionRepository, UserRepository};

/// Message shown for any failed sign-in.
pub const SIGN_IN_FAILED_MESSAGE: &str = "Failed to sign in. Please check your credentials.";

const MIN_PASSWORD_LEN: usize = 6;

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

fn encode_password(password: &str) -> Result<String, ScanshelfError> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ScanshelfError::Storage(format!("Password salt: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ScanshelfError::Storage(format!("Password hash: {}", e)))?;
    Ok(hash.to_string())
}

/// Argon2 compares the digests in constant time.
fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Sign-up, sign-in and session resolution.
pub struct AuthService {
    users: UserRepository,
    sessions: SessionRepository,
    events: EventBus,
}

impl AuthService {
    pub fn new(db: Arc<Database>, events: EventBus) -> Self {
        Self {
            users: UserRepository::new(db.clone()),
            sessions: SessionRepository::new(db),
            events,
        }
    }

    /// Create an account. The caller still has to sign in.
    pub fn sign_up(&self, email: &str, password: &str) -> Result<User, ScanshelfError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ScanshelfError::Validation(
                "Please enter a valid email address".into(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ScanshelfError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let user = self.users.create(email, &encode_password(password)?)?;
        info!(user_id = %user.id, "User signed up");
        self.events.publish(DomainEvent::SignedUp {
            user_id: user.id,
            timestamp: user.created_at,
        });
        Ok(user)
    }

    /// Check credentials and open a session.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<Session, ScanshelfError> {
        let credentials = self.users.find_by_email(email.trim())?;
        let user = match credentials {
            Some(c) if verify_password(password, &c.password_hash) => c.user,
            _ => {
                warn!("Sign-in rejected");
                return Err(ScanshelfError::Unauthorized(SIGN_IN_FAILED_MESSAGE.into()));
            }
        };

        let session = Session {
            token: generate_token(),
            user,
            created_at: Utc::now(),
        };
        self.sessions
            .create(&session.token, session.user.id, session.created_at)?;

        info!(user_id = %session.user.id, "User signed in");
        self.events.publish(DomainEvent::SignedIn {
            user_id: session.user.id,
            timestamp: session.created_at,
        });
        Ok(session)
    }

    /// End the session behind `token`. Unknown tokens are ignored.
    pub fn sign_out(&self, token: &str) -> Result<(), ScanshelfError> {
        let user = self.sessions.find_user(token)?;
        if !self.sessions.delete(token)? {
            return Ok(());
        }
        if let Some((user, _)) = user {
            info!(user_id = %user.id, "User signed out");
            self.events.publish(DomainEvent::SignedOut {
                user_id: user.id,
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Resolve `token` into its session.
    pub fn current_user(&self, token: &str) -> Result<Session, ScanshelfError> {
        match self.sessions.find_user(token)? {
            Some((user, created_at)) => Ok(Session {
                token: token.to_string(),
                user,
                created_at,
            }),
            None => Err(ScanshelfError::Unauthorized("Invalid or expired session".into())),
        }
    }

    /// Live sign-up, sign-in and sign-out events.
    pub fn subscribe(&self) -> impl Stream<Item = DomainEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| item.ok().filter(is_auth_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(Arc::new(Database::in_memory().unwrap()), EventBus::default())
    }

    #[test]
    fn test_token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_password_hash_is_salted() {
        let a = encode_password("hunter22").unwrap();
        let b = encode_password("hunter22").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(!a.contains("hunter22"));
        assert!(verify_password("hunter22", &a));
        assert!(!verify_password("hunter23", &a));
        assert!(!verify_password("hunter22", "no-separator"));
    }

    #[test]
    fn test_legacy_sha256_hash_is_rejected() {
        // Old `salt$hex` rows no longer verify, even with the right password.
        let salt = generate_token();
        let legacy = format!("{}${}", salt, "0".repeat(64));
        assert!(!verify_password("hunter22", &legacy));
    }

    #[test]
    fn test_sign_up_validation() {
        let auth = service();
        assert!(matches!(
            auth.sign_up("not-an-email", "secret1"),
            Err(ScanshelfError::Validation(_))
        ));
        assert!(matches!(
            auth.sign_up("a@b.c", "12345"),
            Err(ScanshelfError::Validation(_))
        ));
        auth.sign_up("a@b.c", "123456").unwrap();
        assert!(matches!(
            auth.sign_up("A@B.C", "123456"),
            Err(ScanshelfError::Conflict(_))
        ));
    }

    #[test]
    fn test_sign_in_and_resolve_session() {
        let auth = service();
        let user = auth.sign_up("carol@example.com", "correct horse").unwrap();

        let session = auth.sign_in("carol@example.com", "correct horse").unwrap();
        assert_eq!(session.user.id, user.id);

        let resolved = auth.current_user(&session.token).unwrap();
        assert_eq!(resolved.user.email, "carol@example.com");

        auth.sign_out(&session.token).unwrap();
        assert!(matches!(
            auth.current_user(&session.token),
            Err(ScanshelfError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_wrong_password_uses_fixed_message() {
        let auth = service();
        auth.sign_up("dave@example.com", "password1").unwrap();
        for (email, password) in [("dave@example.com", "password2"), ("nobody@example.com", "x")] {
            let err = auth.sign_in(email, password).unwrap_err();
            assert_eq!(err.to_string(), format!("Unauthorized: {}", SIGN_IN_FAILED_MESSAGE));
        }
    }

    #[tokio::test]
    async fn test_subscribe_only_sees_auth_events() {
        let auth = service();
        let stream = auth.subscribe();
        tokio::pin!(stream);

        auth.events.publish(DomainEvent::FileDeleted {
            file_id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
        });
        let user = auth.sign_up("erin@example.com", "sesame12").unwrap();
        auth.sign_in("erin@example.com", "sesame12").unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(first.event_type(), "signed_up");
        assert_eq!(first.user_id(), user.id);
        assert_eq!(stream.next().await.unwrap().event_type(), "signed_in");
    }
}
