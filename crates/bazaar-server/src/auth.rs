//! Bearer tokens for admins and users.
//!
//! Admin and user tokens are HS256 JWTs signed with two different secrets,
//! so a token of one kind never verifies as the other.

use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

pub use bazaar_core::password::{hash_password, verify_password};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Admin or user ID.
    pub sub: String,
    pub role: Role,
    /// Expiration (Unix timestamp seconds)
    pub exp: i64,
    /// Issued at (Unix timestamp seconds)
    pub iat: i64,
}

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Token issuing and verification settings shared by handlers and middleware.
#[derive(Clone)]
pub struct AuthState {
    admin: Arc<SigningKeys>,
    user: Arc<SigningKeys>,
    ttl_hours: i64,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("ttl_hours", &self.ttl_hours)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(admin_secret: &str, user_secret: &str, ttl_hours: u64) -> Self {
        Self {
            admin: Arc::new(SigningKeys::from_secret(admin_secret)),
            user: Arc::new(SigningKeys::from_secret(user_secret)),
            ttl_hours: i64::try_from(ttl_hours).unwrap_or(i64::MAX / 3600),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &bazaar_core::AppConfig) -> Self {
        Self::new(
            &config.admin_jwt_secret,
            &config.user_jwt_secret,
            config.jwt_ttl_hours,
        )
    }

    /// Token lifetime in seconds, reported to clients as `expires_in`.
    #[must_use]
    pub fn ttl_secs(&self) -> i64 {
        self.ttl_hours.saturating_mul(3600)
    }

    fn keys(&self, role: Role) -> &SigningKeys {
        match role {
            Role::Admin => &self.admin,
            Role::User => &self.user,
        }
    }

    /// Create a token for `subject_id` in `role`.
    ///
    /// # Errors
    ///
    /// Returns [`jsonwebtoken::errors::Error`] if signing fails.
    pub fn issue(&self, role: Role, subject_id: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: subject_id.to_string(),
            role,
            exp: (now + chrono::Duration::hours(self.ttl_hours)).timestamp(),
            iat: now.timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.keys(role).encoding)
    }

    /// Verify a token for `role` and return the subject ID.
    ///
    /// Returns `None` for bad signatures, expired tokens, a role mismatch or
    /// a non-numeric subject.
    #[must_use]
    pub fn verify(&self, role: Role, token: &str) -> Option<i64> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &self.keys(role).decoding,
            &Validation::default(),
        )
        .map_err(|e| {
            tracing::debug!("JWT validation failed: {e}");
        })
        .ok()?;

        if data.claims.role != role {
            tracing::debug!(expected = ?role, got = ?data.claims.role, "JWT role mismatch");
            return None;
        }
        data.claims.sub.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AuthState {
        AuthState::new("admin-secret", "user-secret", 1)
    }

    #[test]
    fn issued_token_verifies_for_same_role() {
        let auth = state();
        let token = auth.issue(Role::User, 42).expect("issue");
        assert_eq!(auth.verify(Role::User, &token), Some(42));
    }

    #[test]
    fn user_token_is_not_an_admin_token() {
        let auth = state();
        let token = auth.issue(Role::User, 42).expect("issue");
        assert_eq!(auth.verify(Role::Admin, &token), None);

        let admin = auth.issue(Role::Admin, 1).expect("issue");
        assert_eq!(auth.verify(Role::User, &admin), None);
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert_eq!(state().verify(Role::User, "not.a.jwt"), None);
    }

    #[test]
    fn ttl_is_reported_in_seconds() {
        assert_eq!(state().ttl_secs(), 3600);
    }
}
