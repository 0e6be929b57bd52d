//! Authentication Models
//! Mission: Define user, token, and request/response shapes for the
//! identity core.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// User account. `password_hash` is the on-disk `salt$digest` string and is
/// never serialized back to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub roles: HashSet<String>,
    pub created_at: String,
    pub last_login_at: Option<String>,
    pub failed_attempts: u32,
}

pub const MAX_FAILED_ATTEMPTS: u32 = 5;

impl User {
    pub fn is_locked(&self) -> bool {
        self.failed_attempts >= MAX_FAILED_ATTEMPTS
    }

    pub fn has_any_role(&self, allowed: &HashSet<String>) -> bool {
        allowed.is_empty() || self.roles.iter().any(|r| allowed.contains(r))
    }
}

/// Header segment of a bearer token (constant in this implementation, but
/// carried as a real segment so the wire format matches the three-segment
/// contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "RGLNS".to_string(),
        }
    }
}

/// Payload segment carried inside a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Persisted refresh token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: String,
    pub revoked: bool,
    pub revoked_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        let mut roles: Vec<String> = user.roles.iter().cloned().collect();
        roles.sort();
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            roles,
            created_at: user.created_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(roles: &[&str], failed: u32) -> User {
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: None,
            password_hash: "salt$digest".to_string(),
            active: true,
            roles: roles.iter().map(|s| s.to_string()).collect(),
            created_at: "now".to_string(),
            last_login_at: None,
            failed_attempts: failed,
        }
    }

    #[test]
    fn locks_at_five_failed_attempts() {
        assert!(!user_with(&["user"], 4).is_locked());
        assert!(user_with(&["user"], 5).is_locked());
    }

    #[test]
    fn empty_allowed_roles_means_any_authenticated() {
        let user = user_with(&["user"], 0);
        assert!(user.has_any_role(&HashSet::new()));
    }

    #[test]
    fn role_intersection_required_when_roles_declared() {
        let user = user_with(&["user"], 0);
        let allowed: HashSet<String> = ["admin".to_string(), "compliance_officer".to_string()]
            .into_iter()
            .collect();
        assert!(!user.has_any_role(&allowed));
    }
}
