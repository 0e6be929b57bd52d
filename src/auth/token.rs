//! Token Service
//! Mission: sign/verify bearer tokens; issue, rotate, and revoke refresh
//! tokens; extract caller identity from request headers.
//!
//! Bearer tokens are three dot-separated, base64url-encoded segments:
//! `header.payload.signature`, where `signature = HMAC-SHA256(header ||
//! "." || payload, secret)`. This is a hand-rolled format (not JWT) because
//! the design calls for this exact on-wire shape.

use crate::auth::models::Claims;
use crate::db::ConnectionPool;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"RGLNS"}"#;
const REFRESH_TOKEN_DAYS: i64 = 30;
const DEFAULT_ACCESS_TTL_HOURS: i64 = 24;

#[derive(Debug, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    Revoked,
    UnknownUser,
    Storage(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "malformed token"),
            TokenError::BadSignature => write!(f, "bad signature"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Revoked => write!(f, "token revoked"),
            TokenError::UnknownUser => write!(f, "unknown user"),
            TokenError::Storage(msg) => write!(f, "storage failure: {msg}"),
        }
    }
}

impl std::error::Error for TokenError {}

pub struct TokenService {
    secret: Vec<u8>,
    pool: ConnectionPool,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, pool: ConnectionPool) -> Self {
        Self {
            secret: secret.into().into_bytes(),
            pool,
        }
    }

    /// Issue an access token. Default ttl is 24 hours per the design.
    pub fn issue_access(
        &self,
        user_id: &str,
        username: &str,
        roles: &[String],
        ttl_hours: Option<i64>,
    ) -> String {
        let ttl_hours = ttl_hours.unwrap_or(DEFAULT_ACCESS_TTL_HOURS);
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            roles: roles.to_vec(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(ttl_hours)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        self.encode(&claims)
    }

    fn encode<T: Serialize>(&self, payload: &T) -> String {
        let header_b64 = URL_SAFE_NO_PAD.encode(HEADER_JSON);
        let payload_json = serde_json::to_vec(payload).expect("claims always serialize");
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature = self.sign(signing_input.as_bytes());
        format!("{signing_input}.{signature}")
    }

    fn sign(&self, data: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(data);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Decode and validate an access token's signature and expiry, without
    /// consulting the store (access tokens are not persisted).
    pub fn decode_access(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err(TokenError::Malformed),
            };

        let signing_input = format!("{header_b64}.{payload_b64}");
        let expected_signature = self.sign(signing_input.as_bytes());
        if !constant_time_eq(expected_signature.as_bytes(), signature.as_bytes()) {
            return Err(TokenError::BadSignature);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Read `Authorization: Bearer <token>` out of request headers and
    /// resolve it to a caller id. Header lookup is case-insensitive.
    pub fn identify(&self, headers: &HashMap<String, String>) -> Option<String> {
        self.identify_claims(headers).map(|c| c.sub)
    }

    /// Same as `identify` but returns the full claim set (used by the
    /// registry for role enforcement, which needs more than the subject).
    pub fn identify_claims(&self, headers: &HashMap<String, String>) -> Option<Claims> {
        let auth = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .map(|(_, v)| v.as_str())?;
        let token = auth.strip_prefix("Bearer ")?;
        self.decode_access(token).ok()
    }

    /// Issue a fresh refresh token (64 hex chars, 30-day lifetime) and
    /// persist it.
    pub fn issue_refresh(&self, user_id: &str) -> Result<String, TokenError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let now = Utc::now();
        let expires_at = now + Duration::days(REFRESH_TOKEN_DAYS);

        let conn = self
            .pool
            .lease()
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO user_refresh_tokens (refresh_token, user_id, expires_at, is_revoked, revoked_at, created_at)
             VALUES (?1, ?2, ?3, 0, NULL, ?4)",
            params![token, user_id, expires_at.to_rfc3339(), now.to_rfc3339()],
        )
        .map_err(|e| TokenError::Storage(e.to_string()))?;

        Ok(token)
    }

    /// Validate a refresh token against the store: present, not revoked,
    /// not expired.
    pub fn verify_refresh(&self, token: &str) -> Result<String, TokenError> {
        let conn = self
            .pool
            .lease()
            .map_err(|e| TokenError::Storage(e.to_string()))?;

        let row: Option<(String, String, bool)> = conn
            .query_row(
                "SELECT user_id, expires_at, is_revoked FROM user_refresh_tokens WHERE refresh_token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0)),
            )
            .optional()
            .map_err(|e| TokenError::Storage(e.to_string()))?;

        let (user_id, expires_at, revoked) = row.ok_or(TokenError::UnknownUser)?;
        if revoked {
            return Err(TokenError::Revoked);
        }

        let expires_at = chrono::DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|_| TokenError::Storage("corrupt expires_at".to_string()))?;
        if Utc::now() >= expires_at {
            return Err(TokenError::Expired);
        }

        Ok(user_id)
    }

    pub fn revoke_refresh(&self, token: &str) -> Result<(), TokenError> {
        let conn = self
            .pool
            .lease()
            .map_err(|e| TokenError::Storage(e.to_string()))?;
        let updated = conn
            .execute(
                "UPDATE user_refresh_tokens SET is_revoked = 1, revoked_at = ?1
                 WHERE refresh_token = ?2 AND is_revoked = 0",
                params![Utc::now().to_rfc3339(), token],
            )
            .map_err(|e| TokenError::Storage(e.to_string()))?;

        if updated == 0 {
            return Err(TokenError::UnknownUser);
        }
        Ok(())
    }

    /// Revoke `old_refresh` and issue a new access/refresh pair, preserving
    /// `(userId, username, roles)` lineage. Linearizable against the store:
    /// once this returns, a subsequent `verify_refresh(old_refresh)` fails.
    pub fn rotate(
        &self,
        old_refresh: &str,
        username: &str,
        roles: &[String],
    ) -> Result<(String, String, i64), TokenError> {
        let user_id = self.verify_refresh(old_refresh)?;
        self.revoke_refresh(old_refresh)?;

        let new_refresh = self.issue_refresh(&user_id)?;
        let new_access = self.issue_access(&user_id, username, roles, None);
        Ok((new_access, new_refresh, DEFAULT_ACCESS_TTL_HOURS * 3600))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionPool, PoolConfig};
    use std::time::Duration as StdDuration;

    fn test_service() -> TokenService {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: StdDuration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        TokenService::new("test-secret", pool)
    }

    #[test]
    fn access_token_round_trips() {
        let svc = test_service();
        let token = svc.issue_access("u1", "alice", &["user".to_string()], None);
        let claims = svc.decode_access(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let svc = test_service();
        let token = svc.issue_access("u1", "alice", &["user".to_string()], None);
        let mut tampered = token.clone();
        tampered.push('x');
        assert_eq!(svc.decode_access(&tampered), Err(TokenError::BadSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = test_service();
        let token = svc.issue_access("u1", "alice", &["user".to_string()], Some(-1));
        assert_eq!(svc.decode_access(&token), Err(TokenError::Expired));
    }

    #[test]
    fn identify_extracts_subject_from_headers() {
        let svc = test_service();
        let token = svc.issue_access("u1", "alice", &["user".to_string()], None);
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        assert_eq!(svc.identify(&headers), Some("u1".to_string()));
    }

    #[test]
    fn rotate_revokes_old_and_issues_lineage_preserving_pair() {
        let svc = test_service();
        let refresh = svc.issue_refresh("u1").unwrap();

        let (access, new_refresh, expires_in) = svc
            .rotate(&refresh, "alice", &["user".to_string()])
            .unwrap();
        assert_eq!(expires_in, 24 * 3600);

        let claims = svc.decode_access(&access).unwrap();
        assert_eq!(claims.username, "alice");

        // Old refresh token is now revoked.
        assert_eq!(svc.verify_refresh(&refresh), Err(TokenError::Revoked));
        // The new one validates.
        assert_eq!(svc.verify_refresh(&new_refresh).unwrap(), "u1");
    }
}
