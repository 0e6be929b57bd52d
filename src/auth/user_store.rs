//! User Storage
//! Mission: persist and authenticate user accounts through the shared
//! connection pool, with login-lockout bookkeeping.

use crate::auth::models::{User, MAX_FAILED_ATTEMPTS};
use crate::auth::password;
use crate::db::ConnectionPool;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

pub struct UserStore {
    pool: ConnectionPool,
}

impl UserStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn row_to_user(
        id: String,
        username: String,
        email: Option<String>,
        password_hash: String,
        is_active: i64,
        roles_json: String,
        created_at: String,
        last_login_at: Option<String>,
        failed_attempts: i64,
    ) -> User {
        let roles: HashSet<String> =
            serde_json::from_str(&roles_json).unwrap_or_else(|_| HashSet::new());
        User {
            id,
            username,
            email,
            password_hash,
            active: is_active != 0,
            roles,
            created_at,
            last_login_at,
            failed_attempts: failed_attempts as u32,
        }
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.pool.lease()?;
        let user = conn
            .query_row(
                "SELECT user_id, username, email, password_hash, is_active, roles, created_at,
                        last_login_at, failed_login_attempts
                 FROM user_authentication WHERE username = ?1",
                params![username],
                |row| {
                    Ok(Self::row_to_user(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()
            .context("querying user by username")?;
        Ok(user)
    }

    pub fn get_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.pool.lease()?;
        let user = conn
            .query_row(
                "SELECT user_id, username, email, password_hash, is_active, roles, created_at,
                        last_login_at, failed_login_attempts
                 FROM user_authentication WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Self::row_to_user(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()
            .context("querying user by id")?;
        Ok(user)
    }

    pub fn create(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
        roles: &[&str],
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.map(|s| s.to_string()),
            password_hash: password::hash(password),
            active: true,
            roles: roles.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now().to_rfc3339(),
            last_login_at: None,
            failed_attempts: 0,
        };

        let roles_json = serde_json::to_string(&user.roles)?;
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO user_authentication
                (user_id, username, email, password_hash, is_active, roles, created_at,
                 last_login_at, failed_login_attempts)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, NULL, 0)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                roles_json,
                user.created_at,
            ],
        )
        .context("inserting new user")?;

        info!(username = %user.username, "created user");
        Ok(user)
    }

    /// Verify credentials, applying the lockout policy: on success the
    /// failure counter resets and `last_login_at` advances; on failure the
    /// counter increments. A user whose counter already meets the bound is
    /// rejected without even checking the password.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<AuthOutcome> {
        let Some(user) = self.get_by_username(username)? else {
            return Ok(AuthOutcome::NotFound);
        };

        if !user.active {
            return Ok(AuthOutcome::Inactive);
        }

        if user.is_locked() {
            return Ok(AuthOutcome::Locked);
        }

        if password::verify(password, &user.password_hash) {
            self.record_login_success(&user.id)?;
            let mut user = user;
            user.failed_attempts = 0;
            Ok(AuthOutcome::Success(user))
        } else {
            let attempts = self.record_login_failure(&user.id)?;
            if attempts >= MAX_FAILED_ATTEMPTS {
                warn!(username, "account locked after repeated failed logins");
                Ok(AuthOutcome::Locked)
            } else {
                Ok(AuthOutcome::WrongPassword)
            }
        }
    }

    fn record_login_success(&self, user_id: &str) -> Result<()> {
        let conn = self.pool.lease()?;
        conn.execute(
            "UPDATE user_authentication SET failed_login_attempts = 0, last_login_at = ?1
             WHERE user_id = ?2",
            params![Utc::now().to_rfc3339(), user_id],
        )?;
        Ok(())
    }

    fn record_login_failure(&self, user_id: &str) -> Result<u32> {
        let conn = self.pool.lease()?;
        conn.execute(
            "UPDATE user_authentication SET failed_login_attempts = failed_login_attempts + 1
             WHERE user_id = ?1",
            params![user_id],
        )?;
        let attempts: i64 = conn.query_row(
            "SELECT failed_login_attempts FROM user_authentication WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(attempts as u32)
    }

    /// Administrative reset of the lockout counter.
    pub fn reset_failed_attempts(&self, user_id: &str) -> Result<()> {
        let conn = self.pool.lease()?;
        conn.execute(
            "UPDATE user_authentication SET failed_login_attempts = 0 WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }
}

pub enum AuthOutcome {
    Success(User),
    WrongPassword,
    Locked,
    Inactive,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use std::time::Duration;

    fn test_store() -> UserStore {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        UserStore::new(pool)
    }

    #[test]
    fn create_and_authenticate_round_trip() {
        let store = test_store();
        store
            .create("alice", "secret", None, &["user"])
            .unwrap();

        match store.authenticate("alice", "secret").unwrap() {
            AuthOutcome::Success(user) => assert_eq!(user.username, "alice"),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn wrong_password_increments_failure_counter() {
        let store = test_store();
        store.create("bob", "secret", None, &["user"]).unwrap();

        for _ in 0..4 {
            match store.authenticate("bob", "wrong").unwrap() {
                AuthOutcome::WrongPassword => {}
                _ => panic!("expected wrong password"),
            }
        }

        match store.authenticate("bob", "wrong").unwrap() {
            AuthOutcome::Locked => {}
            _ => panic!("expected account to lock on the 5th failure"),
        }

        // Even the correct password is now rejected.
        match store.authenticate("bob", "secret").unwrap() {
            AuthOutcome::Locked => {}
            _ => panic!("expected locked account to reject valid credentials"),
        }
    }

    #[test]
    fn successful_login_resets_failure_counter() {
        let store = test_store();
        store.create("carol", "secret", None, &["user"]).unwrap();

        store.authenticate("carol", "wrong").unwrap();
        store.authenticate("carol", "wrong").unwrap();
        store.authenticate("carol", "secret").unwrap();

        let user = store.get_by_username("carol").unwrap().unwrap();
        assert_eq!(user.failed_attempts, 0);
    }
}
