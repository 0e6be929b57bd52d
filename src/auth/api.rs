//! Authentication API Handlers
//! Mission: login, refresh, logout, and `me` as registry-shaped handlers.

use crate::auth::models::{
    LoginRequest, LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse, UserResponse,
};
use crate::auth::token::TokenService;
use crate::auth::user_store::{AuthOutcome, UserStore};
use crate::registry::{HandlerError, Request, Response};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthHandlers {
    pub user_store: Arc<UserStore>,
    pub token_service: Arc<TokenService>,
}

impl AuthHandlers {
    pub fn new(user_store: Arc<UserStore>, token_service: Arc<TokenService>) -> Self {
        Self {
            user_store,
            token_service,
        }
    }

    pub async fn login(&self, req: Request) -> Result<Response, HandlerError> {
        let body: LoginRequest = req.body_json()?;

        let outcome = self
            .user_store
            .authenticate(&body.username, &body.password)
            .map_err(|e| HandlerError::db_failure(e.to_string()))?;

        let user = match outcome {
            AuthOutcome::Success(user) => user,
            AuthOutcome::Locked => {
                warn!(username = %body.username, "login rejected: account locked");
                return Err(HandlerError::new(401, "account locked").with_code("locked"));
            }
            AuthOutcome::Inactive | AuthOutcome::NotFound | AuthOutcome::WrongPassword => {
                return Err(HandlerError::new(401, "invalid username or password"));
            }
        };

        let mut roles: Vec<String> = user.roles.iter().cloned().collect();
        roles.sort();

        let access_token = self
            .token_service
            .issue_access(&user.id, &user.username, &roles, None);
        let refresh_token = self
            .token_service
            .issue_refresh(&user.id)
            .map_err(|e| HandlerError::internal(e.to_string()))?;

        info!(username = %user.username, "login successful");

        Ok(Response::json(
            200,
            &LoginResponse {
                access_token,
                refresh_token,
                expires_in: 86_400,
                user: UserResponse::from_user(&user),
            },
        ))
    }

    pub async fn refresh(&self, req: Request) -> Result<Response, HandlerError> {
        let body: RefreshRequest = req.body_json()?;

        let user_id = self
            .token_service
            .verify_refresh(&body.refresh_token)
            .map_err(|_| {
                HandlerError::new(401, "invalid or expired refresh token")
            })?;

        let user = self
            .user_store
            .get_by_id(&user_id)
            .map_err(|e| HandlerError::db_failure(e.to_string()))?
            .ok_or_else(|| HandlerError::new(401, "invalid or expired refresh token"))?;

        let mut roles: Vec<String> = user.roles.iter().cloned().collect();
        roles.sort();

        let (access_token, refresh_token, expires_in) = self
            .token_service
            .rotate(&body.refresh_token, &user.username, &roles)
            .map_err(|_| HandlerError::new(401, "invalid or expired refresh token"))?;

        Ok(Response::json(
            200,
            &RefreshResponse {
                access_token,
                refresh_token,
                expires_in,
            },
        ))
    }

    pub async fn logout(&self, req: Request) -> Result<Response, HandlerError> {
        let body: LogoutRequest = req.body_json().unwrap_or(LogoutRequest {
            refresh_token: None,
        });

        if let Some(token) = body.refresh_token {
            let _ = self.token_service.revoke_refresh(&token);
        }

        Ok(Response::json(200, &serde_json::json!({ "ok": true })))
    }

    pub async fn me(&self, req: Request) -> Result<Response, HandlerError> {
        let caller_id = req
            .caller_id
            .ok_or_else(|| HandlerError::new(401, "authentication required"))?;

        let user = self
            .user_store
            .get_by_id(&caller_id)
            .map_err(|e| HandlerError::db_failure(e.to_string()))?
            .ok_or_else(|| HandlerError::not_found("user not found"))?;

        Ok(Response::json(200, &UserResponse::from_user(&user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionPool, PoolConfig};
    use crate::registry::HttpMethod;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_handlers() -> AuthHandlers {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();

        let user_store = Arc::new(UserStore::new(pool.clone()));
        user_store
            .create("alice", "secret", None, &["user"])
            .unwrap();

        let token_service = Arc::new(TokenService::new("test-secret", pool));
        AuthHandlers::new(user_store, token_service)
    }

    fn empty_request(body: Vec<u8>) -> Request {
        Request {
            method: HttpMethod::Post,
            path: "/api/auth/login".to_string(),
            query: HashMap::new(),
            params: HashMap::new(),
            headers: HashMap::new(),
            body,
            caller_id: None,
        }
    }

    #[tokio::test]
    async fn login_then_refresh_then_logout() {
        let handlers = test_handlers();

        let login_body = serde_json::to_vec(&serde_json::json!({
            "username": "alice",
            "password": "secret",
        }))
        .unwrap();
        let login_resp = handlers.login(empty_request(login_body)).await.unwrap();
        assert_eq!(login_resp.status, 200);

        let parsed: serde_json::Value = serde_json::from_slice(&login_resp.body).unwrap();
        let refresh_token = parsed["refresh_token"].as_str().unwrap().to_string();

        let refresh_body =
            serde_json::to_vec(&serde_json::json!({ "refresh_token": refresh_token })).unwrap();
        let refresh_resp = handlers.refresh(empty_request(refresh_body)).await.unwrap();
        assert_eq!(refresh_resp.status, 200);

        let logout_body =
            serde_json::to_vec(&serde_json::json!({ "refresh_token": refresh_token })).unwrap();
        let logout_resp = handlers.logout(empty_request(logout_body)).await.unwrap();
        assert_eq!(logout_resp.status, 200);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let handlers = test_handlers();
        let body = serde_json::to_vec(&serde_json::json!({
            "username": "alice",
            "password": "wrong",
        }))
        .unwrap();
        let err = handlers.login(empty_request(body)).await.unwrap_err();
        assert_eq!(err.status, 401);
    }
}
