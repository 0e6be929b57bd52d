//! End-to-end HTTP flow tests driven directly against the axum `Router`
//! via `tower::util::ServiceExt::oneshot`, without a bound TCP listener.

use axum::body::Body;
use axum::http::{header, Request as HttpRequest, StatusCode};
use regulens_backend::auth::api::AuthHandlers;
use regulens_backend::auth::token::TokenService;
use regulens_backend::auth::user_store::UserStore;
use regulens_backend::db::{self, ConnectionPool, PoolConfig};
use regulens_backend::domain::decisions::{self, DecisionStore};
use regulens_backend::registry::{Endpoint, HandlerFuture, HttpMethod, Registry, Request};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

fn test_pool() -> ConnectionPool {
    let pool = db::open(PoolConfig {
        path: ":memory:".to_string(),
        max_connections: 1,
        acquire_timeout: Duration::from_secs(1),
    })
    .unwrap();
    pool
}

fn roles(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Build a minimal router covering only the endpoints these tests exercise,
/// the same way `build_registry` in the binary wires the full surface.
fn test_app(pool: ConnectionPool) -> (axum::Router, Arc<TokenService>) {
    let token_service = Arc::new(TokenService::new("test-secret", pool.clone()));
    let user_store = Arc::new(UserStore::new(pool.clone()));
    let auth_handlers = Arc::new(AuthHandlers::new(user_store, token_service.clone()));
    let decision_store = Arc::new(DecisionStore::new(pool));

    let mut registry = Registry::new();

    {
        let h = auth_handlers.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Post,
                path_template: "/api/auth/login".to_string(),
                category: "auth".to_string(),
                summary: "login".to_string(),
                auth_required: false,
                allowed_roles: HashSet::new(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let h = h.clone();
                    Box::pin(async move { h.login(req).await })
                }),
            })
            .unwrap();
    }
    {
        let h = auth_handlers.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Post,
                path_template: "/api/auth/refresh".to_string(),
                category: "auth".to_string(),
                summary: "refresh".to_string(),
                auth_required: false,
                allowed_roles: HashSet::new(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let h = h.clone();
                    Box::pin(async move { h.refresh(req).await })
                }),
            })
            .unwrap();
    }
    {
        let h = auth_handlers.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Post,
                path_template: "/api/auth/logout".to_string(),
                category: "auth".to_string(),
                summary: "logout".to_string(),
                auth_required: true,
                allowed_roles: HashSet::new(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let h = h.clone();
                    Box::pin(async move { h.logout(req).await })
                }),
            })
            .unwrap();
    }
    {
        let h = auth_handlers.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Get,
                path_template: "/api/auth/me".to_string(),
                category: "auth".to_string(),
                summary: "me".to_string(),
                auth_required: true,
                allowed_roles: HashSet::new(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let h = h.clone();
                    Box::pin(async move { h.me(req).await })
                }),
            })
            .unwrap();
    }

    let decision_roles = roles(&["user", "admin", "compliance_officer"]);
    let approver_roles = roles(&["admin", "compliance_officer"]);
    {
        let s = decision_store.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Post,
                path_template: "/decisions".to_string(),
                category: "decisions".to_string(),
                summary: "create".to_string(),
                auth_required: true,
                allowed_roles: decision_roles.clone(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let s = s.clone();
                    Box::pin(async move { decisions::handle_create_decision(&s, req).await })
                }),
            })
            .unwrap();
    }
    {
        let s = decision_store.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Get,
                path_template: "/decisions/{id}".to_string(),
                category: "decisions".to_string(),
                summary: "get".to_string(),
                auth_required: true,
                allowed_roles: decision_roles.clone(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let s = s.clone();
                    Box::pin(async move { decisions::handle_get_decision(&s, req).await })
                }),
            })
            .unwrap();
    }
    {
        let s = decision_store.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Post,
                path_template: "/decisions/{id}/approve".to_string(),
                category: "decisions".to_string(),
                summary: "approve".to_string(),
                auth_required: true,
                allowed_roles: approver_roles.clone(),
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let s = s.clone();
                    Box::pin(async move { decisions::handle_approve_decision(&s, req).await })
                }),
            })
            .unwrap();
    }
    {
        let s = decision_store.clone();
        registry
            .register(Endpoint {
                method: HttpMethod::Delete,
                path_template: "/decisions/{id}".to_string(),
                category: "decisions".to_string(),
                summary: "delete".to_string(),
                auth_required: true,
                allowed_roles: approver_roles,
                handler: Arc::new(move |req: Request| -> HandlerFuture {
                    let s = s.clone();
                    Box::pin(async move { decisions::handle_delete_decision(&s, req).await })
                }),
            })
            .unwrap();
    }

    (registry.into_router(token_service.clone()), token_service)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: Value) -> HttpRequest<Body> {
    let mut builder = HttpRequest::builder().method(method).uri(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// S1. Login, call `/me`, logout, then a reused refresh token is rejected.
#[tokio::test]
async fn login_call_logout_flow() {
    let pool = test_pool();
    let user_store = UserStore::new(pool.clone());
    user_store.create("alice", "secret", None, &["user"]).unwrap();

    let (app, _token_service) = test_app(pool);

    let login_resp = app
        .clone()
        .oneshot(json_request("POST", "/api/auth/login", None, json!({"username": "alice", "password": "secret"})))
        .await
        .unwrap();
    assert_eq!(login_resp.status(), StatusCode::OK);
    let login_body = json_body(login_resp).await;
    let access = login_body["access_token"].as_str().unwrap().to_string();
    let refresh = login_body["refresh_token"].as_str().unwrap().to_string();
    assert_eq!(login_body["user"]["username"], "alice");
    assert_eq!(login_body["user"]["roles"], json!(["user"]));
    assert_eq!(login_body["expires_in"], 86_400);

    let me_resp = app.clone().oneshot(json_request("GET", "/api/auth/me", Some(&access), json!({}))).await.unwrap();
    assert_eq!(me_resp.status(), StatusCode::OK);
    assert_eq!(json_body(me_resp).await["username"], "alice");

    let logout_resp = app
        .clone()
        .oneshot(json_request("POST", "/api/auth/logout", Some(&access), json!({"refresh_token": refresh})))
        .await
        .unwrap();
    assert_eq!(logout_resp.status(), StatusCode::OK);

    let refresh_resp = app
        .clone()
        .oneshot(json_request("POST", "/api/auth/refresh", None, json!({"refresh_token": refresh})))
        .await
        .unwrap();
    assert_eq!(refresh_resp.status(), StatusCode::UNAUTHORIZED);
}

/// S4. Decision create → approve → repeat approve is rejected as not found.
#[tokio::test]
async fn decision_approval_transition() {
    let pool = test_pool();
    let user_store = UserStore::new(pool.clone());
    user_store.create("admin", "secret", None, &["admin"]).unwrap();

    let (app, _token_service) = test_app(pool);

    let login_body = json_body(
        app.clone()
            .oneshot(json_request("POST", "/api/auth/login", None, json!({"username": "admin", "password": "secret"})))
            .await
            .unwrap(),
    )
    .await;
    let access = login_body["access_token"].as_str().unwrap().to_string();

    let create_resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/decisions",
            Some(&access),
            json!({"title": "X", "description": "…", "category": "general"}),
        ))
        .await
        .unwrap();
    assert_eq!(create_resp.status(), StatusCode::CREATED);
    let decision = json_body(create_resp).await;
    assert_eq!(decision["status"], "draft");
    let id = decision["decision_id"].as_str().unwrap().to_string();

    let approve_resp = app
        .clone()
        .oneshot(json_request("POST", &format!("/decisions/{id}/approve"), Some(&access), json!({"notes": "ok"})))
        .await
        .unwrap();
    assert_eq!(approve_resp.status(), StatusCode::OK);
    let approved = json_body(approve_resp).await;
    assert_eq!(approved["status"], "approved");
    assert!(approved["approved_by"].is_string());
    assert!(approved["approved_at"].is_string());

    let second_approve = app
        .clone()
        .oneshot(json_request("POST", &format!("/decisions/{id}/approve"), Some(&access), json!({})))
        .await
        .unwrap();
    assert_eq!(second_approve.status(), StatusCode::NOT_FOUND);
}

/// Property 8: soft delete hides the resource from `GET` but the row
/// (and a status-filtered listing) still accounts for it.
#[tokio::test]
async fn soft_delete_hides_get_but_not_status_filtered_list() {
    let pool = test_pool();
    let user_store = UserStore::new(pool.clone());
    user_store.create("admin", "secret", None, &["admin"]).unwrap();
    let (app, _token_service) = test_app(pool.clone());

    let login_body = json_body(
        app.clone()
            .oneshot(json_request("POST", "/api/auth/login", None, json!({"username": "admin", "password": "secret"})))
            .await
            .unwrap(),
    )
    .await;
    let access = login_body["access_token"].as_str().unwrap().to_string();

    let created = json_body(
        app.clone()
            .oneshot(json_request(
                "POST",
                "/decisions",
                Some(&access),
                json!({"title": "to delete", "description": "…", "category": "general"}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["decision_id"].as_str().unwrap().to_string();

    let delete_resp = app
        .clone()
        .oneshot(json_request("DELETE", &format!("/decisions/{id}"), Some(&access), json!({})))
        .await
        .unwrap();
    assert_eq!(delete_resp.status(), StatusCode::NO_CONTENT);

    let get_resp =
        app.clone().oneshot(json_request("GET", &format!("/decisions/{id}"), Some(&access), json!({}))).await.unwrap();
    assert_eq!(get_resp.status(), StatusCode::NOT_FOUND);

    let store = DecisionStore::new(pool);
    let deleted_directly = store.get(&id).unwrap();
    assert!(deleted_directly.is_some(), "soft delete must not erase the row");
    assert_eq!(deleted_directly.unwrap().status, "deleted");
}

/// Property 9: a caller whose roles don't intersect the endpoint's
/// allowed roles gets 403 even with a perfectly valid body.
#[tokio::test]
async fn role_enforcement_rejects_disjoint_roles() {
    let pool = test_pool();
    let user_store = UserStore::new(pool.clone());
    user_store.create("plain", "secret", None, &["user"]).unwrap();
    let (app, _token_service) = test_app(pool);

    let login_body = json_body(
        app.clone()
            .oneshot(json_request("POST", "/api/auth/login", None, json!({"username": "plain", "password": "secret"})))
            .await
            .unwrap(),
    )
    .await;
    let access = login_body["access_token"].as_str().unwrap().to_string();

    let created = json_body(
        app.clone()
            .oneshot(json_request(
                "POST",
                "/decisions",
                Some(&access),
                json!({"title": "whatever", "description": "…", "category": "general"}),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["decision_id"].as_str().unwrap().to_string();

    // "user" is not in the approve endpoint's allowed roles (admin,
    // compliance_officer) — the request body is otherwise well-formed.
    let approve_resp = app
        .clone()
        .oneshot(json_request("POST", &format!("/decisions/{id}/approve"), Some(&access), json!({"notes": "ok"})))
        .await
        .unwrap();
    assert_eq!(approve_resp.status(), StatusCode::FORBIDDEN);
}

/// No `Authorization` header on an auth-required endpoint is 401, not 403.
#[tokio::test]
async fn missing_credentials_are_unauthenticated_not_forbidden() {
    let pool = test_pool();
    let (app, _token_service) = test_app(pool);

    let resp = app.oneshot(json_request("GET", "/api/auth/me", None, json!({}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
