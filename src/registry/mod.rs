//! Registry
//! Mission: catalogue of endpoints grouped by category, matched by HTTP
//! method + path template, with uniform authentication, authorization, and
//! error enveloping. This is the *only* place those cross-cutting concerns
//! live — domain handlers never re-implement them.

use crate::auth::token::TokenService;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method as AxumMethod, StatusCode};
use axum::response::Response as AxumResponse;
use axum::routing::MethodRouter;
use axum::Router;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, warn};

/// One of the four HTTP verbs this registry dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_axum(self) -> AxumMethod {
        match self {
            HttpMethod::Get => AxumMethod::GET,
            HttpMethod::Post => AxumMethod::POST,
            HttpMethod::Put => AxumMethod::PUT,
            HttpMethod::Delete => AxumMethod::DELETE,
        }
    }
}

/// Request value handed to domain handlers. Deliberately independent of
/// axum's own request type so handlers stay framework-agnostic.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub caller_id: Option<String>,
}

impl Request {
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| HandlerError::validation(format!("malformed request body: {e}")))
    }
}

/// Response value returned by domain handlers.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl Response {
    pub fn json<T: serde::Serialize>(status: u16, value: &T) -> Self {
        Self {
            status,
            body: serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec()),
            content_type: "application/json; charset=utf-8".to_string(),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
            content_type: "application/json; charset=utf-8".to_string(),
        }
    }
}

/// Error kinds visible at the HTTP boundary. Every domain handler returns
/// `Result<Response, HandlerError>`; the registry converts an `Err` into
/// the standard `{"error": "..."}` envelope.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub status: u16,
    pub message: String,
    pub code: Option<String>,
}

impl HandlerError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message)
    }

    pub fn db_failure(message: impl Into<String>) -> Self {
        Self::new(500, format!("database failure: {}", message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    fn into_response(self) -> Response {
        let body = match &self.code {
            Some(code) => json!({ "error": self.message, "code": code }),
            None => json!({ "error": self.message }),
        };
        Response::json(self.status, &body)
    }
}

pub type HandlerResult = Result<Response, HandlerError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Declarative endpoint entry. `handler` never runs auth/error-enveloping
/// itself — the registry wraps it.
#[derive(Clone)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path_template: String,
    pub category: String,
    pub summary: String,
    pub auth_required: bool,
    pub allowed_roles: HashSet<String>,
    pub handler: HandlerFn,
}

#[derive(Debug)]
pub enum RegistryError {
    DuplicateRoute(HttpMethod, String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateRoute(method, path) => {
                write!(f, "route already registered: {method:?} {path}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Catalogue of endpoints. Read-only once `into_router` is called — after
/// that point it is consumed, matching the "registration happens before
/// the server accepts" contract.
#[derive(Default)]
pub struct Registry {
    endpoints: Vec<Endpoint>,
    seen: HashSet<(HttpMethod, String)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Fails at registration time — not dispatch
    /// time — if `(method, pathTemplate)` is already taken.
    pub fn register(&mut self, endpoint: Endpoint) -> Result<(), RegistryError> {
        let key = (endpoint.method, endpoint.path_template.clone());
        if !self.seen.insert(key.clone()) {
            return Err(RegistryError::DuplicateRoute(key.0, key.1));
        }
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Build the axum router. Endpoints sharing a path are folded into one
    /// `MethodRouter`; `register` already enforces exact `(method,
    /// pathTemplate)` uniqueness, so no two entries here ever target the
    /// same (path, method) pair.
    pub fn into_router(self, token_service: Arc<TokenService>) -> Router {
        let mut by_path: HashMap<String, MethodRouter> = HashMap::new();

        for endpoint in self.endpoints {
            let axum_path = to_axum_path(&endpoint.path_template);
            let method = endpoint.method;
            let endpoint = Arc::new(endpoint);
            let token_service = token_service.clone();

            let axum_handler = move |req: axum::extract::Request| {
                let endpoint = endpoint.clone();
                let token_service = token_service.clone();
                async move { dispatch(endpoint, token_service, req).await }
            };

            let method_router = by_path.remove(&axum_path).unwrap_or_default();
            let method_router = match method {
                HttpMethod::Get => method_router.get(axum_handler),
                HttpMethod::Post => method_router.post(axum_handler),
                HttpMethod::Put => method_router.put(axum_handler),
                HttpMethod::Delete => method_router.delete(axum_handler),
            };
            by_path.insert(axum_path, method_router);
        }

        let mut router = Router::new();
        for (path, method_router) in by_path {
            router = router.route(&path, method_router);
        }
        router
    }
}

fn to_axum_path(path_template: &str) -> String {
    path_template
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                format!(":{name}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Bind literal path segments against a template, returning `{name}`
/// captures. Used to populate `Request.params` independent of axum's own
/// extractor so the shape matches the design's `Request` contract exactly.
fn extract_params(template: &str, actual_path: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let template_segments: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
    let actual_segments: Vec<&str> = actual_path.split('/').filter(|s| !s.is_empty()).collect();

    if template_segments.len() != actual_segments.len() {
        return params;
    }

    for (tmpl, actual) in template_segments.iter().zip(actual_segments.iter()) {
        if let Some(name) = tmpl.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            params.insert(name.to_string(), (*actual).to_string());
        }
    }
    params
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            if key.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("");
            Some((
                urlencoding_decode(key),
                urlencoding_decode(value),
            ))
        })
        .collect()
}

/// Minimal percent-decoding; query values in this system are simple ASCII
/// identifiers and search terms, never binary payloads.
fn urlencoding_decode(input: &str) -> String {
    let replaced = input.replace('+', " ");
    let mut out = String::with_capacity(replaced.len());
    let mut chars = replaced.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                    out.push(byte as char);
                    continue;
                }
            }
            out.push('%');
        } else {
            out.push(c);
        }
    }
    out
}

fn error_body(status: u16, message: &str, code: Option<&str>) -> AxumResponse {
    let body = match code {
        Some(code) => json!({ "error": message, "code": code }),
        None => json!({ "error": message }),
    };
    build_axum_response(Response::json(status, &body))
}

fn build_axum_response(response: Response) -> AxumResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = axum::http::Response::builder()
        .status(status)
        .header("content-type", response.content_type);
    builder = builder;
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| {
            axum::http::Response::new(Body::from(Vec::<u8>::new()))
        })
}

async fn dispatch(
    endpoint: Arc<Endpoint>,
    token_service: Arc<TokenService>,
    req: axum::extract::Request,
) -> AxumResponse {
    let method_matches = match (req.method().clone(), endpoint.method) {
        (m, e) if m == e.as_axum() => true,
        _ => false,
    };
    if !method_matches {
        return error_body(404, "not found", None);
    }

    let path = req.uri().path().to_string();
    let query = req
        .uri()
        .query()
        .map(parse_query)
        .unwrap_or_default();
    let params = extract_params(&endpoint.path_template, &path);
    let headers = headers_to_map(req.headers());

    let body_bytes = match to_bytes(req.into_body(), 10 * 1024 * 1024).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return error_body(400, "request body too large or unreadable", None);
        }
    };

    let mut request = Request {
        method: endpoint.method,
        path,
        query,
        params,
        headers: headers.clone(),
        body: body_bytes,
        caller_id: None,
    };

    if endpoint.auth_required {
        match token_service.identify_claims(&headers) {
            Some(claims) => {
                if !endpoint.allowed_roles.is_empty()
                    && !claims.roles.iter().any(|r| endpoint.allowed_roles.contains(r))
                {
                    return error_body(403, "insufficient permissions", Some("forbidden"));
                }
                request.caller_id = Some(claims.sub);
            }
            None => {
                return error_body(401, "authentication required", Some("unauthenticated"));
            }
        }
    }

    let handler = endpoint.handler.clone();
    let fut = handler(request);

    match tokio::spawn(fut).await {
        Ok(Ok(response)) => build_axum_response(response),
        Ok(Err(handler_error)) => {
            if handler_error.status >= 500 {
                error!(message = %handler_error.message, "handler returned server error");
            }
            build_axum_response(handler_error.into_response())
        }
        Err(join_error) => {
            error!(error = %join_error, "handler panicked");
            error_body(500, "internal server error", None)
        }
    }
}
