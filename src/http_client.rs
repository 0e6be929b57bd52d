//! HTTP Client
//! Mission: GET/POST with a hard timeout, bounded redirects, and a uniform
//! response envelope for callers (the regulatory monitor, Privy-style
//! federation hooks) that must never leak a raw `reqwest::Error`.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Uniform response envelope. Callers inspect `success` rather than
/// matching on transport errors.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub success: bool,
    pub error: Option<String>,
}

impl HttpResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: String::new(),
            headers: HashMap::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }

    pub async fn get(&self, url: &str) -> HttpResponse {
        match self.client.get(url).send().await {
            Ok(resp) => Self::into_envelope(resp).await,
            Err(e) => {
                warn!(url, error = %e, "http GET failed");
                HttpResponse::failure(e.to_string())
            }
        }
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> HttpResponse {
        match self.client.post(url).json(body).send().await {
            Ok(resp) => Self::into_envelope(resp).await,
            Err(e) => {
                warn!(url, error = %e, "http POST failed");
                HttpResponse::failure(e.to_string())
            }
        }
    }

    async fn into_envelope(resp: reqwest::Response) -> HttpResponse {
        let status = resp.status().as_u16();
        let success = resp.status().is_success();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        match resp.text().await {
            Ok(body) => HttpResponse {
                status,
                body,
                headers,
                success,
                error: if success {
                    None
                } else {
                    Some(format!("upstream returned status {status}"))
                },
            },
            Err(e) => HttpResponse::failure(e.to_string()),
        }
    }

    /// Expose the underlying client for cases that need request-builder
    /// flexibility beyond GET/POST (e.g. custom headers for federated auth).
    pub fn raw(&self) -> &reqwest::Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_envelope_has_zero_status() {
        let envelope = HttpResponse::failure("boom");
        assert_eq!(envelope.status, 0);
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("boom"));
    }
}
