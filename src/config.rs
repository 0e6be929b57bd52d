//! Configuration Store
//! Mission: Typed, read-only access to process environment and a TOML
//! configuration document. Nothing in this module mutates after `ConfigStore::load`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Immutable snapshot of environment + document configuration.
///
/// `ConfigStore::load` is the one place environment variables are read;
/// every other component receives typed values out of this struct instead
/// of calling `std::env::var` itself.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    env: HashMap<String, String>,
    document: toml::Value,
}

impl ConfigStore {
    /// Load `.env` (if present), snapshot the process environment, and parse
    /// an optional TOML document. A missing document file is not an error —
    /// document lookups simply fall through to their defaults.
    pub fn load(document_path: Option<&Path>) -> Result<Self> {
        let _ = dotenv::dotenv();

        let env = env::vars().collect::<HashMap<_, _>>();

        let document = match document_path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config document {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config document {}", path.display()))?
            }
            _ => toml::Value::Table(Default::default()),
        };

        Ok(Self { env, document })
    }

    fn raw(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(|s| s.as_str())
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    pub fn optional_string(&self, key: &str) -> Option<String> {
        self.raw(key).map(|s| s.to_string())
    }

    pub fn required_string(&self, key: &str) -> Result<String> {
        self.raw(key)
            .map(|s| s.to_string())
            .with_context(|| format!("missing required environment variable {key}"))
    }

    pub fn u64(&self, key: &str, default: u64) -> u64 {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn u32(&self, key: &str, default: u32) -> u32 {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn f64(&self, key: &str, default: f64) -> f64 {
        self.raw(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        self.raw(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(default)
    }

    /// Dotted-path lookup into the TOML document, e.g. `document_str("server.host", "localhost")`.
    pub fn document_str(&self, path: &str, default: &str) -> String {
        self.document_lookup(path)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    pub fn document_f64(&self, path: &str, default: f64) -> f64 {
        self.document_lookup(path)
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .unwrap_or(default)
    }

    fn document_lookup(&self, path: &str) -> Option<&toml::Value> {
        let mut cur = &self.document;
        for segment in path.split('.') {
            cur = cur.get(segment)?;
        }
        Some(cur)
    }
}

/// Runtime tunables for the pattern engine (C8), sourced from `ConfigStore`.
#[derive(Debug, Clone, Copy)]
pub struct PatternConfig {
    pub min_occurrences: u32,
    pub min_confidence: f64,
    pub retention_hours: i64,
    pub real_time_analysis: bool,
    pub batch_interval: u32,
    pub cleanup_interval_minutes: u64,
}

impl PatternConfig {
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            min_occurrences: store.u32("PATTERN_MIN_OCCURRENCES", 5),
            min_confidence: store.f64("PATTERN_MIN_CONFIDENCE", 0.7),
            retention_hours: store.u64("PATTERN_RETENTION_HOURS", 168) as i64,
            real_time_analysis: store.bool("PATTERN_REAL_TIME_ANALYSIS", true),
            batch_interval: store.u32("PATTERN_BATCH_INTERVAL", 100),
            cleanup_interval_minutes: 30,
        }
    }
}

/// Runtime tunables for the feedback system (C9).
#[derive(Debug, Clone, Copy)]
pub struct FeedbackConfig {
    pub max_per_entity: usize,
    pub retention_hours: i64,
    pub min_for_learning: u32,
    pub confidence_threshold: f64,
    pub real_time_learning: bool,
    pub batch_interval: u32,
    pub worker_interval_minutes: u64,
}

impl FeedbackConfig {
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            max_per_entity: store.u64("FEEDBACK_MAX_PER_ENTITY", 10_000) as usize,
            retention_hours: store.u64("FEEDBACK_RETENTION_HOURS", 168) as i64,
            min_for_learning: store.u32("FEEDBACK_MIN_FOR_LEARNING", 10),
            confidence_threshold: store.f64("FEEDBACK_CONFIDENCE_THRESHOLD", 0.7),
            real_time_learning: store.bool("FEEDBACK_REAL_TIME_LEARNING", true),
            batch_interval: store.u32("FEEDBACK_BATCH_INTERVAL", 50),
            worker_interval_minutes: 15,
        }
    }
}

/// Server + auth wiring, also sourced from `ConfigStore`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub display_host: String,
    pub port: u16,
    pub jwt_secret: String,
}

impl ServerConfig {
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        Ok(Self {
            display_host: store.string("WEB_SERVER_DISPLAY_HOST", "localhost"),
            port: store.u32("WEB_SERVER_API_PORT", 3000) as u16,
            jwt_secret: store.required_string("JWT_SECRET")?,
        })
    }
}
