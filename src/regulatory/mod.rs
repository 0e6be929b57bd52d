//! Regulatory Monitor
//! Mission: a scheduled multi-source scraper that fetches pages,
//! de-duplicates content, classifies severity, and persists regulatory
//! changes with bounded-failure retry.

pub mod extractor;
pub mod models;

use crate::db::ConnectionPool;
use crate::http_client::HttpClient;
use crate::pattern::{PatternDataPoint, PatternEngine};
use crate::registry::{HandlerError, Response};
use models::{content_hash, CandidateChange, CycleCounters, RegulatorySource};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FAILURE_THRESHOLD: u32 = 5;
const MIN_BACKOFF_MINUTES: i64 = 15;
const MAX_BACKOFF_MINUTES: i64 = 24 * 60;
const SCRAPE_TIMEOUT_SECONDS: u64 = 30;

pub struct RegulatoryMonitor {
    pool: ConnectionPool,
    http: HttpClient,
    pattern_engine: Arc<PatternEngine>,
    sources: Mutex<HashMap<String, RegulatorySource>>,
    running: Arc<AtomicBool>,
}

impl RegulatoryMonitor {
    pub fn new(pool: ConnectionPool, pattern_engine: Arc<PatternEngine>) -> anyhow::Result<Self> {
        let http = HttpClient::new(Duration::from_secs(SCRAPE_TIMEOUT_SECONDS))?;
        let monitor = Self {
            pool,
            http,
            pattern_engine,
            sources: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(true)),
        };
        monitor.load_sources()?;
        Ok(monitor)
    }

    fn load_sources(&self) -> anyhow::Result<()> {
        let conn = self.pool.lease()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, base_url, source_type, check_interval_minutes, active,
                    consecutive_failures, quarantined, quarantined_until
             FROM regulatory_sources",
        )?;
        let rows = stmt.query_map([], |row| {
            let quarantined_until: Option<String> = row.get(8)?;
            Ok(RegulatorySource {
                id: row.get(0)?,
                name: row.get(1)?,
                base_url: row.get(2)?,
                source_type: row.get(3)?,
                check_interval_minutes: row.get::<_, i64>(4)? as u64,
                active: row.get::<_, i64>(5)? != 0,
                consecutive_failures: row.get::<_, i64>(6)? as u32,
                quarantined: row.get::<_, i64>(7)? != 0,
                quarantined_until: quarantined_until
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc)),
            })
        })?;

        let mut sources = self.sources.lock();
        for row in rows {
            let source = row?;
            sources.insert(source.id.clone(), source);
        }
        Ok(())
    }

    pub fn register_source(&self, source: RegulatorySource) -> anyhow::Result<()> {
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT OR REPLACE INTO regulatory_sources
                (id, name, base_url, source_type, check_interval_minutes, active,
                 consecutive_failures, quarantined, quarantined_until)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                source.id,
                source.name,
                source.base_url,
                source.source_type,
                source.check_interval_minutes as i64,
                source.active as i64,
                source.consecutive_failures as i64,
                source.quarantined as i64,
                source.quarantined_until.map(|d| d.to_rfc3339()),
            ],
        )?;
        self.sources.lock().insert(source.id.clone(), source);
        Ok(())
    }

    pub fn list_sources(&self) -> Vec<RegulatorySource> {
        self.sources.lock().values().cloned().collect()
    }

    /// Spawn one scheduling task per active source. Each task loops until
    /// `shutdown` flips `running` to false.
    pub fn start(self: &Arc<Self>) {
        let source_ids: Vec<String> = self
            .sources
            .lock()
            .values()
            .filter(|s| s.active)
            .map(|s| s.id.clone())
            .collect();

        for source_id in source_ids {
            let monitor = self.clone();
            tokio::spawn(async move {
                monitor.run_source_loop(source_id).await;
            });
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_source_loop(self: Arc<Self>, source_id: String) {
        while self.running.load(Ordering::SeqCst) {
            let wait = self.next_wait_duration(&source_id);
            tokio::time::sleep(wait).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.scrape_cycle(&source_id).await {
                warn!(source_id, error = %e, "scrape cycle failed unexpectedly");
            }
        }
    }

    fn next_wait_duration(&self, source_id: &str) -> Duration {
        let sources = self.sources.lock();
        let Some(source) = sources.get(source_id) else {
            return Duration::from_secs(60);
        };

        if source.quarantined {
            if let Some(until) = source.quarantined_until {
                let remaining = until - chrono::Utc::now();
                return Duration::from_secs(remaining.num_seconds().max(1) as u64);
            }
        }

        Duration::from_secs(source.check_interval_minutes * 60)
    }

    /// Run one scrape cycle for `source_id`, whether scheduled or forced.
    pub async fn scrape_cycle(&self, source_id: &str) -> Result<CycleCounters, String> {
        let source = {
            let sources = self.sources.lock();
            sources
                .get(source_id)
                .cloned()
                .ok_or_else(|| "unknown source".to_string())?
        };

        let response = self.http.get(&source.base_url).await;
        if !response.success {
            let failures = self.record_failure(source_id)?;
            warn!(source_id, failures, "scrape fetch failed");
            return Ok(CycleCounters {
                failed: 1,
                ..Default::default()
            });
        }

        let candidates = extractor::extract_candidates(&source, &response.body);
        let mut counters = CycleCounters::default();

        for candidate in candidates {
            match self.persist_candidate(&source, &candidate) {
                Ok(true) => counters.inserted += 1,
                Ok(false) => counters.duplicated += 1,
                Err(e) => {
                    warn!(source_id, error = %e, "candidate insert failed");
                    counters.failed += 1;
                }
            }
        }

        self.record_success(source_id)?;

        self.pattern_engine.add_data_point(PatternDataPoint::new(
            source_id.to_string(),
            [("new_changes".to_string(), counters.inserted as f64)]
                .into_iter()
                .collect(),
            [("event_type".to_string(), "reg_scrape_ok".to_string())]
                .into_iter()
                .collect(),
        ));

        Ok(counters)
    }

    /// Off-cycle check. Shares the counters and dedup logic with the
    /// scheduled path; a success un-quarantines the source.
    pub async fn force_check(&self, source_id: &str) -> Result<CycleCounters, String> {
        self.scrape_cycle(source_id).await
    }

    fn persist_candidate(
        &self,
        source: &RegulatorySource,
        candidate: &CandidateChange,
    ) -> anyhow::Result<bool> {
        let hash = content_hash(&candidate.title, &candidate.body);
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM regulatory_changes WHERE source_id = ?1 AND content_hash = ?2",
                params![source.id, hash],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(_id) = existing {
            conn.execute(
                "UPDATE regulatory_changes SET last_seen_at = ?1 WHERE source_id = ?2 AND content_hash = ?3",
                params![now, source.id, hash],
            )?;
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO regulatory_changes
                (id, source_id, content_hash, title, url, severity, change_type, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                uuid::Uuid::new_v4().to_string(),
                source.id,
                hash,
                candidate.title,
                candidate.url,
                candidate.severity.as_str(),
                candidate.change_type,
                now,
                now,
            ],
        )?;
        Ok(true)
    }

    fn record_failure(&self, source_id: &str) -> Result<u32, String> {
        let mut sources = self.sources.lock();
        let source = sources
            .get_mut(source_id)
            .ok_or_else(|| "unknown source".to_string())?;

        source.consecutive_failures += 1;
        if source.consecutive_failures >= FAILURE_THRESHOLD {
            let backoff_doublings = source.consecutive_failures - FAILURE_THRESHOLD;
            let backoff_minutes = (MIN_BACKOFF_MINUTES * 2i64.pow(backoff_doublings.min(10)))
                .min(MAX_BACKOFF_MINUTES);
            source.quarantined = true;
            source.quarantined_until =
                Some(chrono::Utc::now() + chrono::Duration::minutes(backoff_minutes));
            info!(source_id, backoff_minutes, "source quarantined");
        }

        let failures = source.consecutive_failures;
        let quarantined = source.quarantined;
        let quarantined_until = source.quarantined_until;
        drop(sources);

        self.persist_failure_state(source_id, failures, quarantined, quarantined_until)
            .map_err(|e| e.to_string())?;
        Ok(failures)
    }

    fn record_success(&self, source_id: &str) -> Result<(), String> {
        {
            let mut sources = self.sources.lock();
            if let Some(source) = sources.get_mut(source_id) {
                source.consecutive_failures = 0;
                source.quarantined = false;
                source.quarantined_until = None;
            }
        }
        self.persist_failure_state(source_id, 0, false, None)
            .map_err(|e| e.to_string())
    }

    fn persist_failure_state(
        &self,
        source_id: &str,
        failures: u32,
        quarantined: bool,
        quarantined_until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> anyhow::Result<()> {
        let conn = self.pool.lease()?;
        conn.execute(
            "UPDATE regulatory_sources
             SET consecutive_failures = ?1, quarantined = ?2, quarantined_until = ?3
             WHERE id = ?4",
            params![
                failures as i64,
                quarantined as i64,
                quarantined_until.map(|d| d.to_rfc3339()),
                source_id,
            ],
        )?;
        Ok(())
    }
}

pub async fn handle_list_sources(
    monitor: Arc<RegulatoryMonitor>,
    _req: crate::registry::Request,
) -> Result<Response, HandlerError> {
    let sources = monitor.list_sources();
    Ok(Response::json(200, &sources))
}

pub async fn handle_force_check(
    monitor: Arc<RegulatoryMonitor>,
    source_id: String,
) -> Result<Response, HandlerError> {
    match monitor.force_check(&source_id).await {
        Ok(counters) => Ok(Response::json(200, &counters)),
        Err(e) => Err(HandlerError::internal(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternConfig;
    use crate::db::PoolConfig;

    fn test_pool() -> ConnectionPool {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        pool
    }

    fn test_source() -> RegulatorySource {
        RegulatorySource {
            id: "sec_edgar".to_string(),
            name: "SEC EDGAR".to_string(),
            base_url: "https://example.test/sec".to_string(),
            source_type: "generic".to_string(),
            check_interval_minutes: 60,
            active: true,
            consecutive_failures: 0,
            quarantined: false,
            quarantined_until: None,
        }
    }

    #[tokio::test]
    async fn dedup_across_two_cycles_on_same_candidates() {
        let pool = test_pool();
        let pattern_engine = Arc::new(PatternEngine::new(PatternConfig::from_store(
            &crate::config::ConfigStore::load(None).unwrap(),
        )));
        let monitor = RegulatoryMonitor::new(pool.clone(), pattern_engine).unwrap();
        monitor.register_source(test_source()).unwrap();

        let candidate = crate::regulatory::models::CandidateChange {
            title: "New filing requirement".to_string(),
            url: "https://example.test/doc/1".to_string(),
            body: "New filing requirement".to_string(),
            severity: crate::regulatory::models::Severity::Low,
            change_type: "regulatory_update".to_string(),
        };

        let first = monitor.persist_candidate(&test_source(), &candidate).unwrap();
        assert!(first);
        let second = monitor.persist_candidate(&test_source(), &candidate).unwrap();
        assert!(!second);

        let conn = pool.lease().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM regulatory_changes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn record_failure_quarantines_at_threshold() {
        let pool = test_pool();
        let pattern_engine = Arc::new(PatternEngine::new(PatternConfig::from_store(
            &crate::config::ConfigStore::load(None).unwrap(),
        )));
        let monitor = RegulatoryMonitor::new(pool, pattern_engine).unwrap();
        monitor.register_source(test_source()).unwrap();

        for _ in 0..FAILURE_THRESHOLD {
            monitor.record_failure("sec_edgar").unwrap();
        }

        let sources = monitor.sources.lock();
        let source = sources.get("sec_edgar").unwrap();
        assert_eq!(source.consecutive_failures, FAILURE_THRESHOLD);
        assert!(source.quarantined);
    }
}
