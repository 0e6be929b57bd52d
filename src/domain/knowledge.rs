//! Knowledge base
//! Mission: store entries with a precomputed embedding, search them in
//! keyword/semantic/hybrid mode, and compose RAG-style question answering.
//!
//! Hybrid scoring (`0.7*semantic + 0.3*keyword`) and the 0.7 similarity
//! default are grounded in
//! `original_source/shared/knowledge_base/knowledge_api_handlers_complete.cpp`.

use crate::db::ConnectionPool;
use crate::registry::{HandlerError, Request, Response};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const EMBEDDING_DIM: usize = 384;
const HYBRID_SEMANTIC_WEIGHT: f64 = 0.7;
const HYBRID_KEYWORD_WEIGHT: f64 = 0.3;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
const DEFAULT_TOP_K: usize = 10;

/// Deterministic pure embedding: hash each token into a fixed-width
/// accumulator, then L2-normalize. Not a real semantic model, but stable
/// and order-sensitive enough to drive search ranking deterministically.
pub fn embed(text: &str) -> Vec<f64> {
    let mut vector = vec![0.0f64; EMBEDDING_DIM];
    for token in tokenize(text) {
        let mut hash: u64 = 1469598103934665603; // FNV offset basis
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211); // FNV prime
        }
        let bucket = (hash as usize) % EMBEDDING_DIM;
        vector[bucket] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn keyword_score(query_tokens: &HashSet<String>, doc_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }
    let doc_set: HashSet<&String> = doc_tokens.iter().collect();
    let overlap = query_tokens.iter().filter(|t| doc_set.contains(t)).count();
    overlap as f64 / query_tokens.len() as f64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub entry_id: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub category: String,
    pub status: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    fn parse(s: Option<&str>) -> Self {
        match s {
            Some("keyword") => SearchMode::Keyword,
            Some("semantic") => SearchMode::Semantic,
            _ => SearchMode::Hybrid,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entry: KnowledgeEntry,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    pub title: String,
    pub summary: String,
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub answer: String,
    pub source_ids: Vec<String>,
    pub session_id: String,
}

struct StoredEntry {
    entry: KnowledgeEntry,
    embedding: Vec<f64>,
}

pub struct KnowledgeStore {
    pool: ConnectionPool,
}

impl KnowledgeStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn create(&self, req: &CreateEntryRequest, created_by: &str) -> anyhow::Result<KnowledgeEntry> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let embedding = embed(&format!("{} {} {}", req.title, req.summary, req.content));
        let embedding_json = serde_json::to_string(&embedding)?;

        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO knowledge_entries
                (entry_id, title, summary, content, category, embedding, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8, ?8)",
            params![id, req.title, req.summary, req.content, req.category, embedding_json, created_by, now],
        )?;

        Ok(KnowledgeEntry {
            entry_id: id,
            title: req.title.clone(),
            summary: req.summary.clone(),
            content: req.content.clone(),
            category: req.category.clone(),
            status: "active".to_string(),
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn load_active(&self, category: Option<&str>) -> anyhow::Result<Vec<StoredEntry>> {
        let conn = self.pool.lease()?;
        let sql = match category {
            Some(_) => "SELECT entry_id, title, summary, content, category, status, created_by,
                               created_at, updated_at, embedding
                        FROM knowledge_entries WHERE status = 'active' AND category = ?1",
            None => "SELECT entry_id, title, summary, content, category, status, created_by,
                            created_at, updated_at, embedding
                     FROM knowledge_entries WHERE status = 'active'",
        };
        let mut stmt = conn.prepare(sql)?;

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(KnowledgeEntry, String)> {
            Ok((
                KnowledgeEntry {
                    entry_id: row.get(0)?,
                    title: row.get(1)?,
                    summary: row.get(2)?,
                    content: row.get(3)?,
                    category: row.get(4)?,
                    status: row.get(5)?,
                    created_by: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                },
                row.get(9)?,
            ))
        };

        let rows: Vec<(KnowledgeEntry, String)> = match category {
            Some(c) => stmt.query_map(params![c], map_row)?.collect::<Result<_, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<_, _>>()?,
        };

        Ok(rows
            .into_iter()
            .map(|(entry, embedding_json)| StoredEntry {
                entry,
                embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
            })
            .collect())
    }

    /// Search with `mode`, returning up to `top_k` results sorted
    /// descending by score. Hybrid merges keyword + semantic before
    /// deduping by id.
    pub fn search(&self, query: &str, mode: SearchMode, category: Option<&str>, top_k: usize) -> anyhow::Result<Vec<SearchResult>> {
        let entries = self.load_active(category)?;
        let query_embedding = embed(query);
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();

        let mut results: Vec<SearchResult> = entries
            .into_iter()
            .filter_map(|stored| {
                let doc_tokens = tokenize(&format!("{} {} {}", stored.entry.title, stored.entry.summary, stored.entry.content));
                let keyword = keyword_score(&query_tokens, &doc_tokens);
                let semantic = cosine_similarity(&query_embedding, &stored.embedding);

                let score = match mode {
                    SearchMode::Keyword => keyword,
                    SearchMode::Semantic => semantic,
                    SearchMode::Hybrid => HYBRID_SEMANTIC_WEIGHT * semantic + HYBRID_KEYWORD_WEIGHT * keyword,
                };

                (score > 0.0).then_some(SearchResult { entry: stored.entry, score })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k.max(1));
        Ok(results)
    }

    /// Entries whose semantic similarity to `entry_id` exceeds the default
    /// 0.7 threshold, excluding the entry itself.
    pub fn similar_to(&self, entry_id: &str, threshold: Option<f64>) -> anyhow::Result<Vec<SearchResult>> {
        let threshold = threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
        let entries = self.load_active(None)?;
        let Some(target) = entries.iter().find(|e| e.entry.entry_id == entry_id) else {
            return Ok(Vec::new());
        };
        let target_embedding = target.embedding.clone();

        let mut results: Vec<SearchResult> = entries
            .into_iter()
            .filter(|e| e.entry.entry_id != entry_id)
            .filter_map(|e| {
                let score = cosine_similarity(&target_embedding, &e.embedding);
                (score >= threshold).then_some(SearchResult { entry: e.entry, score })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// RAG composition: hybrid top-k → assemble context → a deterministic,
    /// extractive "answer" (no external text generator is wired up here;
    /// the design documents that step as out of scope) → persist the
    /// question/context/sources/answer as a session row.
    pub fn ask(&self, question: &str, top_k: usize, created_by: &str) -> anyhow::Result<AskResponse> {
        let hits = self.search(question, SearchMode::Hybrid, None, top_k)?;
        let context = hits
            .iter()
            .map(|h| format!("{}: {}", h.entry.title, h.entry.summary))
            .collect::<Vec<_>>()
            .join("\n");
        let source_ids: Vec<String> = hits.iter().map(|h| h.entry.entry_id.clone()).collect();

        let answer = if hits.is_empty() {
            "No relevant knowledge base entries were found.".to_string()
        } else {
            format!("Based on {} relevant entries: {}", hits.len(), context)
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let source_ids_json = serde_json::to_string(&source_ids)?;

        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO knowledge_qa_sessions (id, question, context, source_ids, answer, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![session_id, question, context, source_ids_json, answer, created_by, now],
        )?;

        Ok(AskResponse { question: question.to_string(), answer, source_ids, session_id })
    }
}

pub async fn handle_search(store: &KnowledgeStore, req: Request) -> Result<Response, HandlerError> {
    let query = req.query.get("q").cloned().unwrap_or_default();
    if query.is_empty() {
        return Err(HandlerError::validation("missing query parameter q"));
    }
    let mode = SearchMode::parse(req.query.get("type").map(String::as_str));
    let category = req.query.get("category").map(String::as_str);
    let top_k = req
        .query
        .get("top_k")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TOP_K);

    let results = store
        .search(&query, mode, category, top_k)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(200, &results))
}

pub async fn handle_create_entry(store: &KnowledgeStore, req: Request) -> Result<Response, HandlerError> {
    let body: CreateEntryRequest = req.body_json()?;
    let caller = req.caller_id.clone().ok_or_else(|| HandlerError::new(401, "authentication required"))?;
    let entry = store.create(&body, &caller).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(201, &entry))
}

pub async fn handle_ask(store: &KnowledgeStore, req: Request) -> Result<Response, HandlerError> {
    let body: AskRequest = req.body_json()?;
    let caller = req.caller_id.clone().ok_or_else(|| HandlerError::new(401, "authentication required"))?;
    let answer = store
        .ask(&body.question, body.top_k.unwrap_or(DEFAULT_TOP_K), &caller)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(200, &answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use std::time::Duration;

    fn store() -> KnowledgeStore {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        KnowledgeStore::new(pool)
    }

    #[test]
    fn embedding_is_unit_norm_and_deterministic() {
        let a = embed("regulatory compliance monitoring");
        let b = embed("regulatory compliance monitoring");
        assert_eq!(a, b);
        let norm = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hybrid_search_ranks_exact_title_match_first() {
        let store = store();
        store.create(&CreateEntryRequest { title: "Alpha Policy".to_string(), summary: "first".to_string(), content: "alpha content".to_string(), category: "general".to_string() }, "admin").unwrap();
        store.create(&CreateEntryRequest { title: "Beta Policy".to_string(), summary: "second".to_string(), content: "beta content".to_string(), category: "general".to_string() }, "admin").unwrap();
        store.create(&CreateEntryRequest { title: "Gamma Policy".to_string(), summary: "third".to_string(), content: "gamma content".to_string(), category: "general".to_string() }, "admin").unwrap();

        let results = store.search("Beta Policy", SearchMode::Hybrid, None, 3).unwrap();
        assert_eq!(results[0].entry.title, "Beta Policy");
    }

    #[test]
    fn ask_persists_a_qa_session() {
        let store = store();
        store.create(&CreateEntryRequest { title: "Reporting deadlines".to_string(), summary: "quarterly filing".to_string(), content: "file within 30 days".to_string(), category: "general".to_string() }, "admin").unwrap();

        let response = store.ask("What are the reporting deadlines?", 3, "admin").unwrap();
        assert!(!response.source_ids.is_empty());
        assert!(!response.answer.is_empty());
    }
}
