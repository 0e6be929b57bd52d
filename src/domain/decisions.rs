//! Decisions
//! Mission: CRUD plus the `draft → approved|rejected` transition. Approval
//! and rejection are idempotent one-way transitions guarded by a
//! `WHERE status = 'draft'` predicate on the UPDATE so a racing second
//! approval affects zero rows instead of double-approving.
//!
//! Grounded in `original_source/shared/decisions/decision_api_handlers_complete.hpp`.

use crate::db::ConnectionPool;
use crate::registry::{HandlerError, Request, Response};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

const MAX_LIMIT: u32 = 1000;
const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub decision_type: String,
    pub priority: String,
    pub status: String,
    pub created_by: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDecisionRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default = "default_decision_type")]
    pub decision_type: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_decision_type() -> String {
    "general".to_string()
}

fn default_priority() -> String {
    "medium".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct ApproveRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

pub struct DecisionStore {
    pool: ConnectionPool,
}

impl DecisionStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn row_to_decision(row: &rusqlite::Row) -> rusqlite::Result<Decision> {
        Ok(Decision {
            decision_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            decision_type: row.get(4)?,
            priority: row.get(5)?,
            status: row.get(6)?,
            created_by: row.get(7)?,
            approved_by: row.get(8)?,
            approved_at: row.get(9)?,
            rejected_by: row.get(10)?,
            rejected_at: row.get(11)?,
            rejection_reason: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    const SELECT_COLUMNS: &'static str = "decision_id, title, description, category, decision_type, \
        priority, status, created_by, approved_by, approved_at, rejected_by, rejected_at, \
        rejection_reason, created_at, updated_at";

    pub fn create(&self, req: &CreateDecisionRequest, created_by: &str) -> anyhow::Result<Decision> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO decisions
                (decision_id, title, description, category, decision_type, priority, status,
                 created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'draft', ?7, ?8, ?8)",
            params![id, req.title, req.description, req.category, req.decision_type, req.priority, created_by, now],
        )?;
        self.get(&id)?.ok_or_else(|| anyhow::anyhow!("decision vanished after insert"))
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<Decision>> {
        let conn = self.pool.lease()?;
        let decision = conn
            .query_row(
                &format!("SELECT {} FROM decisions WHERE decision_id = ?1", Self::SELECT_COLUMNS),
                params![id],
                Self::row_to_decision,
            )
            .optional()?;
        Ok(decision)
    }

    /// Returns `None` when the decision does not exist at all, distinct
    /// from an empty `status` filter match.
    pub fn get_visible(&self, id: &str) -> anyhow::Result<Option<Decision>> {
        match self.get(id)? {
            Some(d) if d.status != "deleted" => Ok(Some(d)),
            _ => Ok(None),
        }
    }

    pub fn list(&self, status: Option<&str>, limit: u32, offset: u32) -> anyhow::Result<(Vec<Decision>, u32)> {
        let limit = limit.min(MAX_LIMIT).max(1);
        let conn = self.pool.lease()?;

        let (where_sql, filter_value) = match status {
            Some(s) => (" WHERE status = ?1", s.to_string()),
            None => (" WHERE status != ?1", "deleted".to_string()),
        };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM decisions{where_sql}"),
            params![filter_value],
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM decisions{where_sql} ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            Self::SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![filter_value, limit, offset], Self::row_to_decision)?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok((items, total as u32))
    }

    /// Idempotent: affects a row only while `status = 'draft'`. A second
    /// approval call affects zero rows, surfaced by the caller as 404.
    pub fn approve(&self, id: &str, approved_by: &str, notes: Option<&str>) -> anyhow::Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        let updated = conn.execute(
            "UPDATE decisions SET status = 'approved', approved_by = ?1, approved_at = ?2, updated_at = ?2
             WHERE decision_id = ?3 AND status = 'draft'",
            params![approved_by, now, id],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO decision_approvals (id, decision_id, approved_by, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![uuid::Uuid::new_v4().to_string(), id, approved_by, notes, now],
        )?;
        Ok(true)
    }

    pub fn reject(&self, id: &str, rejected_by: &str, reason: &str) -> anyhow::Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        let updated = conn.execute(
            "UPDATE decisions SET status = 'rejected', rejected_by = ?1, rejected_at = ?2,
                rejection_reason = ?3, updated_at = ?2
             WHERE decision_id = ?4 AND status = 'draft'",
            params![rejected_by, now, reason, id],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO decision_rejections (id, decision_id, rejected_by, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![uuid::Uuid::new_v4().to_string(), id, rejected_by, reason, now],
        )?;
        Ok(true)
    }

    pub fn soft_delete(&self, id: &str) -> anyhow::Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        let updated = conn.execute(
            "UPDATE decisions SET status = 'deleted', updated_at = ?1 WHERE decision_id = ?2 AND status != 'deleted'",
            params![now, id],
        )?;
        Ok(updated > 0)
    }
}

fn caller_id(req: &Request) -> Result<String, HandlerError> {
    req.caller_id.clone().ok_or_else(|| HandlerError::new(401, "authentication required"))
}

fn query_u32(req: &Request, key: &str, default: u32) -> u32 {
    req.query.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub async fn handle_list_decisions(store: &DecisionStore, req: Request) -> Result<Response, HandlerError> {
    let limit = query_u32(&req, "limit", DEFAULT_LIMIT);
    let offset = query_u32(&req, "offset", 0);
    let status = req.query.get("status").map(String::as_str);
    let (items, total) = store
        .list(status, limit, offset)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(200, &Page { items, pagination: Pagination { limit, offset, total } }))
}

pub async fn handle_get_decision(store: &DecisionStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    match store.get_visible(id).map_err(|e| HandlerError::db_failure(e.to_string()))? {
        Some(decision) => Ok(Response::json(200, &decision)),
        None => Err(HandlerError::not_found("decision not found")),
    }
}

pub async fn handle_create_decision(store: &DecisionStore, req: Request) -> Result<Response, HandlerError> {
    let body: CreateDecisionRequest = req.body_json()?;
    let caller = caller_id(&req)?;
    let decision = store
        .create(&body, &caller)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(201, &decision))
}

pub async fn handle_approve_decision(store: &DecisionStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    let caller = caller_id(&req)?;
    let body: ApproveRequest = if req.body.is_empty() {
        ApproveRequest::default()
    } else {
        req.body_json()?
    };

    let ok = store
        .approve(id, &caller, body.notes.as_deref())
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    if !ok {
        return Err(HandlerError::not_found("not found or already approved"));
    }
    let decision = store
        .get(id)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?
        .ok_or_else(|| HandlerError::not_found("not found or already approved"))?;
    Ok(Response::json(200, &decision))
}

pub async fn handle_reject_decision(store: &DecisionStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    let caller = caller_id(&req)?;
    let body: RejectRequest = req.body_json()?;

    let ok = store
        .reject(id, &caller, &body.reason)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    if !ok {
        return Err(HandlerError::not_found("not found or already decided"));
    }
    let decision = store
        .get(id)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?
        .ok_or_else(|| HandlerError::not_found("not found or already decided"))?;
    Ok(Response::json(200, &decision))
}

pub async fn handle_delete_decision(store: &DecisionStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    let ok = store.soft_delete(id).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    if !ok {
        return Err(HandlerError::not_found("decision not found"));
    }
    Ok(Response::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use std::time::Duration;

    fn store() -> DecisionStore {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        DecisionStore::new(pool)
    }

    fn create_req() -> CreateDecisionRequest {
        CreateDecisionRequest {
            title: "X".to_string(),
            description: "...".to_string(),
            category: "general".to_string(),
            decision_type: "general".to_string(),
            priority: "medium".to_string(),
        }
    }

    #[test]
    fn create_then_approve_transition() {
        let store = store();
        let decision = store.create(&create_req(), "admin-1").unwrap();
        assert_eq!(decision.status, "draft");

        let approved = store.approve(&decision.decision_id, "admin-1", Some("ok")).unwrap();
        assert!(approved);

        let refreshed = store.get(&decision.decision_id).unwrap().unwrap();
        assert_eq!(refreshed.status, "approved");
        assert_eq!(refreshed.approved_by.as_deref(), Some("admin-1"));
        assert!(refreshed.approved_at.is_some());
    }

    #[test]
    fn re_approval_is_a_no_op() {
        let store = store();
        let decision = store.create(&create_req(), "admin-1").unwrap();
        assert!(store.approve(&decision.decision_id, "admin-1", None).unwrap());
        assert!(!store.approve(&decision.decision_id, "admin-1", None).unwrap());
    }

    #[test]
    fn soft_delete_hides_from_visible_get_but_not_raw_get() {
        let store = store();
        let decision = store.create(&create_req(), "admin-1").unwrap();
        assert!(store.soft_delete(&decision.decision_id).unwrap());
        assert!(store.get_visible(&decision.decision_id).unwrap().is_none());
        assert!(store.get(&decision.decision_id).unwrap().is_some());
    }

    #[test]
    fn pagination_reports_consistent_total() {
        let store = store();
        for _ in 0..5 {
            store.create(&create_req(), "admin-1").unwrap();
        }
        let (first_page, total) = store.list(None, 2, 0).unwrap();
        assert_eq!(total, 5);
        assert_eq!(first_page.len(), 2);
        let (_, total_again) = store.list(None, 2, 4).unwrap();
        assert_eq!(total_again, 5);
    }
}
