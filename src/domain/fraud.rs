//! Fraud rules
//! Mission: plain CRUD over named, active/inactive rule definitions that
//! the transaction pipeline can evaluate against. The rule language
//! itself (the `condition_expr`) is domain configuration, not part of
//! this component's contract.

use crate::db::ConnectionPool;
use crate::registry::{HandlerError, Request, Response};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudRule {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    pub condition_expr: String,
    pub severity: String,
    pub active: bool,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFraudRuleRequest {
    pub name: String,
    pub description: String,
    pub condition_expr: String,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

pub struct FraudRuleStore {
    pool: ConnectionPool,
}

impl FraudRuleStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<FraudRule> {
        Ok(FraudRule {
            rule_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            condition_expr: row.get(3)?,
            severity: row.get(4)?,
            active: row.get::<_, i64>(5)? != 0,
            created_by: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    const SELECT_COLUMNS: &'static str =
        "rule_id, name, description, condition_expr, severity, active, created_by, created_at, updated_at";

    pub fn create(&self, req: &CreateFraudRuleRequest, created_by: &str) -> anyhow::Result<FraudRule> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO fraud_rules
                (rule_id, name, description, condition_expr, severity, active, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)",
            params![id, req.name, req.description, req.condition_expr, req.severity, created_by, now],
        )?;
        self.get(&id)?.ok_or_else(|| anyhow::anyhow!("fraud rule vanished after insert"))
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<FraudRule>> {
        let conn = self.pool.lease()?;
        let rule = conn
            .query_row(
                &format!("SELECT {} FROM fraud_rules WHERE rule_id = ?1", Self::SELECT_COLUMNS),
                params![id],
                Self::row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    pub fn list(&self, active_only: bool) -> anyhow::Result<Vec<FraudRule>> {
        let conn = self.pool.lease()?;
        let sql = if active_only {
            format!("SELECT {} FROM fraud_rules WHERE active = 1 ORDER BY created_at DESC", Self::SELECT_COLUMNS)
        } else {
            format!("SELECT {} FROM fraud_rules ORDER BY created_at DESC", Self::SELECT_COLUMNS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_rule)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_active(&self, id: &str, active: bool) -> anyhow::Result<bool> {
        let conn = self.pool.lease()?;
        let updated = conn.execute(
            "UPDATE fraud_rules SET active = ?1, updated_at = ?2 WHERE rule_id = ?3",
            params![active as i64, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }
}

pub async fn handle_list_fraud_rules(store: &FraudRuleStore, req: Request) -> Result<Response, HandlerError> {
    let active_only = req.query.get("active").map(|v| v == "true").unwrap_or(false);
    let rules = store.list(active_only).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(200, &rules))
}

pub async fn handle_create_fraud_rule(store: &FraudRuleStore, req: Request) -> Result<Response, HandlerError> {
    let body: CreateFraudRuleRequest = req.body_json()?;
    let caller = req.caller_id.clone().ok_or_else(|| HandlerError::new(401, "authentication required"))?;
    let rule = store.create(&body, &caller).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(201, &rule))
}

pub async fn handle_deactivate_fraud_rule(store: &FraudRuleStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    let ok = store.set_active(id, false).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    if !ok {
        return Err(HandlerError::not_found("fraud rule not found"));
    }
    Ok(Response::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use std::time::Duration;

    fn store() -> FraudRuleStore {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        FraudRuleStore::new(pool)
    }

    #[test]
    fn create_then_list_then_deactivate() {
        let store = store();
        let rule = store
            .create(
                &CreateFraudRuleRequest {
                    name: "High velocity".to_string(),
                    description: "Too many transactions in a short window".to_string(),
                    condition_expr: "count(tx, 1h) > 10".to_string(),
                    severity: "high".to_string(),
                },
                "admin-1",
            )
            .unwrap();
        assert!(rule.active);

        assert_eq!(store.list(true).unwrap().len(), 1);
        assert!(store.set_active(&rule.rule_id, false).unwrap());
        assert_eq!(store.list(true).unwrap().len(), 0);
        assert_eq!(store.list(false).unwrap().len(), 1);
    }
}
