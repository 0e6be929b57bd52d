//! Transactions
//! Mission: pending transactions moved to approved/rejected, each
//! transition audited. The audit subject is always the caller's resolved
//! `userId` (see DESIGN.md's Open Question resolution — the source's
//! `user_id = "system"` placeholder is not carried over).

use crate::db::ConnectionPool;
use crate::registry::{HandlerError, Request, Response};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub account_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub risk_score: Option<f64>,
    pub created_by: String,
    pub approved_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub account_id: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize, Default)]
pub struct DecisionNotes {
    #[serde(default)]
    pub notes: Option<String>,
}

pub struct TransactionStore {
    pool: ConnectionPool,
}

impl TransactionStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        Ok(Transaction {
            transaction_id: row.get(0)?,
            account_id: row.get(1)?,
            amount: row.get(2)?,
            currency: row.get(3)?,
            status: row.get(4)?,
            risk_score: row.get(5)?,
            created_by: row.get(6)?,
            approved_by: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    const SELECT_COLUMNS: &'static str =
        "transaction_id, account_id, amount, currency, status, risk_score, created_by, approved_by, created_at, updated_at";

    pub fn create(&self, req: &CreateTransactionRequest, created_by: &str) -> anyhow::Result<Transaction> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO transactions
                (transaction_id, account_id, amount, currency, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?6)",
            params![id, req.account_id, req.amount, req.currency, created_by, now],
        )?;
        self.get(&id)?.ok_or_else(|| anyhow::anyhow!("transaction vanished after insert"))
    }

    pub fn get(&self, id: &str) -> anyhow::Result<Option<Transaction>> {
        let conn = self.pool.lease()?;
        let transaction = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE transaction_id = ?1", Self::SELECT_COLUMNS),
                params![id],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(transaction)
    }

    fn audit(&self, transaction_id: &str, action: &str, actor_id: &str, notes: Option<&str>) -> anyhow::Result<()> {
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO transaction_audit (id, transaction_id, action, actor_id, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                transaction_id,
                action,
                actor_id,
                notes,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Approve a pending transaction. The audit row's `actor_id` is always
    /// the caller's resolved id, never a hardcoded placeholder.
    pub fn approve(&self, id: &str, actor_id: &str, notes: Option<&str>) -> anyhow::Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        let updated = conn.execute(
            "UPDATE transactions SET status = 'approved', approved_by = ?1, updated_at = ?2
             WHERE transaction_id = ?3 AND status = 'pending'",
            params![actor_id, now, id],
        )?;
        drop(conn);
        if updated == 0 {
            return Ok(false);
        }
        self.audit(id, "approve", actor_id, notes)?;
        Ok(true)
    }

    pub fn reject(&self, id: &str, actor_id: &str, notes: Option<&str>) -> anyhow::Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.pool.lease()?;
        let updated = conn.execute(
            "UPDATE transactions SET status = 'rejected', approved_by = ?1, updated_at = ?2
             WHERE transaction_id = ?3 AND status = 'pending'",
            params![actor_id, now, id],
        )?;
        drop(conn);
        if updated == 0 {
            return Ok(false);
        }
        self.audit(id, "reject", actor_id, notes)?;
        Ok(true)
    }
}

fn caller_id(req: &Request) -> Result<String, HandlerError> {
    req.caller_id.clone().ok_or_else(|| HandlerError::new(401, "authentication required"))
}

pub async fn handle_create_transaction(store: &TransactionStore, req: Request) -> Result<Response, HandlerError> {
    let body: CreateTransactionRequest = req.body_json()?;
    let caller = caller_id(&req)?;
    let transaction = store.create(&body, &caller).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(201, &transaction))
}

pub async fn handle_approve_transaction(store: &TransactionStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    let caller = caller_id(&req)?;
    let body: DecisionNotes = if req.body.is_empty() { DecisionNotes::default() } else { req.body_json()? };

    let ok = store
        .approve(id, &caller, body.notes.as_deref())
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    if !ok {
        return Err(HandlerError::not_found("transaction not found or not pending"));
    }
    let transaction = store
        .get(id)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?
        .ok_or_else(|| HandlerError::not_found("transaction not found or not pending"))?;
    Ok(Response::json(200, &transaction))
}

pub async fn handle_reject_transaction(store: &TransactionStore, req: Request) -> Result<Response, HandlerError> {
    let id = req.params.get("id").ok_or_else(|| HandlerError::validation("missing id"))?;
    let caller = caller_id(&req)?;
    let body: DecisionNotes = if req.body.is_empty() { DecisionNotes::default() } else { req.body_json()? };

    let ok = store
        .reject(id, &caller, body.notes.as_deref())
        .map_err(|e| HandlerError::db_failure(e.to_string()))?;
    if !ok {
        return Err(HandlerError::not_found("transaction not found or not pending"));
    }
    let transaction = store
        .get(id)
        .map_err(|e| HandlerError::db_failure(e.to_string()))?
        .ok_or_else(|| HandlerError::not_found("transaction not found or not pending"))?;
    Ok(Response::json(200, &transaction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use std::time::Duration;

    fn store() -> TransactionStore {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        TransactionStore::new(pool)
    }

    #[test]
    fn approve_records_the_caller_as_audit_actor_not_a_placeholder() {
        let store = store();
        let tx = store
            .create(&CreateTransactionRequest { account_id: "acct-1".to_string(), amount: 100.0, currency: "USD".to_string() }, "alice")
            .unwrap();

        assert!(store.approve(&tx.transaction_id, "compliance-officer-1", Some("looks fine")).unwrap());

        let conn = store.pool.lease().unwrap();
        let actor_id: String = conn
            .query_row(
                "SELECT actor_id FROM transaction_audit WHERE transaction_id = ?1",
                params![tx.transaction_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(actor_id, "compliance-officer-1");
    }

    #[test]
    fn reject_is_idempotent_after_approval() {
        let store = store();
        let tx = store
            .create(&CreateTransactionRequest { account_id: "acct-1".to_string(), amount: 50.0, currency: "USD".to_string() }, "alice")
            .unwrap();
        assert!(store.approve(&tx.transaction_id, "admin-1", None).unwrap());
        assert!(!store.reject(&tx.transaction_id, "admin-1", None).unwrap());
    }
}
