//! Memory graph
//! Mission: agent-scoped nodes and edges; a bounded graph export for
//! visualization, importance recomputation, and unweighted BFS pathfind.

use crate::db::ConnectionPool;
use crate::domain::knowledge::embed;
use crate::registry::{HandlerError, Request, Response};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

const MAX_GRAPH_NODES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    pub node_id: String,
    pub agent_id: String,
    pub node_type: String,
    pub content: String,
    pub importance: f64,
    pub access_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub edge_id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    pub strength: f64,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    pub agent_id: String,
    pub node_type: String,
    pub content: String,
    #[serde(default = "default_importance")]
    pub importance: f64,
}

fn default_importance() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
pub struct CreateEdgeRequest {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_strength() -> f64 {
    0.5
}

/// Deterministic visualization hints. Not business state: any client may
/// derive the same values independently from node type/importance.
#[derive(Debug, Serialize)]
pub struct VisualNode {
    #[serde(flatten)]
    pub node: MemoryNode,
    pub color: &'static str,
    pub size: f64,
}

fn color_for_type(node_type: &str) -> &'static str {
    match node_type {
        "decision" => "#4C6EF5",
        "observation" => "#12B886",
        "risk" => "#F03E3E",
        "policy" => "#F59F00",
        _ => "#868E96",
    }
}

fn size_for_importance(importance: f64) -> f64 {
    8.0 + importance.clamp(0.0, 1.0) * 24.0
}

#[derive(Debug, Serialize)]
pub struct GraphPayload {
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<MemoryEdge>,
}

pub struct MemoryStore {
    pool: ConnectionPool,
}

impl MemoryStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<MemoryNode> {
        Ok(MemoryNode {
            node_id: row.get(0)?,
            agent_id: row.get(1)?,
            node_type: row.get(2)?,
            content: row.get(3)?,
            importance: row.get(4)?,
            access_count: row.get::<_, i64>(5)? as u32,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    const SELECT_NODE_COLUMNS: &'static str =
        "node_id, agent_id, node_type, content, importance, access_count, created_at, updated_at";

    pub fn create_node(&self, req: &CreateNodeRequest) -> anyhow::Result<MemoryNode> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let embedding = serde_json::to_string(&embed(&req.content))?;

        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO memory_nodes
                (node_id, agent_id, node_type, content, importance, access_count, embedding, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
            params![id, req.agent_id, req.node_type, req.content, req.importance.clamp(0.0, 1.0), embedding, now],
        )?;

        Ok(MemoryNode {
            node_id: id,
            agent_id: req.agent_id.clone(),
            node_type: req.node_type.clone(),
            content: req.content.clone(),
            importance: req.importance.clamp(0.0, 1.0),
            access_count: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn create_edge(&self, req: &CreateEdgeRequest) -> anyhow::Result<MemoryEdge> {
        let id = uuid::Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&req.metadata)?;
        let conn = self.pool.lease()?;
        conn.execute(
            "INSERT INTO memory_edges (edge_id, source_id, target_id, edge_type, strength, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, req.source_id, req.target_id, req.edge_type, req.strength.clamp(0.0, 1.0), metadata_json],
        )?;
        Ok(MemoryEdge {
            edge_id: id,
            source_id: req.source_id.clone(),
            target_id: req.target_id.clone(),
            edge_type: req.edge_type.clone(),
            strength: req.strength.clamp(0.0, 1.0),
            metadata: req.metadata.clone(),
        })
    }

    fn nodes_for_agent(&self, agent_id: &str) -> anyhow::Result<Vec<MemoryNode>> {
        let conn = self.pool.lease()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memory_nodes WHERE agent_id = ?1 ORDER BY importance DESC",
            Self::SELECT_NODE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![agent_id], Self::row_to_node)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn all_edges(&self) -> anyhow::Result<Vec<MemoryEdge>> {
        let conn = self.pool.lease()?;
        let mut stmt = conn.prepare("SELECT edge_id, source_id, target_id, edge_type, strength, metadata FROM memory_edges")?;
        let rows = stmt.query_map([], |row| {
            let metadata_json: String = row.get(5)?;
            Ok(MemoryEdge {
                edge_id: row.get(0)?,
                source_id: row.get(1)?,
                target_id: row.get(2)?,
                edge_type: row.get(3)?,
                strength: row.get(4)?,
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Up to 100 of `agentId`'s nodes (highest importance first) plus every
    /// edge whose endpoints are both in that set.
    pub fn graph_for_agent(&self, agent_id: &str) -> anyhow::Result<GraphPayload> {
        let mut nodes = self.nodes_for_agent(agent_id)?;
        nodes.truncate(MAX_GRAPH_NODES);
        let node_ids: HashSet<String> = nodes.iter().map(|n| n.node_id.clone()).collect();

        let edges = self
            .all_edges()?
            .into_iter()
            .filter(|e| node_ids.contains(&e.source_id) && node_ids.contains(&e.target_id))
            .collect();

        let visual_nodes = nodes
            .into_iter()
            .map(|node| VisualNode {
                color: color_for_type(&node.node_type),
                size: size_for_importance(node.importance),
                node,
            })
            .collect();

        Ok(GraphPayload { nodes: visual_nodes, edges })
    }

    /// Unweighted BFS over the union of outbound and inbound edges.
    pub fn find_path(&self, from: &str, to: &str) -> anyhow::Result<Option<Vec<String>>> {
        if from == to {
            return Ok(Some(vec![from.to_string()]));
        }

        let edges = self.all_edges()?;
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &edges {
            adjacency.entry(edge.source_id.clone()).or_default().push(edge.target_id.clone());
            adjacency.entry(edge.target_id.clone()).or_default().push(edge.source_id.clone());
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut parent: HashMap<String, String> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        visited.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(prev) = parent.get(&cursor) {
                    path.push(prev.clone());
                    cursor = prev.clone();
                }
                path.reverse();
                return Ok(Some(path));
            }
            for neighbor in adjacency.get(&current).cloned().unwrap_or_default() {
                if visited.insert(neighbor.clone()) {
                    parent.insert(neighbor.clone(), current.clone());
                    queue.push_back(neighbor);
                }
            }
        }

        Ok(None)
    }

    /// `newImportance = 0.3*normalizedAccess + 0.4*normalizedRelationshipCount + 0.3*prior`.
    /// Normalization caps both access count and relationship count at 100.
    pub fn recompute_importance(&self, node_id: &str) -> anyhow::Result<f64> {
        let conn = self.pool.lease()?;
        let (access_count, prior): (i64, f64) = conn.query_row(
            "SELECT access_count, importance FROM memory_nodes WHERE node_id = ?1",
            params![node_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let relationship_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_edges WHERE source_id = ?1 OR target_id = ?1",
            params![node_id],
            |row| row.get(0),
        )?;

        let normalized_access = (access_count as f64 / 100.0).min(1.0);
        let normalized_relationships = (relationship_count as f64 / 100.0).min(1.0);
        let new_importance = (0.3 * normalized_access + 0.4 * normalized_relationships + 0.3 * prior).clamp(0.0, 1.0);

        conn.execute(
            "UPDATE memory_nodes SET importance = ?1, updated_at = ?2 WHERE node_id = ?3",
            params![new_importance, chrono::Utc::now().to_rfc3339(), node_id],
        )?;

        Ok(new_importance)
    }

    pub fn record_access(&self, node_id: &str) -> anyhow::Result<()> {
        let conn = self.pool.lease()?;
        conn.execute(
            "UPDATE memory_nodes SET access_count = access_count + 1 WHERE node_id = ?1",
            params![node_id],
        )?;
        Ok(())
    }
}

pub async fn handle_create_node(store: &MemoryStore, req: Request) -> Result<Response, HandlerError> {
    let body: CreateNodeRequest = req.body_json()?;
    let node = store.create_node(&body).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(201, &node))
}

pub async fn handle_graph_for_agent(store: &MemoryStore, req: Request) -> Result<Response, HandlerError> {
    let agent_id = req.query.get("agent_id").ok_or_else(|| HandlerError::validation("missing agent_id"))?;
    let graph = store.graph_for_agent(agent_id).map_err(|e| HandlerError::db_failure(e.to_string()))?;
    Ok(Response::json(200, &graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PoolConfig;
    use std::time::Duration;

    fn store() -> MemoryStore {
        let pool = ConnectionPool::new(PoolConfig {
            path: ":memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(1),
        })
        .unwrap();
        pool.bootstrap(crate::db::schema::BOOTSTRAP_DDL).unwrap();
        MemoryStore::new(pool)
    }

    #[test]
    fn graph_for_agent_only_includes_edges_within_node_set() {
        let store = store();
        let a = store.create_node(&CreateNodeRequest { agent_id: "agent-1".to_string(), node_type: "observation".to_string(), content: "a".to_string(), importance: 0.9 }).unwrap();
        let b = store.create_node(&CreateNodeRequest { agent_id: "agent-1".to_string(), node_type: "observation".to_string(), content: "b".to_string(), importance: 0.5 }).unwrap();
        let c = store.create_node(&CreateNodeRequest { agent_id: "agent-2".to_string(), node_type: "observation".to_string(), content: "c".to_string(), importance: 0.9 }).unwrap();

        store.create_edge(&CreateEdgeRequest { source_id: a.node_id.clone(), target_id: b.node_id.clone(), edge_type: "relates_to".to_string(), strength: 0.5, metadata: HashMap::new() }).unwrap();
        store.create_edge(&CreateEdgeRequest { source_id: a.node_id.clone(), target_id: c.node_id.clone(), edge_type: "relates_to".to_string(), strength: 0.5, metadata: HashMap::new() }).unwrap();

        let graph = store.graph_for_agent("agent-1").unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn bfs_finds_shortest_path_across_hops() {
        let store = store();
        let a = store.create_node(&CreateNodeRequest { agent_id: "agent-1".to_string(), node_type: "observation".to_string(), content: "a".to_string(), importance: 0.5 }).unwrap();
        let b = store.create_node(&CreateNodeRequest { agent_id: "agent-1".to_string(), node_type: "observation".to_string(), content: "b".to_string(), importance: 0.5 }).unwrap();
        let c = store.create_node(&CreateNodeRequest { agent_id: "agent-1".to_string(), node_type: "observation".to_string(), content: "c".to_string(), importance: 0.5 }).unwrap();

        store.create_edge(&CreateEdgeRequest { source_id: a.node_id.clone(), target_id: b.node_id.clone(), edge_type: "relates_to".to_string(), strength: 0.5, metadata: HashMap::new() }).unwrap();
        store.create_edge(&CreateEdgeRequest { source_id: b.node_id.clone(), target_id: c.node_id.clone(), edge_type: "relates_to".to_string(), strength: 0.5, metadata: HashMap::new() }).unwrap();

        let path = store.find_path(&a.node_id, &c.node_id).unwrap().unwrap();
        assert_eq!(path, vec![a.node_id, b.node_id, c.node_id]);
    }

    #[test]
    fn importance_recompute_blends_access_relationships_and_prior() {
        let store = store();
        let a = store.create_node(&CreateNodeRequest { agent_id: "agent-1".to_string(), node_type: "observation".to_string(), content: "a".to_string(), importance: 0.5 }).unwrap();
        for _ in 0..50 {
            store.record_access(&a.node_id).unwrap();
        }
        let updated = store.recompute_importance(&a.node_id).unwrap();
        assert!(updated > 0.5);
    }
}
