//! Graph edge store.
//!
//! Edges are directed, typed, and time-valid: an edge is active while
//! `valid_to` is null. Active `semantic_similarity` edges are unique per
//! (from, to) pair through a partial unique index.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};

/// Edge type used by the similarity scanner.
pub const SEMANTIC_SIMILARITY: &str = "semantic_similarity";

/// A directed, typed, time-valid relationship between two entities.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub confidence: f64,
    pub source: String,
    pub valid_from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Input for creating an edge.
#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: String,
    pub confidence: f64,
    pub source: String,
    pub metadata: Option<serde_json::Value>,
}

const COLUMNS: &str =
    "id, from_id, to_id, type, confidence, source, valid_from, valid_to, metadata, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let metadata: String = row.get(8)?;
    Ok(Edge {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        edge_type: row.get(3)?,
        confidence: row.get(4)?,
        source: row.get(5)?,
        valid_from: row.get(6)?,
        valid_to: row.get(7)?,
        metadata: serde_json::from_str(&metadata)
            .unwrap_or(serde_json::Value::Object(Default::default())),
        created_at: row.get(9)?,
    })
}

/// Insert a new edge with an open validity interval.
pub fn create(conn: &Connection, input: CreateInput) -> Result<Edge> {
    if input.from_id.is_empty() || input.to_id.is_empty() || input.edge_type.is_empty() {
        return Err(VaultError::Validation(
            "from_id, to_id, and type are required".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let metadata = input.metadata.unwrap_or(serde_json::Value::Object(Default::default()));
    let now = db::now();
    conn.execute(
        "INSERT INTO edges (id, from_id, to_id, type, confidence, source, valid_from, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?7)",
        params![
            id,
            input.from_id,
            input.to_id,
            input.edge_type,
            input.confidence,
            input.source,
            now,
            serde_json::to_string(&metadata)?,
        ],
    )?;
    get(conn, &id)?.ok_or(VaultError::NotFound("edge"))
}

/// Fetch an edge by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Edge>> {
    let edge = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM edges WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(edge)
}

/// Active edges originating from an entity, oldest first.
pub fn edges_from(conn: &Connection, entity_id: &str) -> Result<Vec<Edge>> {
    query_edges(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM edges WHERE from_id = ?1 AND valid_to IS NULL ORDER BY created_at"
        ),
        entity_id,
    )
}

/// Active edges pointing at an entity, oldest first.
pub fn edges_to(conn: &Connection, entity_id: &str) -> Result<Vec<Edge>> {
    query_edges(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM edges WHERE to_id = ?1 AND valid_to IS NULL ORDER BY created_at"
        ),
        entity_id,
    )
}

fn query_edges(conn: &Connection, sql: &str, entity_id: &str) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(sql)?;
    let edges = stmt
        .query_map(params![entity_id], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(edges)
}

/// Close an edge by ending its validity interval.
pub fn close(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE edges SET valid_to = ?1 WHERE id = ?2 AND valid_to IS NULL",
        params![db::now(), id],
    )?;
    if affected == 0 {
        return Err(VaultError::NotFound("edge"));
    }
    Ok(())
}

/// Move every edge reference from one entity to another, then drop any
/// self-edges the rewrite produced. `UPDATE OR REPLACE` lets a repointed
/// semantic edge collapse into an existing one instead of failing on the
/// partial unique index (last writer wins).
pub fn repoint(conn: &Connection, from_id: &str, to_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE OR REPLACE edges SET from_id = ?1 WHERE from_id = ?2",
        params![to_id, from_id],
    )?;
    conn.execute(
        "UPDATE OR REPLACE edges SET to_id = ?1 WHERE to_id = ?2",
        params![to_id, from_id],
    )?;
    conn.execute("DELETE FROM edges WHERE from_id = to_id", [])?;
    Ok(())
}

/// Insert a `semantic_similarity` edge or refresh the confidence of the
/// active one covering the same pair.
pub fn upsert_semantic(
    conn: &Connection,
    from_id: &str,
    to_id: &str,
    confidence: f64,
    source: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO edges (id, from_id, to_id, type, confidence, source, valid_from, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '{\"auto_generated\":true}', ?7) \
         ON CONFLICT (from_id, to_id, type) WHERE type = 'semantic_similarity' AND valid_to IS NULL \
         DO UPDATE SET confidence = excluded.confidence, source = excluded.source",
        params![
            Uuid::new_v4().to_string(),
            from_id,
            to_id,
            SEMANTIC_SIMILARITY,
            confidence,
            source,
            db::now(),
        ],
    )?;
    Ok(())
}
