//! Provenance: append-only records tying a change to an external source.
//!
//! The optional idempotency key guarantees an external event is recorded at
//! most once; a replay is silently absorbed.

use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::Result;

/// A provenance record.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub id: String,
    pub target_id: String,
    pub target_type: String,
    pub source_system: String,
    pub source_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_idempotency_key: Option<String>,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: String,
}

/// Input for appending a provenance record.
#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    pub target_id: String,
    pub target_type: String,
    pub source_system: String,
    pub source_ref: String,
    pub source_idempotency_key: Option<String>,
    pub snippet: String,
    pub agent_id: Option<String>,
}

/// Append a provenance record. Returns `false` when an idempotency-key
/// duplicate was absorbed instead of inserted.
pub fn create(conn: &Connection, input: CreateInput) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO provenance \
         (id, target_id, target_type, source_system, source_ref, source_idempotency_key, snippet, agent_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            Uuid::new_v4().to_string(),
            input.target_id,
            input.target_type,
            input.source_system,
            input.source_ref,
            input.source_idempotency_key,
            input.snippet,
            input.agent_id,
            db::now(),
        ],
    )?;
    Ok(inserted > 0)
}

/// Provenance records for a target, oldest first.
pub fn list_by_target(
    conn: &Connection,
    target_id: &str,
    target_type: &str,
) -> Result<Vec<Provenance>> {
    let mut stmt = conn.prepare(
        "SELECT id, target_id, target_type, source_system, source_ref, source_idempotency_key, \
                snippet, agent_id, created_at \
         FROM provenance WHERE target_id = ?1 AND target_type = ?2 ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map(params![target_id, target_type], |row| {
            Ok(Provenance {
                id: row.get(0)?,
                target_id: row.get(1)?,
                target_type: row.get(2)?,
                source_system: row.get(3)?,
                source_ref: row.get(4)?,
                source_idempotency_key: row.get(5)?,
                snippet: row.get(6)?,
                agent_id: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
