//! Graph entity store.
//!
//! An entity's `key` (conventionally `"<alias_type>:<alias_value>"`) stays
//! unique across live and tombstoned rows, so a soft-deleted entity still
//! blocks key reuse.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};

/// A context-graph entity.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub key: String,
    pub display_name: String,
    pub summary: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl Entity {
    /// True when the entity has not been soft-deleted.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Input for creating an entity.
#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    pub entity_type: String,
    pub key: String,
    pub display_name: String,
    pub summary: String,
    pub metadata: Option<serde_json::Value>,
}

const COLUMNS: &str =
    "id, entity_type, key, display_name, summary, metadata, created_at, updated_at, deleted_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let metadata: String = row.get(5)?;
    Ok(Entity {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        key: row.get(2)?,
        display_name: row.get(3)?,
        summary: row.get(4)?,
        metadata: serde_json::from_str(&metadata)
            .unwrap_or(serde_json::Value::Object(Default::default())),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        deleted_at: row.get(8)?,
    })
}

/// Insert a new entity. A duplicate key surfaces as a database constraint
/// error; the identity resolver relies on that to detect creation races.
pub fn create(conn: &Connection, input: CreateInput) -> Result<Entity> {
    if input.entity_type.is_empty() || input.key.is_empty() {
        return Err(VaultError::Validation(
            "entity_type and key are required".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let metadata = input.metadata.unwrap_or(serde_json::Value::Object(Default::default()));
    conn.execute(
        "INSERT INTO entities (id, entity_type, key, display_name, summary, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id,
            input.entity_type,
            input.key,
            input.display_name,
            input.summary,
            serde_json::to_string(&metadata)?,
            db::now(),
        ],
    )?;
    get(conn, &id)?.ok_or(VaultError::NotFound("entity"))
}

/// Fetch an entity by id, tombstoned or not. Callers that only want live
/// rows check [`Entity::is_live`].
pub fn get(conn: &Connection, id: &str) -> Result<Option<Entity>> {
    let entity = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM entities WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(entity)
}

/// Fetch an entity by its unique key.
pub fn get_by_key(conn: &Connection, key: &str) -> Result<Option<Entity>> {
    let entity = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM entities WHERE key = ?1"),
            params![key],
            map_row,
        )
        .optional()?;
    Ok(entity)
}

/// List non-deleted entities, newest first, optionally filtered by type.
pub fn list(
    conn: &Connection,
    entity_type: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Entity>> {
    let limit = if limit <= 0 || limit > 100 { 50 } else { limit };
    let offset = offset.max(0);

    let mut stmt;
    let rows = match entity_type {
        Some(t) => {
            stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM entities \
                 WHERE deleted_at IS NULL AND entity_type = ?1 \
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            stmt.query_map(params![t, limit, offset], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM entities WHERE deleted_at IS NULL \
                 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            stmt.query_map(params![limit, offset], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(rows)
}

/// Update the mutable fields of a live entity. Touches `updated_at`, which
/// flags the entity for re-embedding.
pub fn update(
    conn: &Connection,
    id: &str,
    display_name: Option<&str>,
    summary: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<Entity> {
    let now = db::now();
    if let Some(display_name) = display_name {
        conn.execute(
            "UPDATE entities SET display_name = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            params![display_name, now, id],
        )?;
    }
    if let Some(summary) = summary {
        conn.execute(
            "UPDATE entities SET summary = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            params![summary, now, id],
        )?;
    }
    if let Some(metadata) = metadata {
        conn.execute(
            "UPDATE entities SET metadata = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
            params![serde_json::to_string(metadata)?, now, id],
        )?;
    }
    match get(conn, id)? {
        Some(e) if e.is_live() => Ok(e),
        _ => Err(VaultError::NotFound("entity")),
    }
}

/// Soft-delete an entity. Fails when the entity is missing or already
/// tombstoned.
pub fn soft_delete(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE entities SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![db::now(), id],
    )?;
    if affected == 0 {
        return Err(VaultError::NotFound("entity"));
    }
    Ok(())
}

/// Ids of every live entity, oldest first. Used by the semantic worker,
/// which walks the full population.
pub fn list_live_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM entities WHERE deleted_at IS NULL ORDER BY created_at")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Bump `updated_at` so the semantic worker re-embeds the entity.
pub fn touch(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE entities SET updated_at = ?1 WHERE id = ?2",
        params![db::now(), id],
    )?;
    if affected == 0 {
        return Err(VaultError::NotFound("entity"));
    }
    Ok(())
}

/// Total number of live entities.
pub fn count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
