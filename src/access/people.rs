//! Person store.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};

/// A person known to the vault. The identifier (email, handle) is unique.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, name, identifier, metadata, created_at, updated_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let metadata: Option<String> = row.get(3)?;
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        identifier: row.get(2)?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Insert a new person. A duplicate identifier is a conflict.
pub fn create(
    conn: &Connection,
    name: &str,
    identifier: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<Person> {
    if name.is_empty() || identifier.is_empty() {
        return Err(VaultError::Validation(
            "name and identifier are required".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO people (id, name, identifier, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, name, identifier, metadata_json, db::now()],
    )?;
    if inserted == 0 {
        return Err(VaultError::Conflict("person"));
    }
    get_by_id(conn, &id)?.ok_or(VaultError::NotFound("person"))
}

/// Fetch a person by id.
pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Person>> {
    let person = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM people WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(person)
}

/// List all people ordered by name.
pub fn list(conn: &Connection) -> Result<Vec<Person>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM people ORDER BY name"))?;
    let people = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(people)
}

/// Update a person's name and/or metadata.
pub fn update(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<Person> {
    let now = db::now();
    if let Some(name) = name {
        conn.execute(
            "UPDATE people SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, now, id],
        )?;
    }
    if let Some(metadata) = metadata {
        conn.execute(
            "UPDATE people SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(metadata)?, now, id],
        )?;
    }
    get_by_id(conn, id)?.ok_or(VaultError::NotFound("person"))
}

/// Delete a person. Callers clear the person's grants alongside.
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM people WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(VaultError::NotFound("person"));
    }
    Ok(())
}
