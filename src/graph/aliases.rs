//! Alias store: external identifiers mapped to canonical entities.
//!
//! An alias is unique on (alias_type, alias_value). It is *pending review*
//! while unreviewed with confidence below 0.9.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};

/// An external identifier pointing at a canonical entity.
#[derive(Debug, Clone, Serialize)]
pub struct Alias {
    pub id: String,
    pub alias_type: String,
    pub alias_value: String,
    pub canonical_id: String,
    pub confidence: f64,
    pub source: String,
    pub reviewed: bool,
    pub created_at: String,
}

const COLUMNS: &str =
    "id, alias_type, alias_value, canonical_id, confidence, source, reviewed, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alias> {
    Ok(Alias {
        id: row.get(0)?,
        alias_type: row.get(1)?,
        alias_value: row.get(2)?,
        canonical_id: row.get(3)?,
        confidence: row.get(4)?,
        source: row.get(5)?,
        reviewed: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}

/// Find an alias by (type, value).
pub fn lookup(conn: &Connection, alias_type: &str, alias_value: &str) -> Result<Option<Alias>> {
    let alias = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM aliases WHERE alias_type = ?1 AND alias_value = ?2"),
            params![alias_type, alias_value],
            map_row,
        )
        .optional()?;
    Ok(alias)
}

/// Insert a new alias. A duplicate (type, value) surfaces as a database
/// constraint error; the resolver turns that into a re-lookup.
pub fn create(
    conn: &Connection,
    alias_type: &str,
    alias_value: &str,
    canonical_id: &str,
    confidence: f64,
    source: &str,
) -> Result<Alias> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO aliases (id, alias_type, alias_value, canonical_id, confidence, source, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, alias_type, alias_value, canonical_id, confidence, source, db::now()],
    )?;
    get(conn, &id)?.ok_or(VaultError::NotFound("alias"))
}

/// Fetch an alias by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Alias>> {
    let alias = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM aliases WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(alias)
}

/// All aliases pointing at a canonical entity, oldest first.
pub fn list_by_canonical(conn: &Connection, canonical_id: &str) -> Result<Vec<Alias>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM aliases WHERE canonical_id = ?1 ORDER BY created_at"
    ))?;
    let aliases = stmt
        .query_map(params![canonical_id], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(aliases)
}

/// Unreviewed aliases with confidence below 0.9, oldest first.
pub fn pending_reviews(conn: &Connection) -> Result<Vec<Alias>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM aliases WHERE reviewed = 0 AND confidence < 0.9 ORDER BY created_at"
    ))?;
    let aliases = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(aliases)
}

/// Approve or reject an alias. Approval marks it reviewed at full
/// confidence; rejection deletes it.
pub fn mark_reviewed(conn: &Connection, id: &str, approved: bool) -> Result<()> {
    let affected = if approved {
        conn.execute(
            "UPDATE aliases SET reviewed = 1, confidence = 1.0 WHERE id = ?1",
            params![id],
        )?
    } else {
        conn.execute("DELETE FROM aliases WHERE id = ?1", params![id])?
    };
    if affected == 0 {
        return Err(VaultError::NotFound("alias"));
    }
    Ok(())
}

/// Move all aliases from one canonical entity to another.
pub fn repoint(conn: &Connection, from_id: &str, to_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE aliases SET canonical_id = ?1 WHERE canonical_id = ?2",
        params![to_id, from_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::entities;

    fn test_conn() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn entity(conn: &Connection, key: &str) -> String {
        entities::create(
            conn,
            entities::CreateInput {
                entity_type: "person".into(),
                key: key.into(),
                display_name: key.into(),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn lookup_after_create() {
        let conn = test_conn();
        let canonical = entity(&conn, "email:a@x");
        create(&conn, "email", "a@x", &canonical, 1.0, "test").unwrap();

        let found = lookup(&conn, "email", "a@x").unwrap().unwrap();
        assert_eq!(found.canonical_id, canonical);
        assert!(!found.reviewed);

        assert!(lookup(&conn, "email", "b@x").unwrap().is_none());
    }

    #[test]
    fn duplicate_alias_is_unique_violation() {
        let conn = test_conn();
        let canonical = entity(&conn, "email:a@x");
        create(&conn, "email", "a@x", &canonical, 1.0, "test").unwrap();
        let err = create(&conn, "email", "a@x", &canonical, 1.0, "test").unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn pending_reviews_filters_by_confidence_and_flag() {
        let conn = test_conn();
        let canonical = entity(&conn, "email:a@x");
        let low = create(&conn, "slack", "U123", &canonical, 0.6, "import").unwrap();
        create(&conn, "email", "a@x", &canonical, 1.0, "test").unwrap();

        let pending = pending_reviews(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, low.id);

        // Approval clears the queue and lifts confidence to 1.0.
        mark_reviewed(&conn, &low.id, true).unwrap();
        assert!(pending_reviews(&conn).unwrap().is_empty());
        let approved = get(&conn, &low.id).unwrap().unwrap();
        assert!(approved.reviewed);
        assert!((approved.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejecting_deletes_the_alias() {
        let conn = test_conn();
        let canonical = entity(&conn, "email:a@x");
        let alias = create(&conn, "slack", "U123", &canonical, 0.6, "import").unwrap();

        mark_reviewed(&conn, &alias.id, false).unwrap();
        assert!(get(&conn, &alias.id).unwrap().is_none());
        assert!(matches!(
            mark_reviewed(&conn, &alias.id, false).unwrap_err(),
            VaultError::NotFound("alias")
        ));
    }

    #[test]
    fn repoint_moves_all_aliases() {
        let conn = test_conn();
        let from = entity(&conn, "email:a@x");
        let to = entity(&conn, "email:b@x");
        create(&conn, "email", "a@x", &from, 1.0, "test").unwrap();
        create(&conn, "slack", "U123", &from, 0.8, "import").unwrap();

        repoint(&conn, &from, &to).unwrap();
        assert!(list_by_canonical(&conn, &from).unwrap().is_empty());
        assert_eq!(list_by_canonical(&conn, &to).unwrap().len(), 2);
    }
}
