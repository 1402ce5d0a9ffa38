//! Device store. Shaped like [`super::people`] with a device type and an
//! optional owning person.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};

/// A device known to the vault.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str = "id, name, identifier, device_type, owner_id, metadata, created_at, updated_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    let metadata: Option<String> = row.get(5)?;
    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        identifier: row.get(2)?,
        device_type: row.get(3)?,
        owner_id: row.get(4)?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Insert a new device. A duplicate identifier is a conflict.
pub fn create(
    conn: &Connection,
    name: &str,
    identifier: &str,
    device_type: Option<&str>,
    owner_id: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<Device> {
    if name.is_empty() || identifier.is_empty() {
        return Err(VaultError::Validation(
            "name and identifier are required".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO devices \
         (id, name, identifier, device_type, owner_id, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, name, identifier, device_type, owner_id, metadata_json, db::now()],
    )?;
    if inserted == 0 {
        return Err(VaultError::Conflict("device"));
    }
    get_by_id(conn, &id)?.ok_or(VaultError::NotFound("device"))
}

/// Fetch a device by id.
pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<Device>> {
    let device = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM devices WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(device)
}

/// List all devices ordered by name.
pub fn list(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM devices ORDER BY name"))?;
    let devices = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(devices)
}

/// Delete a device. Callers clear the device's grants alongside.
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(VaultError::NotFound("device"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::people;

    fn test_conn() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn create_with_owner() {
        let conn = test_conn();
        let owner = people::create(&conn, "Ada", "ada@example.com", None).unwrap();
        let device = create(
            &conn,
            "laptop",
            "mac:aa:bb",
            Some("laptop"),
            Some(&owner.id),
            None,
        )
        .unwrap();
        assert_eq!(device.owner_id.as_deref(), Some(owner.id.as_str()));
    }

    #[test]
    fn owner_delete_sets_owner_null() {
        let conn = test_conn();
        let owner = people::create(&conn, "Ada", "ada@example.com", None).unwrap();
        let device = create(&conn, "laptop", "mac:aa:bb", None, Some(&owner.id), None).unwrap();

        people::delete(&conn, &owner.id).unwrap();
        let device = get_by_id(&conn, &device.id).unwrap().unwrap();
        assert!(device.owner_id.is_none());
    }

    #[test]
    fn duplicate_identifier_conflicts() {
        let conn = test_conn();
        create(&conn, "a", "mac:aa:bb", None, None, None).unwrap();
        let err = create(&conn, "b", "mac:aa:bb", None, None, None).unwrap_err();
        assert!(matches!(err, VaultError::Conflict("device")));
    }
}
