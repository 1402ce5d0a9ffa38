//! Access grant store.
//!
//! Grants are unique per (resource, subject) pair. `CheckAccessWithPermission`
//! matches when the stored permission equals the requested one or is `admin`.

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};

/// Permission tier on a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("unknown permission: {s}")),
        }
    }
}

/// A stored access grant.
#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub subject_type: String,
    pub subject_id: String,
    pub permission: Permission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<String>,
    pub created_at: String,
}

/// Input for creating an access grant.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateInput {
    pub resource_type: String,
    pub resource_id: String,
    pub subject_type: String,
    pub subject_id: String,
    pub permission: Permission,
    #[serde(default)]
    pub granted_by: Option<String>,
}

/// Optional exact-match filters for [`list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
}

const COLUMNS: &str =
    "id, resource_type, resource_id, subject_type, subject_id, permission, granted_by, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessGrant> {
    let permission: String = row.get(5)?;
    Ok(AccessGrant {
        id: row.get(0)?,
        resource_type: row.get(1)?,
        resource_id: row.get(2)?,
        subject_type: row.get(3)?,
        subject_id: row.get(4)?,
        permission: permission.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
        })?,
        granted_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Insert a grant. A duplicate (resource, subject) pair is a conflict.
pub fn create(conn: &Connection, input: CreateInput) -> Result<AccessGrant> {
    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO access_grants \
         (id, resource_type, resource_id, subject_type, subject_id, permission, granted_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            input.resource_type,
            input.resource_id,
            input.subject_type,
            input.subject_id,
            input.permission.as_str(),
            input.granted_by,
            db::now(),
        ],
    )?;
    if inserted == 0 {
        return Err(VaultError::Conflict("grant"));
    }
    get_by_id(conn, &id)?.ok_or(VaultError::NotFound("grant"))
}

/// Fetch a grant by id.
pub fn get_by_id(conn: &Connection, id: &str) -> Result<Option<AccessGrant>> {
    let grant = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM access_grants WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()?;
    Ok(grant)
}

/// List grants, newest first, with optional exact-match filters.
pub fn list(conn: &Connection, filter: &ListFilter) -> Result<Vec<AccessGrant>> {
    let mut conditions = vec!["1=1".to_string()];
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    for (column, value) in [
        ("resource_type", &filter.resource_type),
        ("resource_id", &filter.resource_id),
        ("subject_type", &filter.subject_type),
        ("subject_id", &filter.subject_id),
    ] {
        if let Some(value) = value {
            args.push(Box::new(value.clone()));
            conditions.push(format!("{column} = ?{}", args.len()));
        }
    }

    let sql = format!(
        "SELECT {COLUMNS} FROM access_grants WHERE {} ORDER BY created_at DESC",
        conditions.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let grants = stmt
        .query_map(param_refs.as_slice(), map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(grants)
}

/// True when any grant exists for the (subject, resource) pair.
pub fn check_access(
    conn: &Connection,
    subject_type: &str,
    subject_id: &str,
    resource_type: &str,
    resource_id: &str,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM access_grants \
         WHERE subject_type = ?1 AND subject_id = ?2 \
           AND resource_type = ?3 AND resource_id = ?4",
        params![subject_type, subject_id, resource_type, resource_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// True when a grant at the requested tier exists. `admin` satisfies any
/// requested permission.
pub fn check_access_with_permission(
    conn: &Connection,
    subject_type: &str,
    subject_id: &str,
    resource_type: &str,
    resource_id: &str,
    permission: Permission,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM access_grants \
         WHERE subject_type = ?1 AND subject_id = ?2 \
           AND resource_type = ?3 AND resource_id = ?4 \
           AND (permission = ?5 OR permission = 'admin')",
        params![
            subject_type,
            subject_id,
            resource_type,
            resource_id,
            permission.as_str()
        ],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Delete a grant by id. Reports not-found if nothing was removed.
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM access_grants WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(VaultError::NotFound("grant"));
    }
    Ok(())
}

/// Remove every grant on a resource (used when the resource is deleted).
pub fn delete_by_resource(conn: &Connection, resource_type: &str, resource_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM access_grants WHERE resource_type = ?1 AND resource_id = ?2",
        params![resource_type, resource_id],
    )?;
    Ok(())
}

/// Remove every grant held by a subject (used when the subject is deleted).
pub fn delete_by_subject(conn: &Connection, subject_type: &str, subject_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM access_grants WHERE subject_type = ?1 AND subject_id = ?2",
        params![subject_type, subject_id],
    )?;
    Ok(())
}

/// Total number of grants.
pub fn count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM access_grants", [], |row| row.get(0))?;
    Ok(count)
}
