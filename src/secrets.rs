//! Encrypted secret storage with rotation history.
//!
//! Values are enciphered by the caller (see [`crate::encryption`]) before
//! they reach this store; the store only ever sees opaque tokens. Rotation
//! appends the old token to `secret_history` and overwrites the live row in
//! one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};
use crate::knowledge::ADMIN_AGENT;

/// Maximum plaintext secret size in bytes (10 KiB).
pub const MAX_VALUE_BYTES: usize = 10_240;

/// Who owns a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Agent,
    Person,
    Device,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Person => "person",
            Self::Device => "device",
        }
    }
}

impl std::str::FromStr for OwnerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "person" => Ok(Self::Person),
            "device" => Ok(Self::Device),
            _ => Err(format!("unknown owner type: {s}")),
        }
    }
}

/// A stored secret. The ciphertext is never serialized into API responses.
#[derive(Debug, Clone, Serialize)]
pub struct Secret {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub encrypted_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Legacy subject list; `*` grants every subject access.
    pub scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_interval_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rotated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub created_by: String,
    pub owner_type: OwnerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One rotation history row: the ciphertext that was live before a rotation.
#[derive(Debug, Clone, Serialize)]
pub struct SecretHistoryEntry {
    pub id: String,
    pub secret_id: String,
    #[serde(skip_serializing)]
    pub encrypted_value: String,
    pub rotated_by: String,
    pub rotated_at: String,
}

/// Input for creating a secret. `encrypted_value` is already a cipher token.
#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    pub name: String,
    pub encrypted_value: String,
    pub description: Option<String>,
    pub scope: Vec<String>,
    pub rotation_interval_days: Option<i64>,
    pub created_by: String,
    pub owner_type: Option<OwnerType>,
    pub owner_id: Option<String>,
}

const COLUMNS: &str = "id, name, encrypted_value, description, scope, rotation_interval_days, \
     last_rotated_at, expires_at, created_by, owner_type, owner_id, created_at, updated_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Secret> {
    let scope: String = row.get(4)?;
    let owner_type: String = row.get(9)?;
    Ok(Secret {
        id: row.get(0)?,
        name: row.get(1)?,
        encrypted_value: row.get(2)?,
        description: row.get(3)?,
        scope: serde_json::from_str(&scope).unwrap_or_default(),
        rotation_interval_days: row.get(5)?,
        last_rotated_at: row.get(6)?,
        expires_at: row.get(7)?,
        created_by: row.get(8)?,
        owner_type: owner_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
        })?,
        owner_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Insert a new secret. The creator becomes the owner unless an owner is
/// given explicitly.
pub fn create(conn: &Connection, input: CreateInput) -> Result<Secret> {
    if input.name.is_empty() {
        return Err(VaultError::Validation("name is required".into()));
    }
    if input.encrypted_value.is_empty() {
        return Err(VaultError::Validation("value is required".into()));
    }

    let id = Uuid::new_v4().to_string();
    let now = db::now();
    let owner_type = input.owner_type.unwrap_or(OwnerType::Agent);
    let owner_id = input.owner_id.clone().or_else(|| Some(input.created_by.clone()));
    let scope_json = serde_json::to_string(&input.scope)?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO secrets (id, name, encrypted_value, description, scope, \
         rotation_interval_days, created_by, owner_type, owner_id, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            id,
            input.name,
            input.encrypted_value,
            input.description,
            scope_json,
            input.rotation_interval_days,
            input.created_by,
            owner_type.as_str(),
            owner_id,
            now,
        ],
    )?;
    if inserted == 0 {
        return Err(VaultError::Conflict("secret"));
    }

    get_by_name(conn, &input.name)?.ok_or(VaultError::NotFound("secret"))
}

/// Fetch a secret (including ciphertext) by name. Access checking is the
/// caller's responsibility.
pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Secret>> {
    let secret = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM secrets WHERE name = ?1"),
            params![name],
            map_row,
        )
        .optional()?;
    Ok(secret)
}

/// List all secrets ordered by name. Ciphertexts stay in the store — the
/// serialized form of [`Secret`] never includes them.
pub fn list(conn: &Connection) -> Result<Vec<Secret>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM secrets ORDER BY name"))?;
    let secrets = stmt
        .query_map([], map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(secrets)
}

/// Overwrite a secret's ciphertext (last-writer-wins, no history row).
pub fn update_value(conn: &Connection, name: &str, encrypted_value: &str) -> Result<()> {
    let affected = conn.execute(
        "UPDATE secrets SET encrypted_value = ?1, updated_at = ?2 WHERE name = ?3",
        params![encrypted_value, db::now(), name],
    )?;
    if affected == 0 {
        return Err(VaultError::NotFound("secret"));
    }
    Ok(())
}

/// Remove a secret. History rows cascade. Callers are expected to also
/// clear associated grants.
pub fn delete(conn: &Connection, name: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM secrets WHERE name = ?1", params![name])?;
    if affected == 0 {
        return Err(VaultError::NotFound("secret"));
    }
    Ok(())
}

/// Rotate a secret: append the live ciphertext to history, then overwrite
/// the live row with the new token. Atomic — on any failure neither the
/// history nor the live row changes.
pub fn rotate(
    conn: &mut Connection,
    name: &str,
    new_encrypted_value: &str,
    rotated_by: &str,
) -> Result<()> {
    let tx = conn.transaction()?;

    let row: Option<(String, String)> = tx
        .query_row(
            "SELECT id, encrypted_value FROM secrets WHERE name = ?1",
            params![name],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (secret_id, old_value) = row.ok_or(VaultError::NotFound("secret"))?;

    let now = db::now();
    tx.execute(
        "INSERT INTO secret_history (id, secret_id, encrypted_value, rotated_by, rotated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![Uuid::new_v4().to_string(), secret_id, old_value, rotated_by, now],
    )?;
    tx.execute(
        "UPDATE secrets SET encrypted_value = ?1, last_rotated_at = ?2, updated_at = ?2 \
         WHERE id = ?3",
        params![new_encrypted_value, now, secret_id],
    )?;

    tx.commit()?;
    Ok(())
}

/// Rotation history for a secret, oldest first.
pub fn history(conn: &Connection, name: &str) -> Result<Vec<SecretHistoryEntry>> {
    let secret_id: Option<String> = conn
        .query_row("SELECT id FROM secrets WHERE name = ?1", params![name], |r| {
            r.get(0)
        })
        .optional()?;
    let secret_id = secret_id.ok_or(VaultError::NotFound("secret"))?;

    let mut stmt = conn.prepare(
        "SELECT id, secret_id, encrypted_value, rotated_by, rotated_at \
         FROM secret_history WHERE secret_id = ?1 ORDER BY rotated_at",
    )?;
    let rows = stmt
        .query_map(params![secret_id], |row| {
            Ok(SecretHistoryEntry {
                id: row.get(0)?,
                secret_id: row.get(1)?,
                encrypted_value: row.get(2)?,
                rotated_by: row.get(3)?,
                rotated_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Legacy access predicate: the admin identity and the owning subject always
/// pass; otherwise the subject must appear in the scope list or the list
/// must contain `*`. An empty scope is owner/admin-only. Upper layers OR
/// this with a grant lookup.
pub fn can_access(secret: &Secret, subject_id: &str) -> bool {
    if subject_id == ADMIN_AGENT {
        return true;
    }
    if secret.owner_id.as_deref() == Some(subject_id) {
        return true;
    }
    secret.scope.iter().any(|s| s == subject_id || s == "*")
}

/// Total number of secrets.
pub fn count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM secrets", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn create_input(name: &str, token: &str, by: &str) -> CreateInput {
        CreateInput {
            name: name.into(),
            encrypted_value: token.into(),
            created_by: by.into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_defaults_owner_to_creator() {
        let conn = test_conn();
        let secret = create(&conn, create_input("api-key", "tok1", "scout")).unwrap();
        assert_eq!(secret.owner_type, OwnerType::Agent);
        assert_eq!(secret.owner_id.as_deref(), Some("scout"));
        assert_eq!(secret.created_by, "scout");
    }

    #[test]
    fn duplicate_name_conflicts() {
        let conn = test_conn();
        create(&conn, create_input("dup", "tok1", "scout")).unwrap();
        let err = create(&conn, create_input("dup", "tok2", "scout")).unwrap_err();
        assert!(matches!(err, VaultError::Conflict("secret")));
    }

    #[test]
    fn list_never_serializes_ciphertext() {
        let conn = test_conn();
        create(&conn, create_input("visible", "supersecret-token", "scout")).unwrap();

        let secrets = list(&conn).unwrap();
        let json = serde_json::to_string(&secrets).unwrap();
        assert!(!json.contains("supersecret-token"));
        assert!(json.contains("visible"));
    }

    #[test]
    fn rotate_appends_exactly_one_history_row() {
        let mut conn = test_conn();
        create(&conn, create_input("rotating", "v1-token", "scout")).unwrap();

        rotate(&mut conn, "rotating", "v2-token", "scout").unwrap();

        let live = get_by_name(&conn, "rotating").unwrap().unwrap();
        assert_eq!(live.encrypted_value, "v2-token");
        assert!(live.last_rotated_at.is_some());

        let hist = history(&conn, "rotating").unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].encrypted_value, "v1-token");
        assert_eq!(hist[0].rotated_by, "scout");

        rotate(&mut conn, "rotating", "v3-token", "lily").unwrap();
        let hist = history(&conn, "rotating").unwrap();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[1].encrypted_value, "v2-token");
    }

    #[test]
    fn rotate_missing_secret_changes_nothing() {
        let mut conn = test_conn();
        let err = rotate(&mut conn, "ghost", "tok", "scout").unwrap_err();
        assert!(matches!(err, VaultError::NotFound("secret")));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM secret_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn delete_cascades_history() {
        let mut conn = test_conn();
        create(&conn, create_input("doomed", "v1", "scout")).unwrap();
        rotate(&mut conn, "doomed", "v2", "scout").unwrap();

        delete(&conn, "doomed").unwrap();
        assert!(get_by_name(&conn, "doomed").unwrap().is_none());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM secret_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);

        assert!(matches!(
            delete(&conn, "doomed").unwrap_err(),
            VaultError::NotFound("secret")
        ));
    }

    #[test]
    fn legacy_access_predicate() {
        let conn = test_conn();
        let mut input = create_input("scoped", "tok", "scout");
        input.scope = vec!["lily".into()];
        let scoped = create(&conn, input).unwrap();

        assert!(can_access(&scoped, "lily"));
        assert!(!can_access(&scoped, "dutybound"));
        assert!(can_access(&scoped, ADMIN_AGENT));

        let locked = create(&conn, create_input("locked", "tok", "scout")).unwrap();
        // Empty scope: only the owner and the admin identity get through.
        assert!(can_access(&locked, "scout"));
        assert!(!can_access(&locked, "lily"));
        assert!(can_access(&locked, ADMIN_AGENT));

        let mut open = create_input("open", "tok", "scout");
        open.scope = vec!["*".into()];
        let open = create(&conn, open).unwrap();
        assert!(can_access(&open, "anyone"));
    }
}
