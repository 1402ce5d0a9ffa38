//! Append-only audit log.
//!
//! Every write path in the vault emits one audit row. Writes are
//! best-effort: [`log_best_effort`] swallows failures after reporting them
//! through tracing, so an audit problem can never fail the primary
//! operation.

use rusqlite::{params, Connection, ToSql};
use serde::Serialize;

use crate::db;
use crate::error::Result;

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    KnowledgeRead,
    KnowledgeWrite,
    KnowledgeSearch,
    KnowledgeDelete,
    SecretRead,
    SecretWrite,
    SecretDelete,
    SecretRotate,
    BriefingGenerate,
    GraphRead,
    GraphWrite,
    IdentityResolve,
    IdentityMerge,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KnowledgeRead => "knowledge.read",
            Self::KnowledgeWrite => "knowledge.write",
            Self::KnowledgeSearch => "knowledge.search",
            Self::KnowledgeDelete => "knowledge.delete",
            Self::SecretRead => "secret.read",
            Self::SecretWrite => "secret.write",
            Self::SecretDelete => "secret.delete",
            Self::SecretRotate => "secret.rotate",
            Self::BriefingGenerate => "briefing.generate",
            Self::GraphRead => "graph.read",
            Self::GraphWrite => "graph.write",
            Self::IdentityResolve => "identity.resolve",
            Self::IdentityMerge => "identity.merge",
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// Append one audit row.
pub fn log(
    conn: &Connection,
    action: Action,
    agent_id: &str,
    resource_id: Option<&str>,
    ip_address: Option<&str>,
    success: bool,
    metadata: Option<&serde_json::Value>,
) -> Result<()> {
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO access_log (action, agent_id, resource_id, ip_address, success, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            action.as_str(),
            agent_id,
            resource_id,
            ip_address,
            success,
            metadata_json,
            db::now(),
        ],
    )?;
    Ok(())
}

/// Append one audit row, logging (but not propagating) failures.
pub fn log_best_effort(
    conn: &Connection,
    action: Action,
    agent_id: &str,
    resource_id: Option<&str>,
    success: bool,
) {
    if let Err(err) = log(conn, action, agent_id, resource_id, None, success, None) {
        tracing::warn!(action = action.as_str(), %err, "audit write failed");
    }
}

/// Query the audit log, newest first, with optional filters.
pub fn query(
    conn: &Connection,
    agent_id: Option<&str>,
    action: Option<&str>,
    limit: i64,
) -> Result<Vec<AuditEntry>> {
    let limit = if limit <= 0 || limit > 100 { 50 } else { limit };

    let mut conditions = vec!["1=1".to_string()];
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    if let Some(agent_id) = agent_id {
        args.push(Box::new(agent_id.to_string()));
        conditions.push(format!("agent_id = ?{}", args.len()));
    }
    if let Some(action) = action {
        args.push(Box::new(action.to_string()));
        conditions.push(format!("action = ?{}", args.len()));
    }

    let sql = format!(
        "SELECT id, action, agent_id, resource_id, ip_address, success, metadata, created_at \
         FROM access_log WHERE {} ORDER BY created_at DESC, id DESC LIMIT {limit}",
        conditions.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let entries = stmt
        .query_map(param_refs.as_slice(), |row| {
            let metadata: Option<String> = row.get(6)?;
            Ok(AuditEntry {
                id: row.get(0)?,
                action: row.get(1)?,
                agent_id: row.get(2)?,
                resource_id: row.get(3)?,
                ip_address: row.get(4)?,
                success: row.get::<_, i64>(5)? != 0,
                metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
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

    #[test]
    fn log_and_query_with_filters() {
        let conn = test_conn();
        log(&conn, Action::KnowledgeWrite, "scout", Some("k1"), None, true, None).unwrap();
        log(&conn, Action::SecretRead, "lily", Some("s1"), None, false, None).unwrap();

        let all = query(&conn, None, None, 50).unwrap();
        assert_eq!(all.len(), 2);

        let by_agent = query(&conn, Some("scout"), None, 50).unwrap();
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].action, "knowledge.write");
        assert!(by_agent[0].success);

        let by_action = query(&conn, None, Some("secret.read"), 50).unwrap();
        assert_eq!(by_action.len(), 1);
        assert!(!by_action[0].success);
    }

    #[test]
    fn metadata_round_trips() {
        let conn = test_conn();
        let meta = serde_json::json!({"reason": "rotation", "attempt": 2});
        log(
            &conn,
            Action::SecretRotate,
            "scout",
            Some("s1"),
            None,
            true,
            Some(&meta),
        )
        .unwrap();

        let rows = query(&conn, None, None, 10).unwrap();
        assert_eq!(rows[0].metadata.as_ref().unwrap()["reason"], "rotation");
    }
}
