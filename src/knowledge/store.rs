//! Knowledge write/read path — create, get, list, update, soft delete.
//!
//! All writes run inside a transaction that keeps the `knowledge` row and the
//! `knowledge_vec` index entry in sync. Visibility is enforced on every read
//! through the scope predicate: an unauthorised requester cannot tell a
//! private entry from a missing one.

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};
use crate::knowledge::types::{
    Category, CreateInput, Filter, KnowledgeEntry, Scope, UpdateInput,
};
use crate::knowledge::{ADMIN_AGENT, MAX_CONTENT_BYTES};

/// Column list shared by every knowledge SELECT. Order matches [`map_row`].
pub(crate) const COLUMNS: &str = "id, content, summary, source_agent, category, scope, \
     shared_with, tags, metadata, source_event_id, confidence, relevance_decay, \
     expires_at, superseded_by, created_at, updated_at";

/// Map a row selected with [`COLUMNS`] into a [`KnowledgeEntry`].
pub(crate) fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let category: String = row.get(4)?;
    let scope: String = row.get(5)?;
    let shared_with: String = row.get(6)?;
    let tags: String = row.get(7)?;
    let metadata: Option<String> = row.get(8)?;
    let decay: String = row.get(11)?;

    Ok(KnowledgeEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        summary: row.get(2)?,
        source_agent: row.get(3)?,
        category: category.parse().map_err(|e: String| conversion_err(4, e))?,
        scope: scope.parse().map_err(|e: String| conversion_err(5, e))?,
        shared_with: serde_json::from_str(&shared_with).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
        source_event_id: row.get(9)?,
        confidence: row.get(10)?,
        relevance_decay: decay.parse().map_err(|e: String| conversion_err(11, e))?,
        expires_at: row.get(12)?,
        superseded_by: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

/// Visibility predicate: an agent sees an entry iff it owns it, is the admin
/// identity, the entry is public, or the entry is shared with it (or `*`).
pub fn can_access(entry: &KnowledgeEntry, agent_id: &str) -> bool {
    if entry.source_agent == agent_id || agent_id == ADMIN_AGENT {
        return true;
    }
    match entry.scope {
        Scope::Public => true,
        Scope::Private => false,
        Scope::Shared => entry
            .shared_with
            .iter()
            .any(|a| a == agent_id || a == "*"),
    }
}

/// The same predicate as [`can_access`], as a SQL fragment. Binds the agent
/// id twice (`?n` for ownership/admin, `?n+1` inside the shared_with probe).
fn visibility_sql(agent_param: usize) -> String {
    format!(
        "(scope = 'public' OR source_agent = ?{p} OR ?{p} = '{admin}' \
          OR (scope = 'shared' AND EXISTS (\
              SELECT 1 FROM json_each(knowledge.shared_with) \
              WHERE json_each.value = ?{p} OR json_each.value = '*')))",
        p = agent_param,
        admin = ADMIN_AGENT,
    )
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.len() != db::EMBEDDING_DIM {
        return Err(VaultError::Validation(format!(
            "embedding must have {} dimensions, got {}",
            db::EMBEDDING_DIM,
            embedding.len()
        )));
    }
    Ok(())
}

/// Insert a new knowledge entry, with its vector index row when an embedding
/// is present. Applies the documented defaults: confidence 0.8, decay slow,
/// scope public, category discovery.
pub fn create(conn: &mut Connection, input: CreateInput) -> Result<KnowledgeEntry> {
    if input.content.is_empty() {
        return Err(VaultError::Validation("content is required".into()));
    }
    if input.content.len() > MAX_CONTENT_BYTES {
        return Err(VaultError::Validation("content exceeds 100KiB limit".into()));
    }
    if input.source_agent.is_empty() {
        return Err(VaultError::Validation("source_agent is required".into()));
    }
    let confidence = input.confidence.unwrap_or(0.8);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(VaultError::Validation(
            "confidence must be between 0 and 1".into(),
        ));
    }
    if let Some(embedding) = &input.embedding {
        validate_embedding(embedding)?;
    }

    let category = input.category.unwrap_or(Category::Discovery);
    let scope = input.scope.unwrap_or(Scope::Public);
    let decay = input.relevance_decay.unwrap_or(crate::knowledge::types::Decay::Slow);

    let id = Uuid::new_v4().to_string();
    let now = db::now();
    let shared_with_json = serde_json::to_string(&input.shared_with)?;
    let tags_json = serde_json::to_string(&input.tags)?;
    let metadata_json = input
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO knowledge (id, content, summary, source_agent, category, scope, \
         shared_with, tags, metadata, source_event_id, confidence, relevance_decay, \
         expires_at, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            id,
            input.content,
            input.summary,
            input.source_agent,
            category.as_str(),
            scope.as_str(),
            shared_with_json,
            tags_json,
            metadata_json,
            input.source_event_id,
            confidence,
            decay.as_str(),
            input.expires_at,
            now,
        ],
    )?;

    if let Some(embedding) = &input.embedding {
        tx.execute(
            "INSERT INTO knowledge_vec (id, embedding) VALUES (?1, ?2)",
            params![id, db::embedding_to_bytes(embedding)],
        )?;
    }
    tx.commit()?;

    Ok(KnowledgeEntry {
        id,
        content: input.content,
        summary: input.summary,
        source_agent: input.source_agent,
        category,
        scope,
        shared_with: input.shared_with,
        tags: input.tags,
        metadata: input.metadata,
        source_event_id: input.source_event_id,
        confidence,
        relevance_decay: decay,
        expires_at: input.expires_at,
        superseded_by: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Fetch an entry by id. Returns `None` when the entry is missing, soft
/// deleted, or not visible to the requester.
pub fn get(conn: &Connection, id: &str, agent_id: &str) -> Result<Option<KnowledgeEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM knowledge WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            map_row,
        )
        .optional()?;

    Ok(entry.filter(|e| can_access(e, agent_id)))
}

/// List entries matching the filter, newest first, with the same visibility
/// predicate as [`get`]. Tag filtering requires every listed tag.
pub fn list(conn: &Connection, filter: &Filter) -> Result<Vec<KnowledgeEntry>> {
    let mut conditions = vec!["deleted_at IS NULL".to_string()];
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(category) = filter.category {
        args.push(Box::new(category.as_str()));
        conditions.push(format!("category = ?{}", args.len()));
    }
    if let Some(scope) = filter.scope {
        args.push(Box::new(scope.as_str()));
        conditions.push(format!("scope = ?{}", args.len()));
    }
    if let Some(agent) = &filter.source_agent {
        args.push(Box::new(agent.clone()));
        conditions.push(format!("source_agent = ?{}", args.len()));
    }
    for tag in &filter.tags {
        args.push(Box::new(tag.clone()));
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM json_each(knowledge.tags) WHERE json_each.value = ?{})",
            args.len()
        ));
    }

    args.push(Box::new(filter.agent_id.clone()));
    conditions.push(visibility_sql(args.len()));

    let limit = if filter.limit <= 0 || filter.limit > 100 {
        50
    } else {
        filter.limit
    };
    let offset = filter.offset.max(0);

    let sql = format!(
        "SELECT {COLUMNS} FROM knowledge WHERE {} ORDER BY created_at DESC LIMIT {limit} OFFSET {offset}",
        conditions.join(" AND "),
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let entries = stmt
        .query_map(param_refs.as_slice(), map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Apply a patch to an entry. Only the owning source agent or the admin
/// identity may update; everyone else gets an access-denied error without
/// learning anything further. A provided embedding replaces the index row.
pub fn update(
    conn: &mut Connection,
    id: &str,
    agent_id: &str,
    input: UpdateInput,
) -> Result<KnowledgeEntry> {
    if let Some(content) = &input.content {
        if content.is_empty() {
            return Err(VaultError::Validation("content cannot be empty".into()));
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(VaultError::Validation("content exceeds 100KiB limit".into()));
        }
    }
    if let Some(confidence) = input.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(VaultError::Validation(
                "confidence must be between 0 and 1".into(),
            ));
        }
    }
    if let Some(embedding) = &input.embedding {
        validate_embedding(embedding)?;
    }

    let tx = conn.transaction()?;

    let owner: Option<String> = tx
        .query_row(
            "SELECT source_agent FROM knowledge WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let owner = owner.ok_or(VaultError::NotFound("knowledge"))?;
    if owner != agent_id && agent_id != ADMIN_AGENT {
        return Err(VaultError::AccessDenied);
    }

    let mut sets = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(content) = input.content {
        args.push(Box::new(content));
        sets.push(format!("content = ?{}", args.len()));
    }
    if let Some(summary) = input.summary {
        args.push(Box::new(summary));
        sets.push(format!("summary = ?{}", args.len()));
    }
    if let Some(category) = input.category {
        args.push(Box::new(category.as_str()));
        sets.push(format!("category = ?{}", args.len()));
    }
    if let Some(scope) = input.scope {
        args.push(Box::new(scope.as_str()));
        sets.push(format!("scope = ?{}", args.len()));
    }
    if let Some(shared_with) = &input.shared_with {
        args.push(Box::new(serde_json::to_string(shared_with)?));
        sets.push(format!("shared_with = ?{}", args.len()));
    }
    if let Some(tags) = &input.tags {
        args.push(Box::new(serde_json::to_string(tags)?));
        sets.push(format!("tags = ?{}", args.len()));
    }
    if let Some(metadata) = &input.metadata {
        args.push(Box::new(serde_json::to_string(metadata)?));
        sets.push(format!("metadata = ?{}", args.len()));
    }
    if let Some(confidence) = input.confidence {
        args.push(Box::new(confidence));
        sets.push(format!("confidence = ?{}", args.len()));
    }
    if let Some(decay) = input.relevance_decay {
        args.push(Box::new(decay.as_str()));
        sets.push(format!("relevance_decay = ?{}", args.len()));
    }
    if let Some(expires_at) = input.expires_at {
        args.push(Box::new(expires_at));
        sets.push(format!("expires_at = ?{}", args.len()));
    }
    if let Some(superseded_by) = input.superseded_by {
        args.push(Box::new(superseded_by));
        sets.push(format!("superseded_by = ?{}", args.len()));
    }

    args.push(Box::new(db::now()));
    sets.push(format!("updated_at = ?{}", args.len()));

    args.push(Box::new(id.to_string()));
    let sql = format!(
        "UPDATE knowledge SET {} WHERE id = ?{} AND deleted_at IS NULL",
        sets.join(", "),
        args.len()
    );
    let param_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
    tx.execute(&sql, param_refs.as_slice())?;

    if let Some(embedding) = &input.embedding {
        tx.execute("DELETE FROM knowledge_vec WHERE id = ?1", params![id])?;
        tx.execute(
            "INSERT INTO knowledge_vec (id, embedding) VALUES (?1, ?2)",
            params![id, db::embedding_to_bytes(embedding)],
        )?;
    }

    let entry = tx.query_row(
        &format!("SELECT {COLUMNS} FROM knowledge WHERE id = ?1"),
        params![id],
        map_row,
    )?;
    tx.commit()?;
    Ok(entry)
}

/// Soft-delete an entry. Same ownership rules as [`update`]. The vector
/// index row is removed so the entry can no longer surface as a KNN
/// candidate; the knowledge row itself is retained with `deleted_at` set.
pub fn delete(conn: &mut Connection, id: &str, agent_id: &str) -> Result<()> {
    let tx = conn.transaction()?;

    let owner: Option<String> = tx
        .query_row(
            "SELECT source_agent FROM knowledge WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let owner = owner.ok_or(VaultError::NotFound("knowledge"))?;
    if owner != agent_id && agent_id != ADMIN_AGENT {
        return Err(VaultError::AccessDenied);
    }

    let now = db::now();
    tx.execute(
        "UPDATE knowledge SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    tx.execute("DELETE FROM knowledge_vec WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

/// Total number of live (non-deleted) entries.
pub fn count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM knowledge WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
