//! SQL DDL for all vault tables.
//!
//! Defines the knowledge, secret, access-control, context-graph, semantic
//! overlay, and audit tables, plus the vec0 virtual tables used for
//! cosine-distance search. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization.

use rusqlite::Connection;

/// All schema DDL statements for the vault's core tables.
const SCHEMA_SQL: &str = r#"
-- Knowledge entries (versioned, vector-embedded text)
CREATE TABLE IF NOT EXISTS knowledge (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    summary TEXT,
    source_agent TEXT NOT NULL,
    category TEXT NOT NULL CHECK(category IN ('discovery','lesson','preference','fact','event','decision','relationship')),
    scope TEXT NOT NULL DEFAULT 'public' CHECK(scope IN ('public','private','shared')),
    shared_with TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT,
    source_event_id TEXT,
    confidence REAL NOT NULL DEFAULT 0.8 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    relevance_decay TEXT NOT NULL DEFAULT 'slow' CHECK(relevance_decay IN ('none','slow','fast','ephemeral')),
    expires_at TEXT,
    superseded_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge(category);
CREATE INDEX IF NOT EXISTS idx_knowledge_scope ON knowledge(scope);
CREATE INDEX IF NOT EXISTS idx_knowledge_agent ON knowledge(source_agent);
CREATE INDEX IF NOT EXISTS idx_knowledge_deleted ON knowledge(deleted_at);
CREATE INDEX IF NOT EXISTS idx_knowledge_created ON knowledge(created_at);

-- Encrypted secrets with rotation history
CREATE TABLE IF NOT EXISTS secrets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    encrypted_value TEXT NOT NULL,
    description TEXT,
    scope TEXT NOT NULL DEFAULT '[]',
    rotation_interval_days INTEGER,
    last_rotated_at TEXT,
    expires_at TEXT,
    created_by TEXT NOT NULL,
    owner_type TEXT NOT NULL DEFAULT 'agent' CHECK(owner_type IN ('agent','person','device')),
    owner_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS secret_history (
    id TEXT PRIMARY KEY,
    secret_id TEXT NOT NULL REFERENCES secrets(id) ON DELETE CASCADE,
    encrypted_value TEXT NOT NULL,
    rotated_by TEXT NOT NULL,
    rotated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_secret_history_secret ON secret_history(secret_id);

-- Access grants (resource <-> subject, permission tier)
CREATE TABLE IF NOT EXISTS access_grants (
    id TEXT PRIMARY KEY,
    resource_type TEXT NOT NULL CHECK(resource_type IN ('secret','knowledge')),
    resource_id TEXT NOT NULL,
    subject_type TEXT NOT NULL CHECK(subject_type IN ('person','device','agent')),
    subject_id TEXT NOT NULL,
    permission TEXT NOT NULL CHECK(permission IN ('read','write','admin')),
    granted_by TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(resource_type, resource_id, subject_type, subject_id)
);

CREATE TABLE IF NOT EXISTS people (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    identifier TEXT NOT NULL UNIQUE,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    identifier TEXT NOT NULL UNIQUE,
    device_type TEXT,
    owner_id TEXT REFERENCES people(id) ON DELETE SET NULL,
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Context graph entities. The key stays unique across tombstoned rows.
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    key TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

-- Directed, typed, time-valid edges between entities
CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    from_id TEXT NOT NULL REFERENCES entities(id),
    to_id TEXT NOT NULL REFERENCES entities(id),
    type TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    source TEXT NOT NULL DEFAULT '',
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id) WHERE valid_to IS NULL;
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id) WHERE valid_to IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_semantic
    ON edges(from_id, to_id, type)
    WHERE type = 'semantic_similarity' AND valid_to IS NULL;

-- Alias -> canonical entity mapping
CREATE TABLE IF NOT EXISTS aliases (
    id TEXT PRIMARY KEY,
    alias_type TEXT NOT NULL,
    alias_value TEXT NOT NULL,
    canonical_id TEXT NOT NULL REFERENCES entities(id),
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    source TEXT NOT NULL DEFAULT '',
    reviewed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(alias_type, alias_value)
);

CREATE INDEX IF NOT EXISTS idx_aliases_canonical ON aliases(canonical_id);

-- Provenance: ties a change to an external source, at most once per key
CREATE TABLE IF NOT EXISTS provenance (
    id TEXT PRIMARY KEY,
    target_id TEXT NOT NULL,
    target_type TEXT NOT NULL,
    source_system TEXT NOT NULL,
    source_ref TEXT NOT NULL,
    source_idempotency_key TEXT UNIQUE,
    snippet TEXT NOT NULL DEFAULT '',
    agent_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_provenance_target ON provenance(target_id, target_type);

-- One embedding per entity; the vector itself lives in entity_vec
CREATE TABLE IF NOT EXISTS entity_embeddings (
    entity_id TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
    model TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Semantic clusters; centroid is a little-endian f32 blob
CREATE TABLE IF NOT EXISTS semantic_clusters (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    centroid BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    dissolved_at TEXT
);

CREATE TABLE IF NOT EXISTS cluster_memberships (
    entity_id TEXT NOT NULL REFERENCES entities(id),
    cluster_id TEXT NOT NULL REFERENCES semantic_clusters(id),
    distance REAL NOT NULL,
    joined_at TEXT NOT NULL,
    left_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_memberships_entity ON cluster_memberships(entity_id) WHERE left_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_memberships_cluster ON cluster_memberships(cluster_id) WHERE left_at IS NULL;

-- Merge proposals; resubmission keeps the maximum similarity
CREATE TABLE IF NOT EXISTS merge_proposals (
    id TEXT PRIMARY KEY,
    entity_a_id TEXT NOT NULL,
    entity_b_id TEXT NOT NULL,
    similarity REAL NOT NULL,
    proposal_type TEXT NOT NULL DEFAULT 'entity' CHECK(proposal_type IN ('entity','cluster')),
    cluster_a_id TEXT,
    cluster_b_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','approved','rejected')),
    reviewed_by TEXT,
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    UNIQUE(entity_a_id, entity_b_id)
);

-- Append-only audit log
CREATE TABLE IF NOT EXISTS access_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    resource_id TEXT,
    ip_address TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    metadata TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual tables must be created separately (sqlite-vec syntax).
/// Both use cosine distance so `distance` is `1 - cosine_similarity`.
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[384] distance_metric=cosine
);

CREATE VIRTUAL TABLE IF NOT EXISTS entity_vec USING vec0(
    entity_id TEXT PRIMARY KEY,
    embedding FLOAT[384] distance_metric=cosine
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "knowledge",
            "secrets",
            "secret_history",
            "access_grants",
            "people",
            "devices",
            "entities",
            "edges",
            "aliases",
            "provenance",
            "entity_embeddings",
            "semantic_clusters",
            "cluster_memberships",
            "merge_proposals",
            "access_log",
            "schema_meta",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }

        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn semantic_edge_partial_unique_index() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let now = crate::db::now();
        conn.execute(
            "INSERT INTO entities (id, entity_type, key, display_name, created_at, updated_at) \
             VALUES ('a','person','email:a','A',?1,?1), ('b','person','email:b','B',?1,?1)",
            [&now],
        )
        .unwrap();

        let insert = "INSERT INTO edges (id, from_id, to_id, type, valid_from, created_at) \
                      VALUES (?1, 'a', 'b', 'semantic_similarity', ?2, ?2)";
        conn.execute(insert, rusqlite::params!["e1", now]).unwrap();
        // A second active semantic edge over the same pair must conflict.
        let dup = conn.execute(insert, rusqlite::params!["e2", now]);
        assert!(dup.is_err());

        // But parallel edges of another type are allowed.
        conn.execute(
            "INSERT INTO edges (id, from_id, to_id, type, valid_from, created_at) \
             VALUES ('e3', 'a', 'b', 'owns', ?1, ?1)",
            [&now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO edges (id, from_id, to_id, type, valid_from, created_at) \
             VALUES ('e4', 'a', 'b', 'owns', ?1, ?1)",
            [&now],
        )
        .unwrap();
    }
}
