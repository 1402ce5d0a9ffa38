//! Semantic clusters, memberships, and merge proposals.
//!
//! A cluster is active until dissolved; a membership is active until
//! `left_at` is set. Centroid similarity is computed in process — the
//! active-cluster population is small and already in memory when the
//! cluster loop runs.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::error::{Result, VaultError};
use crate::graph::embeddings::cosine_similarity;

/// A semantic cluster of entities.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticCluster {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing)]
    pub centroid: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dissolved_at: Option<String>,
}

/// An entity's membership in a cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterMembership {
    pub entity_id: String,
    pub cluster_id: String,
    pub distance: f64,
    pub joined_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<String>,
}

/// A nearest-cluster query result.
#[derive(Debug, Clone)]
pub struct ClusterDistance {
    pub cluster_id: String,
    pub distance: f64,
    pub similarity: f64,
}

/// A proposed merge between two entities (or two clusters via their
/// representatives).
#[derive(Debug, Clone, Serialize)]
pub struct MergeProposal {
    pub id: String,
    pub entity_a_id: String,
    pub entity_b_id: String,
    pub similarity: f64,
    pub proposal_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_a_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_b_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
}

const CLUSTER_COLUMNS: &str = "id, label, centroid, created_at, updated_at, dissolved_at";

fn map_cluster(row: &rusqlite::Row<'_>) -> rusqlite::Result<SemanticCluster> {
    let centroid: Option<Vec<u8>> = row.get(2)?;
    Ok(SemanticCluster {
        id: row.get(0)?,
        label: row.get(1)?,
        centroid: centroid.map(|b| db::bytes_to_embedding(&b)),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        dissolved_at: row.get(5)?,
    })
}

const PROPOSAL_COLUMNS: &str = "id, entity_a_id, entity_b_id, similarity, proposal_type, \
     cluster_a_id, cluster_b_id, status, reviewed_by, created_at, resolved_at";

fn map_proposal(row: &rusqlite::Row<'_>) -> rusqlite::Result<MergeProposal> {
    Ok(MergeProposal {
        id: row.get(0)?,
        entity_a_id: row.get(1)?,
        entity_b_id: row.get(2)?,
        similarity: row.get(3)?,
        proposal_type: row.get(4)?,
        cluster_a_id: row.get(5)?,
        cluster_b_id: row.get(6)?,
        status: row.get(7)?,
        reviewed_by: row.get(8)?,
        created_at: row.get(9)?,
        resolved_at: row.get(10)?,
    })
}

// ── Clusters ─────────────────────────────────────────────────────────────────

/// Create a new cluster seeded with a centroid.
pub fn create_cluster(conn: &Connection, label: &str, centroid: &[f32]) -> Result<SemanticCluster> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semantic_clusters (id, label, centroid, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, label, db::embedding_to_bytes(centroid), db::now()],
    )?;
    get_cluster(conn, &id)?.ok_or(VaultError::NotFound("cluster"))
}

/// Fetch a cluster by id.
pub fn get_cluster(conn: &Connection, id: &str) -> Result<Option<SemanticCluster>> {
    let cluster = conn
        .query_row(
            &format!("SELECT {CLUSTER_COLUMNS} FROM semantic_clusters WHERE id = ?1"),
            params![id],
            map_cluster,
        )
        .optional()?;
    Ok(cluster)
}

/// Replace an active cluster's centroid.
pub fn update_centroid(conn: &Connection, cluster_id: &str, centroid: &[f32]) -> Result<()> {
    conn.execute(
        "UPDATE semantic_clusters SET centroid = ?1, updated_at = ?2 \
         WHERE id = ?3 AND dissolved_at IS NULL",
        params![db::embedding_to_bytes(centroid), db::now(), cluster_id],
    )?;
    Ok(())
}

/// Mark a cluster dissolved.
pub fn dissolve_cluster(conn: &Connection, cluster_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE semantic_clusters SET dissolved_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![db::now(), cluster_id],
    )?;
    Ok(())
}

/// All active clusters, newest first.
pub fn list_active_clusters(conn: &Connection) -> Result<Vec<SemanticCluster>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLUSTER_COLUMNS} FROM semantic_clusters \
         WHERE dissolved_at IS NULL ORDER BY created_at DESC"
    ))?;
    let clusters = stmt
        .query_map([], map_cluster)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(clusters)
}

/// Active clusters ranked by centroid similarity to an embedding, cut at
/// `min_similarity`.
pub fn nearest_clusters(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
    min_similarity: f64,
) -> Result<Vec<ClusterDistance>> {
    let mut distances: Vec<ClusterDistance> = list_active_clusters(conn)?
        .into_iter()
        .filter_map(|c| {
            let centroid = c.centroid?;
            let similarity = cosine_similarity(embedding, &centroid);
            (similarity >= min_similarity).then_some(ClusterDistance {
                cluster_id: c.id,
                distance: 1.0 - similarity,
                similarity,
            })
        })
        .collect();
    distances.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    distances.truncate(limit);
    Ok(distances)
}

// ── Memberships ──────────────────────────────────────────────────────────────

/// Add an entity to a cluster.
pub fn add_member(conn: &Connection, entity_id: &str, cluster_id: &str, distance: f64) -> Result<()> {
    conn.execute(
        "INSERT INTO cluster_memberships (entity_id, cluster_id, distance, joined_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![entity_id, cluster_id, distance, db::now()],
    )?;
    Ok(())
}

/// End an entity's active membership in a cluster.
pub fn remove_member(conn: &Connection, entity_id: &str, cluster_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE cluster_memberships SET left_at = ?1 \
         WHERE entity_id = ?2 AND cluster_id = ?3 AND left_at IS NULL",
        params![db::now(), entity_id, cluster_id],
    )?;
    Ok(())
}

/// Active members of a cluster, nearest to the centroid first.
pub fn cluster_members(conn: &Connection, cluster_id: &str) -> Result<Vec<ClusterMembership>> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, cluster_id, distance, joined_at, left_at \
         FROM cluster_memberships WHERE cluster_id = ?1 AND left_at IS NULL ORDER BY distance",
    )?;
    let members = stmt
        .query_map(params![cluster_id], |row| {
            Ok(ClusterMembership {
                entity_id: row.get(0)?,
                cluster_id: row.get(1)?,
                distance: row.get(2)?,
                joined_at: row.get(3)?,
                left_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(members)
}

/// Active clusters an entity belongs to, oldest cluster first.
pub fn entity_clusters(conn: &Connection, entity_id: &str) -> Result<Vec<SemanticCluster>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT sc.id, sc.label, sc.centroid, sc.created_at, sc.updated_at, sc.dissolved_at \
         FROM semantic_clusters sc \
         JOIN cluster_memberships cm ON cm.cluster_id = sc.id \
         WHERE cm.entity_id = ?1 AND cm.left_at IS NULL AND sc.dissolved_at IS NULL \
         ORDER BY sc.created_at"
    ))?;
    let clusters = stmt
        .query_map(params![entity_id], map_cluster)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(clusters)
}

// ── Merge proposals ──────────────────────────────────────────────────────────

/// Input for creating (or refreshing) a merge proposal.
#[derive(Debug, Clone, Default)]
pub struct ProposalInput {
    pub entity_a_id: String,
    pub entity_b_id: String,
    pub similarity: f64,
    pub proposal_type: String,
    pub cluster_a_id: Option<String>,
    pub cluster_b_id: Option<String>,
}

/// Insert a pending proposal, or refresh an existing one for the same
/// entity pair: the stored similarity keeps the maximum of old and new.
pub fn create_proposal(conn: &Connection, input: ProposalInput) -> Result<()> {
    conn.execute(
        "INSERT INTO merge_proposals \
         (id, entity_a_id, entity_b_id, similarity, proposal_type, cluster_a_id, cluster_b_id, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8) \
         ON CONFLICT (entity_a_id, entity_b_id) DO UPDATE SET \
             similarity = MAX(merge_proposals.similarity, excluded.similarity)",
        params![
            Uuid::new_v4().to_string(),
            input.entity_a_id,
            input.entity_b_id,
            input.similarity,
            input.proposal_type,
            input.cluster_a_id,
            input.cluster_b_id,
            db::now(),
        ],
    )?;
    Ok(())
}

/// Fetch a proposal by id.
pub fn get_proposal(conn: &Connection, id: &str) -> Result<Option<MergeProposal>> {
    let proposal = conn
        .query_row(
            &format!("SELECT {PROPOSAL_COLUMNS} FROM merge_proposals WHERE id = ?1"),
            params![id],
            map_proposal,
        )
        .optional()?;
    Ok(proposal)
}

/// Pending proposals, most similar first.
pub fn pending_proposals(conn: &Connection) -> Result<Vec<MergeProposal>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PROPOSAL_COLUMNS} FROM merge_proposals \
         WHERE status = 'pending' ORDER BY similarity DESC"
    ))?;
    let proposals = stmt
        .query_map([], map_proposal)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(proposals)
}

/// Resolve a pending proposal as approved or rejected. Resolving twice
/// fails.
pub fn resolve_proposal(conn: &Connection, id: &str, status: &str, reviewed_by: &str) -> Result<()> {
    if status != "approved" && status != "rejected" {
        return Err(VaultError::Validation(format!(
            "status must be approved or rejected, got {status}"
        )));
    }
    let affected = conn.execute(
        "UPDATE merge_proposals SET status = ?1, reviewed_by = ?2, resolved_at = ?3 \
         WHERE id = ?4 AND status = 'pending'",
        params![status, reviewed_by, db::now(), id],
    )?;
    if affected == 0 {
        return Err(VaultError::NotFound("proposal"));
    }
    Ok(())
}
