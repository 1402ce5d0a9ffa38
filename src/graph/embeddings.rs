//! Entity embedding store and nearest-neighbour queries.
//!
//! Each entity has at most one embedding: a metadata row in
//! `entity_embeddings` (model, text fingerprint, timestamps) and the vector
//! itself in the `entity_vec` cosine index. An embedding is *stale* when the
//! entity's `updated_at` is newer than the embedding's.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::Result;

/// A stored entity embedding.
#[derive(Debug, Clone)]
pub struct EntityEmbedding {
    pub entity_id: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub text_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A neighbour returned by similarity queries.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarEntity {
    pub entity_id: String,
    pub distance: f64,
    pub similarity: f64,
}

/// Cosine similarity between two vectors. Zero when either has no norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len() {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += a[i] as f64 * a[i] as f64;
        norm_b += b[i] as f64 * b[i] as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Insert or replace an entity's embedding in one transaction.
pub fn upsert(
    conn: &mut Connection,
    entity_id: &str,
    embedding: &[f32],
    model: &str,
    text_hash: &str,
) -> Result<()> {
    let now = db::now();
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO entity_embeddings (entity_id, model, text_hash, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT (entity_id) DO UPDATE SET \
             model = excluded.model, text_hash = excluded.text_hash, updated_at = excluded.updated_at",
        params![entity_id, model, text_hash, now],
    )?;
    tx.execute(
        "DELETE FROM entity_vec WHERE entity_id = ?1",
        params![entity_id],
    )?;
    tx.execute(
        "INSERT INTO entity_vec (entity_id, embedding) VALUES (?1, ?2)",
        params![entity_id, db::embedding_to_bytes(embedding)],
    )?;
    tx.commit()?;
    Ok(())
}

/// Fetch an entity's embedding, vector included.
pub fn get(conn: &Connection, entity_id: &str) -> Result<Option<EntityEmbedding>> {
    let meta: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT model, text_hash, created_at, updated_at \
             FROM entity_embeddings WHERE entity_id = ?1",
            params![entity_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let Some((model, text_hash, created_at, updated_at)) = meta else {
        return Ok(None);
    };

    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM entity_vec WHERE entity_id = ?1",
            params![entity_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(blob) = blob else {
        return Ok(None);
    };

    Ok(Some(EntityEmbedding {
        entity_id: entity_id.to_string(),
        embedding: db::bytes_to_embedding(&blob),
        model,
        text_hash,
        created_at,
        updated_at,
    }))
}

/// Live entity ids with no embedding yet, oldest first.
pub fn entities_without_embeddings(conn: &Connection, limit: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT e.id FROM entities e \
         LEFT JOIN entity_embeddings emb ON emb.entity_id = e.id \
         WHERE emb.entity_id IS NULL AND e.deleted_at IS NULL \
         ORDER BY e.created_at LIMIT ?1",
    )?;
    let ids = stmt
        .query_map(params![limit], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Live entity ids whose embedding is older than the entity row, most
/// recently updated first.
pub fn entities_with_stale_embeddings(conn: &Connection, limit: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT e.id FROM entities e \
         JOIN entity_embeddings emb ON emb.entity_id = e.id \
         WHERE e.updated_at > emb.updated_at AND e.deleted_at IS NULL \
         ORDER BY e.updated_at DESC LIMIT ?1",
    )?;
    let ids = stmt
        .query_map(params![limit], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Top-N live entities nearest to the given entity's embedding, above the
/// similarity floor. Returns an empty list when the entity has no embedding.
pub fn find_similar_to_entity(
    conn: &Connection,
    entity_id: &str,
    limit: i64,
    min_similarity: f64,
) -> Result<Vec<SimilarEntity>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM entity_vec WHERE entity_id = ?1",
            params![entity_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(blob) = blob else {
        return Ok(Vec::new());
    };

    find_similar(conn, &db::bytes_to_embedding(&blob), limit, min_similarity, Some(entity_id))
}

/// Top-N live entities nearest to an arbitrary embedding.
pub fn find_similar(
    conn: &Connection,
    embedding: &[f32],
    limit: i64,
    min_similarity: f64,
    exclude_id: Option<&str>,
) -> Result<Vec<SimilarEntity>> {
    let max_distance = 1.0 - min_similarity;

    // KNN first (with headroom for the excluded self-row and any
    // tombstoned entities), then drop dead rows — vec0 tables cannot join.
    let mut stmt = conn.prepare(
        "SELECT entity_id, distance FROM entity_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let candidates: Vec<(String, f64)> = stmt
        .query_map(
            params![db::embedding_to_bytes(embedding), limit * 3 + 1],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::new();
    for (candidate_id, distance) in candidates {
        if Some(candidate_id.as_str()) == exclude_id {
            continue;
        }
        if distance >= max_distance {
            break;
        }
        let live: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM entities WHERE id = ?1 AND deleted_at IS NULL",
            params![candidate_id],
            |row| row.get(0),
        )?;
        if !live {
            continue;
        }
        result.push(SimilarEntity {
            entity_id: candidate_id,
            similarity: 1.0 - distance,
            distance,
        });
        if result.len() as i64 >= limit {
            break;
        }
    }
    Ok(result)
}
