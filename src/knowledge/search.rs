//! Semantic search over knowledge entries.
//!
//! Runs cosine KNN against the `knowledge_vec` index, hydrates the candidate
//! rows, and post-filters by visibility, expiry, and supersession. Results
//! keep the raw embedding-distance order; relevance decay is applied to the
//! reported score only. Re-sorting after decay would destabilise paging, so
//! the compromise is kept deliberately and pinned by tests.

use rusqlite::{params, Connection};
use std::collections::HashMap;

use crate::db;
use crate::error::{Result, VaultError};
use crate::knowledge::store::{can_access, map_row, COLUMNS};
use crate::knowledge::types::{Decay, KnowledgeEntry, SearchInput, SearchResult};

/// Execute a semantic search. Entries without an embedding never appear;
/// entries below `min_relevance` (pre-decay) are dropped.
pub fn search(conn: &Connection, input: &SearchInput) -> Result<Vec<SearchResult>> {
    if input.query_embedding.len() != db::EMBEDDING_DIM {
        return Err(VaultError::Validation(format!(
            "query embedding must have {} dimensions",
            db::EMBEDDING_DIM
        )));
    }

    let limit = if input.limit <= 0 || input.limit > 100 {
        10
    } else {
        input.limit
    };
    let min_relevance = if input.min_relevance <= 0.0 {
        0.5
    } else {
        input.min_relevance
    };

    // KNN first, with headroom for the post-filters below.
    let candidate_limit = limit * 3;
    let candidates = knn(conn, &input.query_embedding, candidate_limit)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<&str> = candidates.iter().map(|(id, _)| id.as_str()).collect();
    let entries = fetch_entries(conn, &ids)?;

    let now = db::now();
    let mut results = Vec::new();
    for (id, distance) in &candidates {
        let Some(entry) = entries.get(id.as_str()) else {
            continue;
        };
        if entry.superseded_by.is_some() {
            continue;
        }
        if !input.include_expired {
            if let Some(expires_at) = &entry.expires_at {
                if *expires_at <= now {
                    continue;
                }
            }
        }
        if let Some(scope) = input.scope {
            if entry.scope != scope {
                continue;
            }
        }
        if !input.categories.is_empty() && !input.categories.contains(&entry.category) {
            continue;
        }
        if !can_access(entry, &input.agent_id) {
            continue;
        }

        let similarity = 1.0 - distance;
        if similarity < min_relevance {
            continue;
        }

        results.push(SearchResult {
            entry: entry.clone(),
            relevance: apply_decay(similarity, entry.relevance_decay, &entry.created_at),
        });
        if results.len() as i64 >= limit {
            break;
        }
    }

    Ok(results)
}

/// Multiply a similarity score by the age-based decay factor:
/// `0.5 ^ (age_days / half_life_days)`. `none` passes through unchanged.
pub fn apply_decay(similarity: f64, decay: Decay, created_at: &str) -> f64 {
    let Some(half_life) = decay.half_life_days() else {
        return similarity;
    };
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(created_at) else {
        return similarity;
    };
    let age_days = (chrono::Utc::now() - created.with_timezone(&chrono::Utc))
        .num_seconds() as f64
        / 86_400.0;
    if age_days <= 0.0 {
        return similarity;
    }
    similarity * 0.5f64.powf(age_days / half_life)
}

/// Cosine KNN over the knowledge vector index. Returns (id, distance) pairs
/// ordered ascending by distance.
fn knn(conn: &Connection, embedding: &[f32], limit: i64) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM knowledge_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![db::embedding_to_bytes(embedding), limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch live knowledge rows by id.
fn fetch_entries(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, KnowledgeEntry>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {COLUMNS} FROM knowledge WHERE deleted_at IS NULL AND id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), map_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|e| (e.id.clone(), e)).collect())
}
