//! Loop S — the similarity scanner.

use crate::error::{Result, VaultError};
use crate::graph::{edges, embeddings, entities};
use crate::semantic::Worker;

/// UUID strings compare lexicographically; the smaller id is always the
/// edge's `from` side.
fn canonical_order<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Worker {
    /// One scanner pass: for every live entity, upsert a semantic edge to
    /// each of its top-10 neighbours above the edge threshold. Only the
    /// canonical `from` side writes, so each pair is visited once.
    pub fn scan_similarity(&self) -> Result<()> {
        let conn = self
            .db
            .lock()
            .map_err(|_| VaultError::Internal("db lock poisoned".into()))?;

        let mut created = 0;
        for entity_id in entities::list_live_ids(&conn)? {
            let similar =
                embeddings::find_similar_to_entity(&conn, &entity_id, 10, self.config.edge_threshold)?;

            for neighbour in similar {
                let (from, to) = canonical_order(&entity_id, &neighbour.entity_id);
                if from != entity_id {
                    continue;
                }
                if let Err(err) =
                    edges::upsert_semantic(&conn, from, to, neighbour.similarity, "semantic-scanner")
                {
                    tracing::warn!(from, to, %err, "semantic edge upsert failed");
                    continue;
                }
                created += 1;
            }
        }

        if created > 0 {
            tracing::info!(count = created, "similarity edges upserted");
        }
        Ok(())
    }
}
