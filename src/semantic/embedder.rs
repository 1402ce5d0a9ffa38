//! Loop E — the entity embedder.

use crate::error::{Result, VaultError};
use crate::graph::{embeddings, entities};
use crate::semantic::text::{entity_text, text_hash};
use crate::semantic::Worker;

impl Worker {
    /// One embedder pass: gather entities with no embedding, top up with
    /// stale ones, embed the batch, and store whatever succeeded.
    pub async fn embed_batch(&self) -> Result<()> {
        let batch_size = self.config.embed_batch_size;

        // Phase 1: gather the batch under the lock, without awaiting.
        let batch: Vec<(String, String)> = {
            let conn = self
                .db
                .lock()
                .map_err(|_| VaultError::Internal("db lock poisoned".into()))?;

            let mut ids = embeddings::entities_without_embeddings(&conn, batch_size)?;
            let remaining = batch_size - ids.len() as i64;
            if remaining > 0 {
                ids.extend(embeddings::entities_with_stale_embeddings(&conn, remaining)?);
            }

            let mut batch = Vec::with_capacity(ids.len());
            for id in ids {
                match entities::get(&conn, &id)? {
                    Some(entity) if entity.is_live() => {
                        batch.push((id, entity_text(&entity)));
                    }
                    _ => continue,
                }
            }
            batch
        };

        if batch.is_empty() {
            return Ok(());
        }
        tracing::info!(count = batch.len(), "embedding entities");

        // Phase 2: call the provider. Partial failure stores what worked.
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(batch.len());
        for (id, text) in &batch {
            match self.provider.embed(text).await {
                Ok(vector) => vectors.push(Some(vector)),
                Err(err) => {
                    tracing::warn!(entity = %id, %err, "embedding failed");
                    vectors.push(None);
                }
            }
        }

        // Phase 3: store.
        let mut stored = 0;
        {
            let mut conn = self
                .db
                .lock()
                .map_err(|_| VaultError::Internal("db lock poisoned".into()))?;
            for ((id, text), vector) in batch.iter().zip(vectors) {
                let Some(vector) = vector else { continue };
                if let Err(err) = embeddings::upsert(
                    &mut conn,
                    id,
                    &vector,
                    self.provider.model(),
                    &text_hash(text),
                ) {
                    tracing::warn!(entity = %id, %err, "storing embedding failed");
                    continue;
                }
                stored += 1;
            }
        }

        tracing::info!(stored, "embedded entities");
        Ok(())
    }
}
