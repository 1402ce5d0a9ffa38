//! Loop C — the cluster detector: assign, recompute centroids, converge.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::error::{Result, VaultError};
use crate::graph::embeddings::cosine_similarity;
use crate::graph::{clusters, embeddings, entities};
use crate::semantic::Worker;

fn average_vectors(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut avg = vec![0.0f32; first.len()];
    for vector in vectors {
        for (i, value) in vector.iter().enumerate() {
            if i < avg.len() {
                avg[i] += value;
            }
        }
    }
    let n = vectors.len() as f32;
    for value in &mut avg {
        *value /= n;
    }
    avg
}

impl Worker {
    /// One cluster pass over the three phases.
    pub fn detect_clusters(&self) -> Result<()> {
        let mut conn = self
            .db
            .lock()
            .map_err(|_| VaultError::Internal("db lock poisoned".into()))?;

        self.assign_entities(&conn)?;
        self.recompute_centroids(&conn)?;
        self.detect_convergence(&mut conn)?;
        Ok(())
    }

    /// Phase 1: each embedded entity without an active membership joins
    /// the single nearest cluster above the join threshold, or seeds a new
    /// cluster of its own.
    fn assign_entities(&self, conn: &Connection) -> Result<()> {
        for entity_id in entities::list_live_ids(conn)? {
            let Some(embedding) = embeddings::get(conn, &entity_id)? else {
                continue; // not embedded yet
            };
            if !clusters::entity_clusters(conn, &entity_id)?.is_empty() {
                continue; // already assigned
            }

            let nearest = clusters::nearest_clusters(
                conn,
                &embedding.embedding,
                1,
                self.config.cluster_join_threshold,
            )?;

            match nearest.first() {
                Some(near) => {
                    clusters::add_member(conn, &entity_id, &near.cluster_id, near.distance)?;
                }
                None => {
                    let entity = entities::get(conn, &entity_id)?
                        .ok_or(VaultError::NotFound("entity"))?;
                    let cluster = clusters::create_cluster(
                        conn,
                        &entity.display_name,
                        &embedding.embedding,
                    )?;
                    clusters::add_member(conn, &entity_id, &cluster.id, 0.0)?;
                }
            }
        }
        Ok(())
    }

    /// Phase 2: every active cluster's centroid becomes the mean of its
    /// active members' embeddings; memberless clusters dissolve.
    fn recompute_centroids(&self, conn: &Connection) -> Result<()> {
        for cluster in clusters::list_active_clusters(conn)? {
            let members = clusters::cluster_members(conn, &cluster.id)?;
            if members.is_empty() {
                clusters::dissolve_cluster(conn, &cluster.id)?;
                continue;
            }

            let vectors: Vec<Vec<f32>> = members
                .iter()
                .filter_map(|m| {
                    embeddings::get(conn, &m.entity_id)
                        .ok()
                        .flatten()
                        .map(|e| e.embedding)
                })
                .collect();
            if vectors.is_empty() {
                continue;
            }
            clusters::update_centroid(conn, &cluster.id, &average_vectors(&vectors))?;
        }
        Ok(())
    }

    /// Phase 3: pairwise centroid comparison. At or above the auto-merge
    /// threshold the pair merges immediately; at or above the proposal
    /// threshold a pending proposal is created (or refreshed to the max
    /// similarity) between one representative member of each cluster.
    fn detect_convergence(&self, conn: &mut Connection) -> Result<()> {
        let active = clusters::list_active_clusters(conn)?;
        let mut gone: HashSet<String> = HashSet::new();

        for i in 0..active.len() {
            for j in (i + 1)..active.len() {
                let (a, b) = (&active[i], &active[j]);
                if gone.contains(&a.id) || gone.contains(&b.id) {
                    continue;
                }
                let (Some(ca), Some(cb)) = (&a.centroid, &b.centroid) else {
                    continue;
                };
                let similarity = cosine_similarity(ca, cb);

                if similarity >= self.config.auto_merge_threshold {
                    tracing::info!(a = %a.id, b = %b.id, similarity, "auto-merging clusters");
                    if let Err(err) = merge_clusters(conn, &a.id, &b.id) {
                        tracing::warn!(%err, "cluster merge failed");
                        continue;
                    }
                    gone.insert(b.id.clone());
                } else if similarity >= self.config.merge_proposal_threshold {
                    let members_a = clusters::cluster_members(conn, &a.id)?;
                    let members_b = clusters::cluster_members(conn, &b.id)?;
                    let (Some(rep_a), Some(rep_b)) = (members_a.first(), members_b.first())
                    else {
                        continue;
                    };
                    clusters::create_proposal(
                        conn,
                        clusters::ProposalInput {
                            entity_a_id: rep_a.entity_id.clone(),
                            entity_b_id: rep_b.entity_id.clone(),
                            similarity,
                            proposal_type: "cluster".into(),
                            cluster_a_id: Some(a.id.clone()),
                            cluster_b_id: Some(b.id.clone()),
                        },
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Atomically re-parent every member of `dissolve_id` into `keep_id`
/// (old memberships end, new ones keep the recorded distance), then
/// dissolve the emptied cluster.
fn merge_clusters(conn: &mut Connection, keep_id: &str, dissolve_id: &str) -> Result<()> {
    let tx = conn.transaction()?;
    for member in clusters::cluster_members(&tx, dissolve_id)? {
        clusters::remove_member(&tx, &member.entity_id, dissolve_id)?;
        clusters::add_member(&tx, &member.entity_id, keep_id, member.distance)?;
    }
    clusters::dissolve_cluster(&tx, dissolve_id)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::average_vectors;
    use crate::embedding::simple::SimpleProvider;
    use crate::graph::{clusters, entities};
    use crate::semantic::{SemanticConfig, Worker};

    fn worker() -> (crate::db::Db, Arc<Worker>) {
        let db = crate::db::open_memory_db().unwrap();
        let worker = Worker::new(
            db.clone(),
            Arc::new(SimpleProvider::new()),
            SemanticConfig::default(),
        );
        (db, worker)
    }

    fn entity_with_summary(db: &crate::db::Db, key: &str, summary: &str) -> String {
        let conn = db.lock().unwrap();
        entities::create(
            &conn,
            entities::CreateInput {
                entity_type: "concept".into(),
                key: key.into(),
                display_name: key.into(),
                summary: summary.into(),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    fn spike(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 384];
        v[dim] = 1.0;
        v
    }

    #[test]
    fn average_of_vectors() {
        let avg = average_vectors(&[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(avg, vec![0.5, 0.5]);
        assert!(average_vectors(&[]).is_empty());
    }

    #[tokio::test]
    async fn similar_entities_share_a_cluster_and_reruns_are_stable() {
        let (db, worker) = worker();
        let e1 = entity_with_summary(&db, "c:1", "rust async runtime internals");
        let e2 = entity_with_summary(&db, "c:2", "rust async runtime internals");
        let e3 = entity_with_summary(&db, "c:3", "baroque harpsichord repertoire");

        worker.embed_batch().await.unwrap();
        worker.detect_clusters().unwrap();

        let snapshot = |db: &crate::db::Db| {
            let conn = db.lock().unwrap();
            let mut state: Vec<(String, Vec<String>)> = clusters::list_active_clusters(&conn)
                .unwrap()
                .into_iter()
                .map(|c| {
                    let mut members: Vec<String> = clusters::cluster_members(&conn, &c.id)
                        .unwrap()
                        .into_iter()
                        .map(|m| m.entity_id)
                        .collect();
                    members.sort();
                    (c.id, members)
                })
                .collect();
            state.sort();
            state
        };

        let first = snapshot(&db);
        // e1 and e2 share a cluster; e3 sits alone.
        let with_pair = first
            .iter()
            .find(|(_, members)| members.len() == 2)
            .expect("a two-member cluster");
        assert!(with_pair.1.contains(&e1) && with_pair.1.contains(&e2));
        assert!(first
            .iter()
            .any(|(_, members)| members.len() == 1 && members[0] == e3));

        // Re-running the whole pipeline without input changes leaves
        // membership and the proposal set untouched.
        worker.embed_batch().await.unwrap();
        worker.scan_similarity().unwrap();
        worker.detect_clusters().unwrap();
        assert_eq!(snapshot(&db), first);
        let conn = db.lock().unwrap();
        assert!(clusters::pending_proposals(&conn).unwrap().is_empty());
    }

    #[tokio::test]
    async fn converging_clusters_auto_merge() {
        let (db, worker) = worker();
        let e1 = entity_with_summary(&db, "c:1", "one");
        let e2 = entity_with_summary(&db, "c:2", "two");

        // Seed two clusters with near-identical centroids and one member
        // each, above the auto-merge threshold.
        {
            let conn = db.lock().unwrap();
            let mut near = spike(0);
            near[1] = 0.05;
            let a = clusters::create_cluster(&conn, "a", &spike(0)).unwrap();
            let b = clusters::create_cluster(&conn, "b", &near).unwrap();
            clusters::add_member(&conn, &e1, &a.id, 0.0).unwrap();
            clusters::add_member(&conn, &e2, &b.id, 0.0).unwrap();
            // Give both members embeddings matching their centroids so the
            // recompute phase keeps the centroids close.
            drop(conn);
            let mut conn = db.lock().unwrap();
            crate::graph::embeddings::upsert(&mut conn, &e1, &spike(0), "simple", "h1").unwrap();
            crate::graph::embeddings::upsert(&mut conn, &e2, &near, "simple", "h2").unwrap();
        }

        worker.detect_clusters().unwrap();

        let conn = db.lock().unwrap();
        let active = clusters::list_active_clusters(&conn).unwrap();
        assert_eq!(active.len(), 1, "one cluster survives");
        let members: Vec<String> = clusters::cluster_members(&conn, &active[0].id)
            .unwrap()
            .into_iter()
            .map(|m| m.entity_id)
            .collect();
        assert!(members.contains(&e1) && members.contains(&e2));
    }

    #[tokio::test]
    async fn mid_similarity_clusters_get_a_proposal() {
        let (db, worker) = worker();
        let e1 = entity_with_summary(&db, "c:1", "one");
        let e2 = entity_with_summary(&db, "c:2", "two");

        // Centroid similarity ~0.89: proposal, not auto-merge.
        let mut tilted = spike(0);
        tilted[1] = 0.5;
        let norm: f32 = tilted.iter().map(|x| x * x).sum::<f32>().sqrt();
        tilted.iter_mut().for_each(|x| *x /= norm);

        let (a_id, b_id) = {
            let conn = db.lock().unwrap();
            let a = clusters::create_cluster(&conn, "a", &spike(0)).unwrap();
            let b = clusters::create_cluster(&conn, "b", &tilted).unwrap();
            clusters::add_member(&conn, &e1, &a.id, 0.0).unwrap();
            clusters::add_member(&conn, &e2, &b.id, 0.0).unwrap();
            drop(conn);
            let mut conn = db.lock().unwrap();
            crate::graph::embeddings::upsert(&mut conn, &e1, &spike(0), "simple", "h1").unwrap();
            crate::graph::embeddings::upsert(&mut conn, &e2, &tilted, "simple", "h2").unwrap();
            (a.id, b.id)
        };

        worker.detect_clusters().unwrap();

        let conn = db.lock().unwrap();
        assert_eq!(clusters::list_active_clusters(&conn).unwrap().len(), 2);
        let proposals = clusters::pending_proposals(&conn).unwrap();
        assert_eq!(proposals.len(), 1);
        let p = &proposals[0];
        assert_eq!(p.proposal_type, "cluster");
        let cluster_pair = (p.cluster_a_id.clone(), p.cluster_b_id.clone());
        assert!(
            cluster_pair == (Some(a_id.clone()), Some(b_id.clone()))
                || cluster_pair == (Some(b_id), Some(a_id))
        );
        assert!(p.similarity >= 0.85 && p.similarity < 0.95);
        let pair = (p.entity_a_id.clone(), p.entity_b_id.clone());
        assert!(pair == (e1.clone(), e2.clone()) || pair == (e2, e1));
    }
}
