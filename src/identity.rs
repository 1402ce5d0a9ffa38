//! Identity resolution and entity merging.
//!
//! [`resolve`] maps an (alias_type, alias_value) observation onto a canonical
//! entity, creating the entity and alias when neither exists. [`merge`]
//! collapses a duplicate entity into a survivor. Both run inside a single
//! transaction; a failure at any step leaves no partial state behind.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::graph::{aliases, edges, entities, provenance};

/// Input to identity resolution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveRequest {
    pub alias_type: String,
    pub alias_value: String,
    #[serde(default)]
    pub source: String,
    pub entity_type: String,
    #[serde(default)]
    pub display_name: String,
}

/// How a resolution concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The alias existed with high confidence.
    Matched,
    /// The alias existed but is awaiting review (confidence < 0.9).
    PendingReview,
    /// A new entity and alias were created.
    Created,
}

/// Output of identity resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub entity_id: String,
    pub alias_id: String,
    pub outcome: Outcome,
}

/// Output of a merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult {
    pub survivor_id: String,
    pub merged_id: String,
}

fn outcome_for(alias: &aliases::Alias) -> Outcome {
    if alias.confidence >= 0.9 {
        Outcome::Matched
    } else {
        Outcome::PendingReview
    }
}

/// Resolve an alias to its canonical entity, creating both when missing.
///
/// The whole protocol runs in one transaction. When the alias insert loses
/// a uniqueness race to a concurrent writer, the alias is re-read inside
/// the same transaction and its entity wins.
pub fn resolve(conn: &mut Connection, req: &ResolveRequest) -> Result<ResolveResult> {
    if req.alias_type.is_empty() || req.alias_value.is_empty() {
        return Err(VaultError::Validation(
            "alias_type and alias_value are required".into(),
        ));
    }
    if req.entity_type.is_empty() {
        return Err(VaultError::Validation("entity_type is required".into()));
    }

    let tx = conn.transaction()?;

    if let Some(alias) = aliases::lookup(&tx, &req.alias_type, &req.alias_value)? {
        let result = ResolveResult {
            entity_id: alias.canonical_id.clone(),
            alias_id: alias.id.clone(),
            outcome: outcome_for(&alias),
        };
        tx.commit()?;
        return Ok(result);
    }

    // Not found: create entity + alias.
    let entity = entities::create(
        &tx,
        entities::CreateInput {
            entity_type: req.entity_type.clone(),
            key: format!("{}:{}", req.alias_type, req.alias_value),
            display_name: req.display_name.clone(),
            ..Default::default()
        },
    );
    let entity = match entity {
        Ok(entity) => entity,
        Err(err) if err.is_unique_violation() => {
            // Another writer created the entity key first; its alias must
            // exist (or appear) under the same key pair.
            let alias = aliases::lookup(&tx, &req.alias_type, &req.alias_value)?
                .ok_or_else(|| VaultError::Resolve("lost creation race, alias missing".into()))?;
            let result = ResolveResult {
                entity_id: alias.canonical_id.clone(),
                alias_id: alias.id.clone(),
                outcome: outcome_for(&alias),
            };
            tx.commit()?;
            return Ok(result);
        }
        Err(err) => return Err(err),
    };

    let alias = match aliases::create(
        &tx,
        &req.alias_type,
        &req.alias_value,
        &entity.id,
        1.0,
        &req.source,
    ) {
        Ok(alias) => alias,
        Err(err) if err.is_unique_violation() => {
            // UNIQUE constraint race: another transaction created the alias
            // first. Re-lookup inside this transaction and return its result.
            let alias = aliases::lookup(&tx, &req.alias_type, &req.alias_value)?
                .ok_or_else(|| VaultError::Resolve("lost alias race, alias missing".into()))?;
            let result = ResolveResult {
                entity_id: alias.canonical_id.clone(),
                alias_id: alias.id.clone(),
                outcome: outcome_for(&alias),
            };
            tx.commit()?;
            return Ok(result);
        }
        Err(err) => return Err(err),
    };

    let result = ResolveResult {
        entity_id: entity.id,
        alias_id: alias.id,
        outcome: Outcome::Created,
    };
    tx.commit()?;
    Ok(result)
}

/// Merge `merged_id` into `survivor_id`.
///
/// In one transaction: aliases and active edges are re-pointed at the
/// survivor (self-edges are dropped), the merged entity is tombstoned, the
/// survivor is touched so the semantic worker re-embeds it, and one
/// provenance row records the merge.
pub fn merge(
    conn: &mut Connection,
    survivor_id: &str,
    merged_id: &str,
    approved_by: &str,
) -> Result<MergeResult> {
    if survivor_id == merged_id {
        return Err(VaultError::Merge("cannot merge entity with itself".into()));
    }

    let tx = conn.transaction()?;

    let survivor = entities::get(&tx, survivor_id)?.ok_or(VaultError::NotFound("entity"))?;
    let merged = entities::get(&tx, merged_id)?.ok_or(VaultError::NotFound("entity"))?;
    if !survivor.is_live() || !merged.is_live() {
        return Err(VaultError::Merge("both entities must be live".into()));
    }

    aliases::repoint(&tx, merged_id, survivor_id)?;
    edges::repoint(&tx, merged_id, survivor_id)?;
    entities::soft_delete(&tx, merged_id)?;
    entities::touch(&tx, survivor_id)?;

    provenance::create(
        &tx,
        provenance::CreateInput {
            target_id: survivor_id.to_string(),
            target_type: "entity".into(),
            source_system: "identity-resolver".into(),
            source_ref: format!("merge:{merged_id}\u{2192}{survivor_id}"),
            snippet: format!("Merged by {approved_by}"),
            ..Default::default()
        },
    )?;

    tx.commit()?;
    Ok(MergeResult {
        survivor_id: survivor_id.to_string(),
        merged_id: merged_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{aliases, edges, entities, provenance};

    fn test_conn() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    fn email_request(value: &str, name: &str) -> ResolveRequest {
        ResolveRequest {
            alias_type: "email".into(),
            alias_value: value.into(),
            source: "test".into(),
            entity_type: "person".into(),
            display_name: name.into(),
        }
    }

    #[test]
    fn resolve_creates_then_matches() {
        let mut conn = test_conn();

        let first = resolve(&mut conn, &email_request("a@x", "A")).unwrap();
        assert_eq!(first.outcome, Outcome::Created);

        let entity = entities::get(&conn, &first.entity_id).unwrap().unwrap();
        assert_eq!(entity.key, "email:a@x");
        assert_eq!(entity.display_name, "A");

        // Idempotence: the second call returns the same entity, matched.
        let second = resolve(&mut conn, &email_request("a@x", "A")).unwrap();
        assert_eq!(second.entity_id, first.entity_id);
        assert_eq!(second.alias_id, first.alias_id);
        assert_eq!(second.outcome, Outcome::Matched);
    }

    #[test]
    fn resolve_flags_low_confidence_aliases() {
        let mut conn = test_conn();
        let created = resolve(&mut conn, &email_request("a@x", "A")).unwrap();

        conn.execute(
            "UPDATE aliases SET confidence = 0.5 WHERE id = ?1",
            rusqlite::params![created.alias_id],
        )
        .unwrap();

        let again = resolve(&mut conn, &email_request("a@x", "A")).unwrap();
        assert_eq!(again.outcome, Outcome::PendingReview);
        assert_eq!(again.entity_id, created.entity_id);
    }

    #[test]
    fn resolve_validates_input() {
        let mut conn = test_conn();
        let mut missing_alias = email_request("a@x", "A");
        missing_alias.alias_value = String::new();
        assert!(matches!(
            resolve(&mut conn, &missing_alias).unwrap_err(),
            VaultError::Validation(_)
        ));

        let mut missing_type = email_request("a@x", "A");
        missing_type.entity_type = String::new();
        assert!(matches!(
            resolve(&mut conn, &missing_type).unwrap_err(),
            VaultError::Validation(_)
        ));
    }

    #[test]
    fn merge_conserves_aliases_edges_and_records_provenance() {
        let mut conn = test_conn();
        let a = resolve(&mut conn, &email_request("a@x", "A")).unwrap();
        let b = resolve(&mut conn, &email_request("b@x", "B")).unwrap();
        let c = resolve(&mut conn, &email_request("c@x", "C")).unwrap();

        // b -> c edge survives the merge re-pointed to a -> c;
        // a -> b becomes a self-edge and is dropped.
        edges::create(
            &conn,
            edges::CreateInput {
                from_id: b.entity_id.clone(),
                to_id: c.entity_id.clone(),
                edge_type: "knows".into(),
                confidence: 1.0,
                source: "test".into(),
                metadata: None,
            },
        )
        .unwrap();
        edges::create(
            &conn,
            edges::CreateInput {
                from_id: a.entity_id.clone(),
                to_id: b.entity_id.clone(),
                edge_type: "knows".into(),
                confidence: 1.0,
                source: "test".into(),
                metadata: None,
            },
        )
        .unwrap();

        let survivor_before = entities::get(&conn, &a.entity_id).unwrap().unwrap();

        merge(&mut conn, &a.entity_id, &b.entity_id, "tester").unwrap();

        // Both aliases now point at the survivor.
        let alias_values: Vec<String> = aliases::list_by_canonical(&conn, &a.entity_id)
            .unwrap()
            .into_iter()
            .map(|al| al.alias_value)
            .collect();
        assert!(alias_values.contains(&"a@x".to_string()));
        assert!(alias_values.contains(&"b@x".to_string()));

        // The merged entity is tombstoned.
        let merged = entities::get(&conn, &b.entity_id).unwrap().unwrap();
        assert!(!merged.is_live());

        // Edge conservation: a -> c is active, nothing touches b, and no
        // self-edge exists.
        let from_a = edges::edges_from(&conn, &a.entity_id).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].to_id, c.entity_id);
        assert!(edges::edges_from(&conn, &b.entity_id).unwrap().is_empty());
        assert!(edges::edges_to(&conn, &b.entity_id).unwrap().is_empty());
        let self_edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM edges WHERE from_id = to_id", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(self_edges, 0);

        // The survivor was touched for re-embedding.
        let survivor_after = entities::get(&conn, &a.entity_id).unwrap().unwrap();
        assert!(survivor_after.updated_at > survivor_before.updated_at);

        // Exactly one provenance row was appended.
        let rows = provenance::list_by_target(&conn, &a.entity_id, "entity").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_system, "identity-resolver");
        assert_eq!(rows[0].snippet, "Merged by tester");
    }

    #[test]
    fn merge_rejects_self_and_dead_entities() {
        let mut conn = test_conn();
        let a = resolve(&mut conn, &email_request("a@x", "A")).unwrap();
        let b = resolve(&mut conn, &email_request("b@x", "B")).unwrap();

        assert!(matches!(
            merge(&mut conn, &a.entity_id, &a.entity_id, "tester").unwrap_err(),
            VaultError::Merge(_)
        ));

        merge(&mut conn, &a.entity_id, &b.entity_id, "tester").unwrap();
        // b is tombstoned now; merging it again must fail without touching
        // anything.
        assert!(matches!(
            merge(&mut conn, &a.entity_id, &b.entity_id, "tester").unwrap_err(),
            VaultError::Merge(_)
        ));
        let rows = provenance::list_by_target(&conn, &a.entity_id, "entity").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn merge_missing_entity_is_not_found() {
        let mut conn = test_conn();
        let a = resolve(&mut conn, &email_request("a@x", "A")).unwrap();
        assert!(matches!(
            merge(&mut conn, &a.entity_id, "ghost", "tester").unwrap_err(),
            VaultError::NotFound("entity")
        ));
    }
}
