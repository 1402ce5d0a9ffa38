//! Identity resolution and merge conservation, end to end over the graph
//! store.

mod helpers;

use alexandria::graph::{aliases, edges, entities, provenance};
use alexandria::identity::{self, Outcome, ResolveRequest};
use helpers::test_db;

fn request(alias_type: &str, value: &str, name: &str) -> ResolveRequest {
    ResolveRequest {
        alias_type: alias_type.into(),
        alias_value: value.into(),
        source: "test".into(),
        entity_type: "person".into(),
        display_name: name.into(),
    }
}

#[test]
fn resolve_twice_is_idempotent() {
    let db = test_db();
    let mut conn = db.lock().unwrap();

    let first = identity::resolve(&mut conn, &request("email", "a@x", "A")).unwrap();
    assert_eq!(first.outcome, Outcome::Created);

    let second = identity::resolve(&mut conn, &request("email", "a@x", "A")).unwrap();
    assert_eq!(second.entity_id, first.entity_id);
    assert_eq!(second.outcome, Outcome::Matched);

    // A low-confidence alias resolves to the same entity but flags review.
    conn.execute(
        "UPDATE aliases SET confidence = 0.6 WHERE id = ?1",
        rusqlite::params![first.alias_id],
    )
    .unwrap();
    let third = identity::resolve(&mut conn, &request("email", "a@x", "A")).unwrap();
    assert_eq!(third.entity_id, first.entity_id);
    assert_eq!(third.outcome, Outcome::PendingReview);
}

#[test]
fn merge_moves_aliases_and_tombstones_the_merged_entity() {
    let db = test_db();
    let mut conn = db.lock().unwrap();

    // Resolve (email, a@x) -> α and (email, b@x) -> β, then merge β into α.
    let alpha = identity::resolve(&mut conn, &request("email", "a@x", "A")).unwrap();
    let beta = identity::resolve(&mut conn, &request("email", "b@x", "B")).unwrap();

    identity::merge(&mut conn, &alpha.entity_id, &beta.entity_id, "tester").unwrap();

    // α now carries both aliases.
    let values: Vec<String> = aliases::list_by_canonical(&conn, &alpha.entity_id)
        .unwrap()
        .into_iter()
        .map(|a| a.alias_value)
        .collect();
    assert!(values.contains(&"a@x".to_string()));
    assert!(values.contains(&"b@x".to_string()));

    // β is gone from the live graph.
    let beta_entity = entities::get(&conn, &beta.entity_id).unwrap().unwrap();
    assert!(!beta_entity.is_live());

    // Resolving b@x again lands on α.
    let re = identity::resolve(&mut conn, &request("email", "b@x", "B")).unwrap();
    assert_eq!(re.entity_id, alpha.entity_id);
    assert_eq!(re.outcome, Outcome::Matched);
}

#[test]
fn merge_conserves_edges_and_appends_one_provenance_row() {
    let db = test_db();
    let mut conn = db.lock().unwrap();

    let a = identity::resolve(&mut conn, &request("email", "a@x", "A")).unwrap();
    let b = identity::resolve(&mut conn, &request("email", "b@x", "B")).unwrap();
    let c = identity::resolve(&mut conn, &request("email", "c@x", "C")).unwrap();

    let make_edge = |conn: &rusqlite::Connection, from: &str, to: &str| {
        edges::create(
            conn,
            edges::CreateInput {
                from_id: from.into(),
                to_id: to.into(),
                edge_type: "knows".into(),
                confidence: 1.0,
                source: "test".into(),
                metadata: None,
            },
        )
        .unwrap()
    };
    make_edge(&conn, &b.entity_id, &c.entity_id); // re-pointed to a -> c
    make_edge(&conn, &c.entity_id, &b.entity_id); // re-pointed to c -> a
    make_edge(&conn, &a.entity_id, &b.entity_id); // collapses to a self-edge, dropped

    let survivor_before = entities::get(&conn, &a.entity_id).unwrap().unwrap();

    identity::merge(&mut conn, &a.entity_id, &b.entity_id, "tester").unwrap();

    // Every active edge incident on b moved to a or vanished as a self-edge.
    assert!(edges::edges_from(&conn, &b.entity_id).unwrap().is_empty());
    assert!(edges::edges_to(&conn, &b.entity_id).unwrap().is_empty());
    let from_a = edges::edges_from(&conn, &a.entity_id).unwrap();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].to_id, c.entity_id);
    let to_a = edges::edges_to(&conn, &a.entity_id).unwrap();
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a[0].from_id, c.entity_id);

    let self_edges: i64 = conn
        .query_row("SELECT COUNT(*) FROM edges WHERE from_id = to_id", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(self_edges, 0);

    // The survivor's updated_at strictly increased (re-embed flag).
    let survivor_after = entities::get(&conn, &a.entity_id).unwrap().unwrap();
    assert!(survivor_after.updated_at > survivor_before.updated_at);

    // Exactly one provenance row for the merge.
    let rows = provenance::list_by_target(&conn, &a.entity_id, "entity").unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].source_ref.starts_with("merge:"));
}

#[test]
fn failed_merge_rolls_back_entirely() {
    let db = test_db();
    let mut conn = db.lock().unwrap();

    let a = identity::resolve(&mut conn, &request("email", "a@x", "A")).unwrap();
    let b = identity::resolve(&mut conn, &request("email", "b@x", "B")).unwrap();

    // Tombstone b out-of-band; the merge must now refuse and change nothing.
    entities::soft_delete(&conn, &b.entity_id).unwrap();
    let b_aliases_before = aliases::list_by_canonical(&conn, &b.entity_id).unwrap().len();

    assert!(identity::merge(&mut conn, &a.entity_id, &b.entity_id, "tester").is_err());

    assert_eq!(
        aliases::list_by_canonical(&conn, &b.entity_id).unwrap().len(),
        b_aliases_before
    );
    assert!(provenance::list_by_target(&conn, &a.entity_id, "entity")
        .unwrap()
        .is_empty());
}

#[test]
fn alias_review_queue_flow() {
    let db = test_db();
    let mut conn = db.lock().unwrap();

    let created = identity::resolve(&mut conn, &request("slack", "U42", "Mystery")).unwrap();
    conn.execute(
        "UPDATE aliases SET confidence = 0.5 WHERE id = ?1",
        rusqlite::params![created.alias_id],
    )
    .unwrap();

    let pending = aliases::pending_reviews(&conn).unwrap();
    assert_eq!(pending.len(), 1);

    aliases::mark_reviewed(&conn, &created.alias_id, true).unwrap();
    assert!(aliases::pending_reviews(&conn).unwrap().is_empty());

    let resolved = identity::resolve(&mut conn, &request("slack", "U42", "Mystery")).unwrap();
    assert_eq!(resolved.outcome, Outcome::Matched);
}
