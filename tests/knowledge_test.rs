//! Knowledge store properties: soft delete, access monotonicity, and
//! search ordering under decay.

mod helpers;

use alexandria::knowledge::search::{self, apply_decay};
use alexandria::knowledge::store;
use alexandria::knowledge::types::{CreateInput, Decay, Scope, SearchInput, UpdateInput};
use alexandria::VaultError;
use helpers::{insert_knowledge, near_spike, spike, test_db};

fn search_as(agent: &str, embedding: Vec<f32>) -> SearchInput {
    SearchInput {
        query_embedding: embedding,
        agent_id: agent.into(),
        ..Default::default()
    }
}

#[test]
fn soft_deleted_entries_vanish_from_get_and_search() {
    let db = test_db();
    let id = insert_knowledge(&db, "doomed entry", "scout", spike(0));

    let mut conn = db.lock().unwrap();
    store::delete(&mut conn, &id, "scout").unwrap();

    // Not found for every requester, the owner and admin included.
    for requester in ["scout", "lily", "warren"] {
        assert!(store::get(&conn, &id, requester).unwrap().is_none());
    }

    // Search never returns it.
    let results = search::search(&conn, &search_as("scout", spike(0))).unwrap();
    assert!(results.iter().all(|r| r.entry.id != id));

    // A fresh create never reuses the id.
    drop(conn);
    let new_id = insert_knowledge(&db, "replacement", "scout", spike(0));
    assert_ne!(new_id, id);
}

#[test]
fn widening_visibility_never_revokes() {
    let db = test_db();
    let mut conn = db.lock().unwrap();

    let entry = store::create(
        &mut conn,
        CreateInput {
            content: "team note".into(),
            source_agent: "scout".into(),
            scope: Some(Scope::Private),
            ..Default::default()
        },
    )
    .unwrap();

    // Private: owner and admin only.
    assert!(store::get(&conn, &entry.id, "scout").unwrap().is_some());
    assert!(store::get(&conn, &entry.id, "lily").unwrap().is_none());

    // Sharing with lily grants lily without revoking the owner.
    store::update(
        &mut conn,
        &entry.id,
        "scout",
        UpdateInput {
            scope: Some(Scope::Shared),
            shared_with: Some(vec!["lily".into()]),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(store::get(&conn, &entry.id, "scout").unwrap().is_some());
    assert!(store::get(&conn, &entry.id, "lily").unwrap().is_some());
    assert!(store::get(&conn, &entry.id, "dutybound").unwrap().is_none());

    // Lowering strictness to public preserves everyone already visible.
    store::update(
        &mut conn,
        &entry.id,
        "scout",
        UpdateInput {
            scope: Some(Scope::Public),
            ..Default::default()
        },
    )
    .unwrap();
    for requester in ["scout", "lily", "dutybound"] {
        assert!(store::get(&conn, &entry.id, requester).unwrap().is_some());
    }
}

#[test]
fn update_by_non_owner_is_denied_without_detail() {
    let db = test_db();
    let id = insert_knowledge(&db, "owned", "scout", spike(0));

    let mut conn = db.lock().unwrap();
    let err = store::update(
        &mut conn,
        &id,
        "lily",
        UpdateInput {
            content: Some("hijacked".into()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, VaultError::AccessDenied));

    // The entry is untouched.
    let entry = store::get(&conn, &id, "scout").unwrap().unwrap();
    assert_eq!(entry.content, "owned");
}

#[test]
fn decayed_score_decreases_in_age_but_order_follows_distance() {
    // Property: for fixed similarity, the decayed score strictly decreases
    // with age for slow/fast/ephemeral and stays constant for none.
    let days = |n: i64| {
        (chrono::Utc::now() - chrono::Duration::days(n))
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    };
    for decay in [Decay::Slow, Decay::Fast, Decay::Ephemeral] {
        let mut last = f64::INFINITY;
        for age in [0, 3, 10, 40] {
            let score = apply_decay(0.9, decay, &days(age));
            assert!(score < last, "{decay:?} at {age}d must decrease");
            last = score;
        }
    }
    assert_eq!(apply_decay(0.9, Decay::None, &days(400)), 0.9);

    // And the documented compromise: results are ordered by raw embedding
    // distance, not by the decayed score.
    let db = test_db();
    let near_but_stale = insert_knowledge(&db, "stale but near", "scout", spike(0));
    let far_but_fresh = insert_knowledge(&db, "fresh but further", "scout", near_spike(0));

    let conn = db.lock().unwrap();
    conn.execute(
        "UPDATE knowledge SET created_at = ?1, relevance_decay = 'ephemeral' WHERE id = ?2",
        rusqlite::params![days(30), near_but_stale],
    )
    .unwrap();

    let results = search::search(&conn, &search_as("scout", spike(0))).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entry.id, near_but_stale);
    assert_eq!(results[1].entry.id, far_but_fresh);
    assert!(
        results[0].relevance < results[1].relevance,
        "reported relevance reflects decay even though ordering does not"
    );
}
