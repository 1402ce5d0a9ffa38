//! Secret store and cipher properties: rotation atomicity and round-trip
//! encryption.

mod helpers;

use alexandria::encryption::Encryptor;
use alexandria::secrets;
use helpers::test_db;

fn cipher() -> Encryptor {
    Encryptor::new(&Encryptor::generate_key()).unwrap()
}

fn create_secret(conn: &rusqlite::Connection, name: &str, token: &str, scope: Vec<String>) {
    secrets::create(
        conn,
        secrets::CreateInput {
            name: name.into(),
            encrypted_value: token.into(),
            created_by: "a".into(),
            scope,
            ..Default::default()
        },
    )
    .unwrap();
}

#[test]
fn rotation_appends_history_and_swaps_live_value() {
    let db = test_db();
    let cipher = cipher();
    let mut conn = db.lock().unwrap();

    create_secret(&conn, "k", &cipher.encrypt("v1"), vec!["*".into()]);

    // Update (no history), then rotate twice.
    secrets::update_value(&conn, "k", &cipher.encrypt("v2")).unwrap();
    assert!(secrets::history(&conn, "k").unwrap().is_empty());

    secrets::rotate(&mut conn, "k", &cipher.encrypt("v3"), "a").unwrap();

    let live = secrets::get_by_name(&conn, "k").unwrap().unwrap();
    assert_eq!(cipher.decrypt(&live.encrypted_value).unwrap(), "v3");

    let history = secrets::history(&conn, "k").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(cipher.decrypt(&history[0].encrypted_value).unwrap(), "v2");

    secrets::rotate(&mut conn, "k", &cipher.encrypt("v4"), "b").unwrap();
    let history = secrets::history(&conn, "k").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(cipher.decrypt(&history[1].encrypted_value).unwrap(), "v3");
    assert_eq!(history[1].rotated_by, "b");
}

#[test]
fn failed_rotation_leaves_both_rows_untouched() {
    let db = test_db();
    let cipher = cipher();
    let mut conn = db.lock().unwrap();

    create_secret(&conn, "k", &cipher.encrypt("v1"), vec![]);
    secrets::rotate(&mut conn, "k", &cipher.encrypt("v2"), "a").unwrap();

    // Rotating a missing secret fails before any write.
    assert!(secrets::rotate(&mut conn, "ghost", "tok", "a").is_err());

    let live = secrets::get_by_name(&conn, "k").unwrap().unwrap();
    assert_eq!(cipher.decrypt(&live.encrypted_value).unwrap(), "v2");
    assert_eq!(secrets::history(&conn, "k").unwrap().len(), 1);
}

#[test]
fn cipher_round_trip_and_key_separation() {
    let key = Encryptor::generate_key();
    let enc = Encryptor::new(&key).unwrap();

    for plaintext in ["v1", "", "emoji \u{1F511}", &"x".repeat(10_000)] {
        let token = enc.encrypt(plaintext);
        assert_eq!(enc.decrypt(&token).unwrap(), plaintext);
    }

    // Two encryptions of the same plaintext differ (random IV), both decrypt.
    let t1 = enc.encrypt("same");
    let t2 = enc.encrypt("same");
    assert_ne!(t1, t2);
    assert_eq!(enc.decrypt(&t1).unwrap(), "same");
    assert_eq!(enc.decrypt(&t2).unwrap(), "same");

    // A different key cannot decrypt, and malformed keys never construct.
    let other = Encryptor::new(&Encryptor::generate_key()).unwrap();
    assert!(other.decrypt(&t1).is_err());
    assert!(Encryptor::new("short").is_err());
    assert!(Encryptor::new("").is_err());
}

#[test]
fn legacy_scope_rules() {
    let db = test_db();
    let conn = db.lock().unwrap();

    create_secret(&conn, "open", "tok", vec!["*".into()]);
    create_secret(&conn, "scoped", "tok", vec!["b".into()]);
    create_secret(&conn, "locked", "tok", vec![]);

    let open = secrets::get_by_name(&conn, "open").unwrap().unwrap();
    let scoped = secrets::get_by_name(&conn, "scoped").unwrap().unwrap();
    let locked = secrets::get_by_name(&conn, "locked").unwrap().unwrap();

    assert!(secrets::can_access(&open, "anyone"));
    assert!(secrets::can_access(&scoped, "b"));
    assert!(!secrets::can_access(&scoped, "u"));
    assert!(!secrets::can_access(&locked, "u"));
    // The admin identity and the owner always pass.
    assert!(secrets::can_access(&locked, "warren"));
    assert!(secrets::can_access(&locked, "a"));
}
