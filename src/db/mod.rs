//! SQLite database initialization, schema, migrations, and health checks.
//!
//! The vault runs on a single SQLite database with the sqlite-vec extension
//! providing cosine-distance vector search. One connection is shared by all
//! tasks behind a mutex; transactions use rusqlite's `Connection::transaction`.

pub mod migrations;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;

/// Shared database handle. All store operations lock this for the duration
/// of their statement or transaction; none hold it across an await point.
pub type Db = Arc<Mutex<Connection>>;

/// Number of dimensions in all embedding vectors.
pub const EMBEDDING_DIM: usize = 384;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Current UTC time as a fixed-width RFC 3339 string.
///
/// Microsecond precision with a trailing `Z` keeps the column values
/// lexicographically ordered, which the expiry and staleness predicates
/// rely on.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert raw little-endian bytes back to an f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Open (or create) the vault database at the given path, with the vec
/// extension loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL for concurrent readers; FKs on; wait for locks instead of failing.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    let integrity: String = conn.pragma_query_value(None, "quick_check", |row| row.get(0))?;
    if integrity != "ok" {
        anyhow::bail!("database integrity check failed: {integrity}");
    }

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database wrapped as a shared [`Db`] handle.
pub fn open_memory_db() -> Result<Db> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Result of a full database health check.
pub struct HealthReport {
    pub schema_version: u32,
    pub integrity_ok: bool,
    pub sqlite_vec_version: String,
    pub knowledge_count: i64,
    pub secret_count: i64,
    pub entity_count: i64,
}

/// Run a health check on the database. Used by GET /health and /stats.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let schema_version =
        migrations::get_schema_version(conn).context("failed to read schema version")?;

    let integrity: String = conn
        .pragma_query_value(None, "integrity_check", |row| row.get(0))
        .context("failed to run integrity check")?;

    let sqlite_vec_version: String = conn
        .query_row("SELECT vec_version()", [], |row| row.get(0))
        .context("failed to get sqlite-vec version")?;

    let knowledge_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM knowledge WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let secret_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM secrets", [], |row| row.get(0))
        .unwrap_or(0);

    let entity_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM entities WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(HealthReport {
        schema_version,
        integrity_ok: integrity == "ok",
        sqlite_vec_version,
        knowledge_count,
        secret_count,
        entity_count,
    })
}
