//! Alexandria — the persistent memory tier for a multi-agent swarm.
//!
//! Alexandria stores three kinds of state and keeps a semantic overlay on top
//! of them:
//!
//! - **Knowledge**: versioned, vector-embedded text entries with scoped
//!   visibility, soft delete, and relevance decay
//! - **Secrets**: encrypted at rest with rotation history and a grant-based
//!   access model
//! - **Context graph**: entities, aliases, and time-valid edges with
//!   provenance, maintained by an identity resolver
//!
//! A background semantic worker continuously embeds entities, scans for
//! similarity edges, and detects clusters with merge proposals.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for cosine-distance vector search
//! - **Embeddings**: pluggable backends (`simple` keyword hashing, `local`
//!   sidecar, `openai`)
//! - **Secrets**: Fernet symmetric encryption (AES-128-CBC + HMAC-SHA256)
//! - **Events**: JSON envelopes through injected publisher/subscriber sinks
//! - **Transport**: JSON HTTP API via axum
//!
//! # Modules
//!
//! - [`config`] — Configuration from TOML files and environment variables
//! - [`db`] — SQLite initialization, schema, migrations, and health checks
//! - [`encryption`] — Fernet cipher facade for secret values
//! - [`embedding`] — Text-to-vector providers and the batch adapter
//! - [`knowledge`] — Knowledge entry CRUD, visibility, and semantic search
//! - [`secrets`] — Encrypted secret storage with rotation history
//! - [`access`] — Grants, people, and devices
//! - [`graph`] — Context graph: entities, edges, aliases, clusters
//! - [`identity`] — Alias resolution and entity merging
//! - [`audit`] — Append-only access log
//! - [`events`] — Event envelopes, bus capability traits, publisher, subscriber
//! - [`semantic`] — Background embedder, similarity scanner, cluster detector
//! - [`briefing`] — Wake-up briefings and boot-context markdown
//! - [`api`] — HTTP surface and middleware

pub mod access;
pub mod api;
pub mod audit;
pub mod briefing;
pub mod config;
pub mod db;
pub mod embedding;
pub mod encryption;
pub mod error;
pub mod events;
pub mod graph;
pub mod identity;
pub mod knowledge;
pub mod secrets;
pub mod semantic;
pub mod server;

pub use error::{Result, VaultError};
