// SSOT store — the single shared mutable resource of the fleet.
// One SQLite file in WAL mode; every writer gets a 5 s busy timeout so
// concurrent daemons block briefly instead of failing.
//
// Module layout:
//   schema       — tables, indices, triggers, compute_route seed
//   events       — stigmergy read helpers (writes go through events::writer)
//   routes       — compute_route lookup/upsert
//   embed_queue  — claim/release/stale-reclaim work queue
//   documents    — document insert + FTS search (audits, tests, ingestion)
//   embedding    — bytes_to_f32_vec, f32_vec_to_bytes, cosine_similarity

use crate::atoms::error::{CoreError, CoreResult};
use log::info;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

mod documents;
pub(crate) mod embedding;
mod embed_queue;
mod events;
mod routes;
pub mod schema;

pub use embedding::{bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes};

/// Thread-safe database wrapper. All engine components share one of these
/// per process; cross-process coordination happens through the file itself.
pub struct Store {
    /// The SQLite connection, protected by a Mutex.
    /// `pub` for integration tests that need raw statements.
    pub conn: Mutex<Connection>,
}

impl Store {
    /// Open the SSOT read-write. Fails with `StoreUnavailable` when the file
    /// does not exist — only `migrate` creates it.
    pub fn open_rw(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::StoreUnavailable {
                path: path.display().to_string(),
            });
        }
        let conn = Connection::open(path)?;
        configure(&conn);
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// Open the SSOT read-only (URI mode). Readers never block writers.
    pub fn open_ro(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::StoreUnavailable {
                path: path.display().to_string(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// Create the SSOT if needed and bring the schema up to date.
    /// Idempotent — safe to run on every deploy.
    pub fn migrate(path: &Path, generation: &str) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        info!("[store] Opening SSOT at {:?}", path);
        let conn = Connection::open(path)?;
        configure(&conn);
        schema::run_migrations(&conn, generation)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// In-memory store with the full schema, for tests.
    pub fn open_in_memory(generation: &str) -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn, generation)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// True when the vec extension's virtual table was created successfully.
    pub fn has_vec_index(&self) -> bool {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'vec_embeddings'",
            [],
            |r| r.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false)
    }
}

fn configure(conn: &Connection) {
    conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
    conn.busy_timeout(std::time::Duration::from_millis(5000)).ok();
}
