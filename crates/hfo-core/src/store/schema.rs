// Database schema and migrations for the SSOT.
// Called once at startup by Store::migrate() after WAL is enabled.
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS or ALTER TABLE … ADD COLUMN (errors silently swallowed) at the end
// of run_migrations() — never modify existing SQL to keep upgrade paths clean.
//
// The signal-metadata trigger is generation-scoped, so it is dropped and
// recreated on every run; everything else is create-if-missing.

use crate::atoms::error::CoreResult;
use chrono::Utc;
use log::info;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection, generation: &str) -> CoreResult<()> {
    // ── Core tables ──────────────────────────────────────────────────
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stigmergy_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            data_json TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT NOT NULL UNIQUE
        );

        CREATE INDEX IF NOT EXISTS idx_stigmergy_type_time
            ON stigmergy_events(event_type, timestamp);
        CREATE INDEX IF NOT EXISTS idx_stigmergy_time
            ON stigmergy_events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_stigmergy_source
            ON stigmergy_events(source, timestamp);

        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            bluf TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            port TEXT NOT NULL DEFAULT 'P6',
            doc_type TEXT NOT NULL DEFAULT 'note',
            tags TEXT NOT NULL DEFAULT '',
            word_count INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS document_enrichments (
            doc_id INTEGER NOT NULL REFERENCES documents(id),
            kind TEXT NOT NULL DEFAULT 'summary',
            content TEXT NOT NULL DEFAULT '',
            model_id TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (doc_id, kind)
        );

        CREATE TABLE IF NOT EXISTS embeddings (
            doc_id INTEGER PRIMARY KEY REFERENCES documents(id),
            embedding BLOB NOT NULL,
            model TEXT NOT NULL DEFAULT '',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS compute_route (
            port         TEXT NOT NULL,
            daemon_name  TEXT NOT NULL,
            task_type    TEXT NOT NULL DEFAULT 'default',
            model_id     TEXT NOT NULL,
            provider     TEXT NOT NULL,
            priority     INTEGER NOT NULL DEFAULT 0,
            updated_at   TEXT NOT NULL,
            updated_by   TEXT NOT NULL,
            reason       TEXT,
            PRIMARY KEY (port, daemon_name, task_type)
        );

        CREATE TABLE IF NOT EXISTS embed_queue (
            doc_id     INTEGER NOT NULL REFERENCES documents(id),
            reason     TEXT NOT NULL,
            queued_at  TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'pending'
                       CHECK(status IN ('pending', 'claimed', 'done', 'failed')),
            claimed_by TEXT,
            claimed_at TEXT,
            UNIQUE(doc_id, status)
        );

        CREATE INDEX IF NOT EXISTS idx_embed_queue_pending
            ON embed_queue(status, queued_at)
            WHERE status = 'pending';

        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
    ",
    )?;

    // ── FTS5 mirror of documents ─────────────────────────────────────
    conn.execute_batch(
        "
        CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
            title,
            bluf,
            content,
            content='documents',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS documents_fts_insert
        AFTER INSERT ON documents BEGIN
            INSERT INTO documents_fts(rowid, title, bluf, content)
            VALUES (NEW.id, NEW.title, NEW.bluf, NEW.content);
        END;

        CREATE TRIGGER IF NOT EXISTS documents_fts_delete
        AFTER DELETE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, bluf, content)
            VALUES ('delete', OLD.id, OLD.title, OLD.bluf, OLD.content);
        END;

        CREATE TRIGGER IF NOT EXISTS documents_fts_update
        AFTER UPDATE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, bluf, content)
            VALUES ('delete', OLD.id, OLD.title, OLD.bluf, OLD.content);
            INSERT INTO documents_fts(rowid, title, bluf, content)
            VALUES (NEW.id, NEW.title, NEW.bluf, NEW.content);
        END;
    ",
    )
    .ok();

    // ── Vector index (optional extension) ────────────────────────────
    // The vec extension is loaded out-of-process where available; the BLOB
    // column in `embeddings` is always authoritative.
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_embeddings USING vec0(
            doc_id INTEGER PRIMARY KEY,
            embedding FLOAT[384]
        );",
    )
    .ok();

    // ── Structural gate: signal_metadata required for non-exempt types ──
    // The event writer is the real gate; this trigger is the backstop that
    // stops direct INSERTs from unfamiliar code. Exempt: gate_block (the
    // chicken-and-egg event), the gated session machines, the previous
    // generation, system_health, and chimera replays.
    let ns = format!("hfo.gen{}", generation);
    let prior = match generation.parse::<u64>() {
        Ok(n) if n > 0 => format!("hfo.gen{}", n - 1),
        _ => format!("{}.prior", ns),
    };
    conn.execute("DROP TRIGGER IF EXISTS enforce_signal_metadata", [])?;
    conn.execute(
        &format!(
            "CREATE TRIGGER enforce_signal_metadata
             BEFORE INSERT ON stigmergy_events
             WHEN NEW.event_type NOT LIKE '{ns}.ssot_write.gate_block%'
               AND NEW.event_type NOT LIKE '{ns}.prey8.%'
               AND NEW.event_type NOT LIKE '{ns}.hive8.%'
               AND NEW.event_type NOT LIKE '{prior}.%'
               AND NEW.event_type NOT LIKE 'system_health%'
               AND NEW.event_type NOT LIKE '{ns}.chimera.%'
               AND NEW.data_json NOT LIKE '%\"signal_metadata\"%'
             BEGIN
                 SELECT RAISE(ABORT, 'STRUCTURAL_GATE: signal_metadata required in data_json for non-exempt events. Use events::write_event().');
             END"
        ),
        [],
    )?;

    // ── Embed-queue triggers: documents + enrichments feed the queue ──
    conn.execute_batch(
        "
        CREATE TRIGGER IF NOT EXISTS embed_queue_on_new_document
        AFTER INSERT ON documents
        BEGIN
            INSERT OR IGNORE INTO embed_queue (doc_id, reason, queued_at, status)
            VALUES (NEW.id, 'new_document', datetime('now'), 'pending');
        END;

        CREATE TRIGGER IF NOT EXISTS embed_queue_on_enrichment_insert
        AFTER INSERT ON document_enrichments
        BEGIN
            INSERT OR IGNORE INTO embed_queue (doc_id, reason, queued_at, status)
            VALUES (NEW.doc_id, 'enrichment_updated', datetime('now'), 'pending');
        END;

        CREATE TRIGGER IF NOT EXISTS embed_queue_on_enrichment_update
        AFTER UPDATE ON document_enrichments
        BEGIN
            INSERT OR IGNORE INTO embed_queue (doc_id, reason, queued_at, status)
            VALUES (NEW.doc_id, 'enrichment_updated', datetime('now'), 'pending');
        END;
    ",
    )?;

    seed_compute_routes(conn)?;

    // Schema self-description, for the quine tools and operator inspection.
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_generation', ?1)",
        [generation],
    )?;

    Ok(())
}

/// Baseline compute routes for the known fleet. INSERT OR IGNORE — operator
/// and coordinator updates via set_route are never clobbered by a re-migrate.
fn seed_compute_routes(conn: &Connection) -> CoreResult<()> {
    let now = Utc::now().to_rfc3339();
    let seeds: &[(&str, &str, &str, &str, &str, &str)] = &[
        // (port, daemon, task, model, provider, reason)
        ("P4", "Singer", "default", "gemma3:4b", "ollama", "local fast model for code eval"),
        ("P4", "Singer", "code_eval", "gemma3:4b", "ollama", "local fast model for code eval"),
        ("P5", "Dancer", "default", "gemma3:4b", "ollama", "local model for contingency analysis"),
        ("P5", "Dancer", "contingency", "gemma3:4b", "ollama", "local model for contingency analysis"),
        ("P6", "Kraken", "default", "qwen2.5-coder:7b", "ollama", "heavy model for enrichment"),
        ("P6", "Kraken", "classification", "gemma3:4b", "ollama", "light model for port/doctype classification"),
        ("P6", "Devourer", "default", "qwen2.5-coder:7b", "ollama", "heavy model for progressive summarization"),
        ("P6", "Devourer", "classification", "gemma3:4b", "ollama", "light model for document classification"),
        ("P7", "Background", "default", "gemini-2.5-flash", "gemini_free", "hosted free tier for web research"),
        ("P7", "Background", "patrol", "gemini-2.5-flash", "gemini_free", "hosted free tier for patrol analysis"),
        ("P0", "Watcher", "default", "gemma3:4b", "ollama", "light model for swarm observation"),
        ("P7", "Foresight", "default", "qwen2.5-coder:7b", "ollama", "heavy model for foresight analysis"),
        ("P7", "Summoner", "default", "gemini-2.5-flash", "gemini_free", "hosted free tier for orchestration"),
    ];

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO compute_route
         (port, daemon_name, task_type, model_id, provider, priority, updated_at, updated_by, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 'migration_seed', ?7)",
    )?;
    let mut seeded = 0;
    for (port, daemon, task, model, provider, reason) in seeds {
        seeded += stmt.execute(rusqlite::params![port, daemon, task, model, provider, now, reason])?;
    }
    if seeded > 0 {
        info!("[store] Seeded {} compute routes", seeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn in_memory_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = in_memory_db();
        let result = run_migrations(&conn, "90");
        assert!(result.is_ok(), "First migration run failed: {:?}", result);
    }

    #[test]
    fn migrations_idempotent() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();
        let result = run_migrations(&conn, "90");
        assert!(result.is_ok(), "Second migration run failed: {:?}", result);
    }

    #[test]
    fn core_tables_created() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"stigmergy_events".to_string()));
        assert!(tables.contains(&"documents".to_string()));
        assert!(tables.contains(&"document_enrichments".to_string()));
        assert!(tables.contains(&"embeddings".to_string()));
        assert!(tables.contains(&"compute_route".to_string()));
        assert!(tables.contains(&"embed_queue".to_string()));
        assert!(tables.contains(&"meta".to_string()));
    }

    #[test]
    fn trigger_rejects_bare_insert() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();

        let err = conn
            .execute(
                "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                 VALUES ('hfo.gen90.bypass.test', '2026-01-01T00:00:00Z', 's', 'src', '{\"data\":{\"foo\":\"bar\"}}', 'h1')",
                [],
            )
            .unwrap_err();
        assert!(err.to_string().contains("STRUCTURAL_GATE"), "got: {}", err);
    }

    #[test]
    fn trigger_exempts_gate_block_and_sessions() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();

        for (i, event_type) in [
            "hfo.gen90.ssot_write.gate_block",
            "hfo.gen90.prey8.perceive",
            "hfo.gen90.hive8.hunt",
            "hfo.gen89.singer.heartbeat",
            "system_health.check",
        ]
        .iter()
        .enumerate()
        {
            let n = conn
                .execute(
                    "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                     VALUES (?1, '2026-01-01T00:00:00Z', 's', 'src', '{}', ?2)",
                    rusqlite::params![event_type, format!("hash{}", i)],
                )
                .unwrap();
            assert_eq!(n, 1, "exempt type {} was rejected", event_type);
        }
    }

    #[test]
    fn document_insert_feeds_embed_queue() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();

        conn.execute(
            "INSERT INTO documents (title, bluf, content) VALUES ('t', 'b', 'c')",
            [],
        )
        .unwrap();

        let (reason, status): (String, String) = conn
            .query_row(
                "SELECT reason, status FROM embed_queue WHERE doc_id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(reason, "new_document");
        assert_eq!(status, "pending");

        // A second pending entry for the same doc is absorbed by UNIQUE.
        conn.execute(
            "INSERT INTO document_enrichments (doc_id, kind, content) VALUES (1, 'summary', 's')",
            [],
        )
        .unwrap();
        let pending: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM embed_queue WHERE doc_id = 1 AND status = 'pending'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(pending, 1);
    }

    #[test]
    fn routes_seeded_and_reseed_preserves_updates() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM compute_route", [], |r| r.get(0))
            .unwrap();
        assert!(n >= 13);

        conn.execute(
            "UPDATE compute_route SET model_id = 'phi4:14b', updated_by = 'operator'
             WHERE port = 'P4' AND daemon_name = 'Singer' AND task_type = 'default'",
            [],
        )
        .unwrap();
        run_migrations(&conn, "90").unwrap();
        let model: String = conn
            .query_row(
                "SELECT model_id FROM compute_route
                 WHERE port = 'P4' AND daemon_name = 'Singer' AND task_type = 'default'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(model, "phi4:14b");
    }

    #[test]
    fn fts_search_works() {
        let conn = in_memory_db();
        run_migrations(&conn, "90").unwrap();

        conn.execute(
            "INSERT INTO documents (title, bluf, content)
             VALUES ('Pheromone scoring', 'ACO notes', 'evaporation and volume terms')",
            [],
        )
        .unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents_fts WHERE documents_fts MATCH 'evaporation'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }
}
