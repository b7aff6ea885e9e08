// Document CRUD + FTS search. Ingestion tools own the write path; the core
// reads for audits and feeds the embedding worker. Inserting here fires the
// embed-queue trigger, so every new document is re-embedded automatically.

use super::Store;
use crate::atoms::error::CoreResult;
use crate::atoms::types::Document;
use rusqlite::params;

fn doc_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        title: row.get(1)?,
        bluf: row.get(2)?,
        content: row.get(3)?,
        source: row.get(4)?,
        port: row.get(5)?,
        doc_type: row.get(6)?,
        tags: row.get(7)?,
        word_count: row.get(8)?,
    })
}

const DOC_COLS: &str = "id, title, bluf, content, source, port, doc_type, tags, word_count";

impl Store {
    /// Insert a document; word_count is derived. Returns the new doc id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_document(
        &self,
        title: &str,
        bluf: &str,
        content: &str,
        source: &str,
        port: &str,
        doc_type: &str,
        tags: &str,
    ) -> CoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (title, bluf, content, source, port, doc_type, tags, word_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                title,
                bluf,
                content,
                source,
                port.to_uppercase(),
                doc_type,
                tags,
                content.split_whitespace().count() as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_document(&self, doc_id: i64) -> CoreResult<Option<Document>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {DOC_COLS} FROM documents WHERE id = ?1"))?;
        match stmt.query_row(params![doc_id], doc_from_row) {
            Ok(d) => Ok(Some(d)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn document_count(&self) -> CoreResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?)
    }

    /// BM25-ranked full-text search over title/bluf/content.
    pub fn fts_search(&self, query: &str, limit: usize) -> CoreResult<Vec<Document>> {
        let conn = self.conn.lock();
        let cols = DOC_COLS
            .split(", ")
            .map(|c| format!("d.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols} FROM documents d
             JOIN documents_fts ON documents_fts.rowid = d.id
             WHERE documents_fts MATCH ?1
             ORDER BY documents_fts.rank LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![query, limit as i64], doc_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Store a document's embedding — BLOB always, vec index when available.
    pub fn store_embedding(&self, doc_id: i64, vector: &[f32], model: &str) -> CoreResult<()> {
        let bytes = super::embedding::f32_vec_to_bytes(vector);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (doc_id, embedding, model, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![doc_id, bytes, model],
        )?;
        // Mirror into the vec index when the extension is loaded; the BLOB
        // stays authoritative either way.
        conn.execute(
            "INSERT OR REPLACE INTO vec_embeddings (doc_id, embedding) VALUES (?1, ?2)",
            params![doc_id, bytes],
        )
        .ok();
        Ok(())
    }

    pub fn get_embedding(&self, doc_id: i64) -> CoreResult<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT embedding FROM embeddings WHERE doc_id = ?1")?;
        match stmt.query_row(params![doc_id], |r| r.get::<_, Vec<u8>>(0)) {
            Ok(bytes) => Ok(Some(super::embedding::bytes_to_f32_vec(&bytes))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_derives_word_count_and_queues_embed() {
        let store = Store::open_in_memory("90").unwrap();
        let id = store
            .insert_document("Title", "Bluf", "one two three four", "test", "p6", "note", "")
            .unwrap();
        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.word_count, 4);
        assert_eq!(doc.port, "P6");
        assert_eq!(store.embed_queue_status().unwrap().pending, 1);
    }

    #[test]
    fn fts_finds_inserted_document() {
        let store = Store::open_in_memory("90").unwrap();
        store
            .insert_document("Watchdog notes", "", "restart the stale daemons", "t", "P5", "note", "")
            .unwrap();
        let hits = store.fts_search("stale", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Watchdog notes");
    }

    #[test]
    fn embedding_roundtrip() {
        let store = Store::open_in_memory("90").unwrap();
        let id = store
            .insert_document("T", "", "c", "t", "P6", "note", "")
            .unwrap();
        let vec: Vec<f32> = (0..4).map(|i| i as f32 * 0.5).collect();
        store.store_embedding(id, &vec, "nomic-embed-text").unwrap();
        assert_eq!(store.get_embedding(id).unwrap().unwrap(), vec);
    }
}
