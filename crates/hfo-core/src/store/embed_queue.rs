// embed_queue — the trigger-fed re-embedding work queue.
//
// Triggers on documents / document_enrichments insert pending rows; the
// embedding worker drains them through claim_batch / mark_done. UNIQUE
// (doc_id, status) keeps at most one pending entry per document, so a
// burst of enrichment updates collapses into a single re-embed.

use super::Store;
use crate::atoms::error::CoreResult;
use crate::atoms::types::EmbedQueueStatus;
use chrono::Utc;
use rusqlite::params;

impl Store {
    /// Claim up to `batch_size` pending entries for `worker_name`.
    ///
    /// Stale claims (claimed longer than `stale_minutes` ago but never
    /// finished) are first released back to pending, so a crashed worker's
    /// batch is re-claimable. Reclaim + select + claim run in one
    /// transaction. Returns the claimed doc_ids, oldest first.
    pub fn claim_embed_batch(
        &self,
        batch_size: usize,
        worker_name: &str,
        stale_minutes: i64,
    ) -> CoreResult<Vec<i64>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        // Stale reclaim. A doc can have gained a fresh pending row while its
        // old claim sat stale (enrichment fired mid-claim); flipping the
        // claim back would then collide with UNIQUE(doc_id, status), so such
        // claims are dropped instead of flipped.
        let stale_cutoff = format!("-{} minutes", stale_minutes);
        tx.execute(
            "DELETE FROM embed_queue
             WHERE status = 'claimed'
               AND claimed_at < datetime('now', ?1)
               AND doc_id IN (SELECT doc_id FROM embed_queue WHERE status = 'pending')",
            params![stale_cutoff],
        )?;
        tx.execute(
            "UPDATE embed_queue
             SET status = 'pending', claimed_by = NULL, claimed_at = NULL
             WHERE status = 'claimed'
               AND claimed_at < datetime('now', ?1)",
            params![stale_cutoff],
        )?;

        // Docs with a live claim are skipped — claiming them again would
        // create a second claimed row.
        let doc_ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT doc_id FROM embed_queue
                 WHERE status = 'pending'
                   AND doc_id NOT IN (SELECT doc_id FROM embed_queue WHERE status = 'claimed')
                 ORDER BY queued_at ASC
                 LIMIT ?1",
            )?;
            let rows: Vec<i64> = stmt
                .query_map(params![batch_size as i64], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        if !doc_ids.is_empty() {
            let now = Utc::now().to_rfc3339();
            let placeholders = vec!["?"; doc_ids.len()].join(",");
            let sql = format!(
                "UPDATE embed_queue
                 SET status = 'claimed', claimed_by = ?1, claimed_at = ?2
                 WHERE status = 'pending' AND doc_id IN ({placeholders})"
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(worker_name.to_string()), Box::new(now)];
            for id in &doc_ids {
                args.push(Box::new(*id));
            }
            tx.execute(&sql, rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())))?;
        }

        tx.commit()?;
        Ok(doc_ids)
    }

    /// Mark claimed entries done. Returns the number of rows updated.
    pub fn mark_embed_done(&self, doc_ids: &[i64]) -> CoreResult<usize> {
        self.finish_claimed(doc_ids, "done")
    }

    /// Mark claimed entries failed (worker hit a hard error on these docs).
    pub fn mark_embed_failed(&self, doc_ids: &[i64]) -> CoreResult<usize> {
        self.finish_claimed(doc_ids, "failed")
    }

    /// Flip claimed rows to a terminal status. A doc re-queued after an
    /// earlier pass already has a terminal row; that one is replaced rather
    /// than colliding with UNIQUE(doc_id, status).
    fn finish_claimed(&self, doc_ids: &[i64], status: &str) -> CoreResult<usize> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let placeholders = vec!["?"; doc_ids.len()].join(",");
        tx.execute(
            &format!(
                "DELETE FROM embed_queue
                 WHERE status = '{status}' AND doc_id IN ({placeholders})
                   AND doc_id IN (SELECT doc_id FROM embed_queue WHERE status = 'claimed')"
            ),
            rusqlite::params_from_iter(doc_ids.iter()),
        )?;
        let n = tx.execute(
            &format!(
                "UPDATE embed_queue SET status = '{status}'
                 WHERE status = 'claimed' AND doc_id IN ({placeholders})"
            ),
            rusqlite::params_from_iter(doc_ids.iter()),
        )?;
        tx.commit()?;
        Ok(n)
    }

    /// Per-status counters, the queue's backpressure signal.
    pub fn embed_queue_status(&self) -> CoreResult<EmbedQueueStatus> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM embed_queue GROUP BY status")?;
        let mut status = EmbedQueueStatus::default();
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows.filter_map(|r| r.ok()) {
            match row.0.as_str() {
                "pending" => status.pending = row.1,
                "claimed" => status.claimed = row.1,
                "done" => status.done = row.1,
                "failed" => status.failed = row.1,
                _ => {}
            }
        }
        Ok(status)
    }
}
