// Stigmergy read helpers. Writing is events::writer territory — nothing in
// here inserts into stigmergy_events.

use super::Store;
use crate::atoms::error::CoreResult;
use crate::atoms::types::StoredEvent;
use chrono::{Duration, Utc};
use rusqlite::params;

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        timestamp: row.get(2)?,
        subject: row.get(3)?,
        source: row.get(4)?,
        data_json: row.get(5)?,
        content_hash: row.get(6)?,
    })
}

const EVENT_COLS: &str = "id, event_type, timestamp, subject, source, data_json, content_hash";

impl Store {
    /// Events newer than `cutoff` (ISO-8601) whose type starts with `prefix`.
    /// Ordered oldest-first so time-adjacent analysis (foresight transitions)
    /// can walk the result directly.
    pub fn events_since(&self, cutoff: &str, prefix: &str) -> CoreResult<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM stigmergy_events
             WHERE timestamp > ?1 AND event_type LIKE ?2
             ORDER BY timestamp ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![cutoff, format!("{}%", prefix)], event_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Events with id greater than `since_id` (defense watermark reads).
    pub fn events_after_id(&self, since_id: i64) -> CoreResult<Vec<StoredEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLS} FROM stigmergy_events WHERE id > ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![since_id], event_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Highest event id, or 0 on an empty table.
    pub fn latest_event_id(&self) -> CoreResult<i64> {
        let conn = self.conn.lock();
        let id: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM stigmergy_events", [], |r| r.get(0))?;
        Ok(id.unwrap_or(0))
    }

    /// Count of events in the trailing `hours` window.
    pub fn count_events_since_hours(&self, hours: f64) -> CoreResult<i64> {
        let cutoff = (Utc::now() - Duration::seconds((hours * 3600.0) as i64)).to_rfc3339();
        let conn = self.conn.lock();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM stigmergy_events WHERE timestamp > ?1",
            params![cutoff],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// Count of recent events whose source matches a LIKE pattern — the
    /// stigmergy half of the watchdog's liveness check.
    pub fn count_recent_by_source(&self, pattern: &str, minutes: i64) -> CoreResult<i64> {
        let cutoff = (Utc::now() - Duration::minutes(minutes)).to_rfc3339();
        let conn = self.conn.lock();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM stigmergy_events WHERE timestamp > ?1 AND source LIKE ?2",
            params![cutoff, pattern],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    /// The most recent coordinator recommendation event for a port, if any.
    /// Daemons call this at cycle start; the coordinator never pushes.
    pub fn latest_recommendation(
        &self,
        namespace: &str,
        port: &str,
    ) -> CoreResult<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data_json FROM stigmergy_events
             WHERE event_type = ?1 AND subject LIKE ?2
             ORDER BY id DESC LIMIT 1",
        )?;
        let event_type = format!("{}.coordinator.recommendation", namespace);
        let subject = format!("recommendation:{}:%", port.to_uppercase());
        let data: Option<String> = stmt
            .query_row(params![event_type, subject], |r| r.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match data {
            Some(json) => {
                let v: serde_json::Value = serde_json::from_str(&json)?;
                Ok(v.get("data").and_then(|d| d.get("recommendation")).cloned())
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_since_filters_by_prefix_and_time() {
        let store = Store::open_in_memory("90").unwrap();
        {
            let conn = store.conn.lock();
            for (i, (ts, et)) in [
                ("2026-01-01T00:00:00+00:00", "hfo.gen90.prey8.perceive"),
                ("2026-01-01T01:00:00+00:00", "hfo.gen90.hive8.hunt"),
                ("2025-12-01T00:00:00+00:00", "hfo.gen90.prey8.react"),
                ("2026-01-01T02:00:00+00:00", "system_health.check"),
            ]
            .iter()
            .enumerate()
            {
                conn.execute(
                    "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                     VALUES (?1, ?2, '', 'test', '{}', ?3)",
                    params![et, ts, format!("h{}", i)],
                )
                .unwrap();
            }
        }
        let rows = store
            .events_since("2025-12-31T00:00:00+00:00", "hfo.gen90.")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_type, "hfo.gen90.prey8.perceive");
    }

    #[test]
    fn latest_event_id_on_empty_table() {
        let store = Store::open_in_memory("90").unwrap();
        assert_eq!(store.latest_event_id().unwrap(), 0);
    }
}
