// ── Fleet Atoms: Wire Types ────────────────────────────────────────────────
// The records that cross module boundaries or land in the store. Everything
// here is serde-serializable; the unstructured per-event payload stays an
// opaque `serde_json::Value` inside the envelope's `data`.

use serde::{Deserialize, Serialize};

/// The required per-event provenance record. Without a valid one of these an
/// event is rejected by the writer (and by the database trigger behind it).
///
/// `port`, `model_id`, `daemon_name`, `model_provider` must be non-empty;
/// everything else is observation data that the coordinator aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMetadata {
    pub port: String,
    pub daemon_name: String,
    pub daemon_version: String,
    pub model_id: String,
    pub model_family: String,
    pub model_params_b: f64,
    pub model_provider: String,
    pub model_tier: String,
    pub inference_latency_ms: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_thinking: u64,
    pub quality_score: f64,
    pub quality_method: String,
    pub cost_usd: f64,
    pub vram_gb: f64,
    pub cycle: u64,
    pub task_type: String,
    pub generation: String,
    pub timestamp: String,
}

/// One row of `stigmergy_events` as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub event_type: String,
    pub timestamp: String,
    pub subject: String,
    pub source: String,
    pub data_json: String,
    pub content_hash: String,
}

impl StoredEvent {
    /// Parse the envelope and return its `data` object, tolerating rows
    /// written before the envelope era (raw payloads). Unparseable JSON
    /// yields None — audit spells count and skip, they never raise.
    pub fn data(&self) -> Option<serde_json::Value> {
        let v: serde_json::Value = serde_json::from_str(&self.data_json).ok()?;
        match v.get("data") {
            Some(inner) => Some(inner.clone()),
            None => Some(v),
        }
    }

    /// The embedded signal_metadata object, if any.
    pub fn signal_metadata(&self) -> Option<serde_json::Value> {
        self.data()?.get("signal_metadata").cloned()
    }
}

/// One row of the `compute_route` table — model selection as data, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeRoute {
    pub port: String,
    pub daemon_name: String,
    pub task_type: String,
    pub model_id: String,
    pub provider: String,
    pub priority: i64,
    pub updated_at: String,
    pub updated_by: String,
    pub reason: String,
}

/// A stored text artefact. Written by ingestion tools; the core reads it for
/// audits, search, and re-embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub bluf: String,
    pub content: String,
    pub source: String,
    pub port: String,
    pub doc_type: String,
    pub tags: String,
    pub word_count: i64,
}

/// One row of the trigger-fed `embed_queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedQueueEntry {
    pub doc_id: i64,
    pub reason: String,
    pub queued_at: String,
    pub status: String,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
}

/// Aggregate queue counters, surfaced by watchdog and coordinator events
/// so the embed cadence can be tuned out-of-band.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbedQueueStatus {
    pub pending: i64,
    pub claimed: i64,
    pub done: i64,
    pub failed: i64,
}
