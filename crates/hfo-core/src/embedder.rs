// Embedding worker — drains the trigger-fed embed_queue.
//
// The queue side (claim/mark) lives in store::embed_queue; this module owns
// the HTTP half: calling the local embedding model and writing vectors back.
// Ollama's current /api/embed endpoint is tried first, then the legacy
// /api/embeddings shape, so older servers keep working.

use crate::atoms::constants::EMBED_DIM;
use crate::atoms::error::{CoreError, CoreResult};
use crate::store::Store;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Default local embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        EmbeddingClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_env() -> Self {
        let host =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| crate::ollama::DEFAULT_HOST.into());
        let model =
            std::env::var("HFO_EMBED_MODEL").unwrap_or_else(|_| DEFAULT_EMBED_MODEL.into());
        Self::new(&host, &model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed one text. Tries /api/embed, falls back to /api/embeddings.
    pub async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        match self.embed_current(text).await {
            Ok(vec) => Ok(vec),
            Err(first) => match self.embed_legacy(text).await {
                Ok(vec) => Ok(vec),
                Err(second) => Err(CoreError::Other(format!(
                    "embedding failed — current: {} | legacy: {}",
                    first, second
                ))),
            },
        }
    }

    /// Current API: POST /api/embed { model, input } → { embeddings: [[f32…]] }
    async fn embed_current(&self, text: &str) -> CoreResult<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({"model": self.model, "input": text}))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::Other(format!("embed {} — {}", status, body)));
        }
        let v: Value = resp.json().await?;
        let vec = v["embeddings"]
            .as_array()
            .and_then(|e| e.first())
            .and_then(|e| e.as_array())
            .or_else(|| v["embedding"].as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect::<Vec<f32>>())
            .unwrap_or_default();
        if vec.is_empty() {
            return Err(CoreError::Other("empty embedding vector".into()));
        }
        Ok(vec)
    }

    /// Legacy API: POST /api/embeddings { model, prompt } → { embedding: [f32…] }
    async fn embed_legacy(&self, text: &str) -> CoreResult<Vec<f32>> {
        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({"model": self.model, "prompt": text}))
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::Other(format!("embeddings {} — {}", status, body)));
        }
        let v: Value = resp.json().await?;
        let vec: Vec<f32> = v["embedding"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
            .unwrap_or_default();
        if vec.is_empty() {
            return Err(CoreError::Other("empty embedding vector".into()));
        }
        Ok(vec)
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Claim one batch and embed each document: title + bluf + the head of the
/// content, truncated so one giant document doesn't stall the sweep.
pub async fn drain(
    store: &Store,
    client: &EmbeddingClient,
    batch_size: usize,
    worker_name: &str,
) -> CoreResult<DrainReport> {
    let claimed = store.claim_embed_batch(batch_size, worker_name, 10)?;
    let mut report = DrainReport { claimed: claimed.len(), ..Default::default() };
    if claimed.is_empty() {
        return Ok(report);
    }

    let mut done = Vec::new();
    let mut failed = Vec::new();
    for doc_id in claimed {
        let doc = match store.get_document(doc_id)? {
            Some(d) => d,
            None => {
                // Queue row for a deleted document — drop it.
                failed.push(doc_id);
                continue;
            }
        };
        let head: String = doc.content.chars().take(4000).collect();
        let text = format!("{}\n{}\n{}", doc.title, doc.bluf, head);
        match client.embed(&text).await {
            Ok(vec) => {
                if vec.len() != EMBED_DIM {
                    warn!(
                        "[embedder] doc {} vector is {} dims (expected {})",
                        doc_id,
                        vec.len(),
                        EMBED_DIM
                    );
                }
                store.store_embedding(doc_id, &vec, client.model())?;
                done.push(doc_id);
            }
            Err(e) => {
                warn!("[embedder] doc {} failed: {}", doc_id, e);
                failed.push(doc_id);
            }
        }
    }

    report.embedded = store.mark_embed_done(&done)?;
    report.failed = store.mark_embed_failed(&failed)?;
    info!(
        "[embedder] drained {} docs ({} embedded, {} failed)",
        report.claimed, report.embedded, report.failed
    );
    Ok(report)
}
