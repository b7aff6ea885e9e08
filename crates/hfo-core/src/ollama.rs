// Local model server client (Ollama wire protocol).
//
// The fleet treats local VRAM as a cooperative resource: nothing here
// preempts a loaded model. The only pinning is the explicit warm-up, which
// asks the server to hold a small model for 30 minutes via its own
// keep_alive. Contention costs slower inferences, not correctness.

use crate::atoms::error::{CoreError, CoreResult};
use log::info;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Default local endpoint; override with OLLAMA_HOST.
pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

/// Model pinned by the scheduler's warm-up pass; override with HFO_WARM_MODEL.
pub const DEFAULT_WARM_MODEL: &str = "qwen2.5:3b";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    pub options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// What daemons need back from a generation: the text plus the numbers that
/// become signal_metadata observations.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub response: String,
    pub model: String,
    pub latency_ms: f64,
    pub tokens_out: u64,
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::from_env()
    }
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Self {
        OllamaClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build from OLLAMA_HOST, defaulting to localhost.
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        Self::new(&host)
    }

    /// Is the server up? GET /api/tags with a short timeout.
    pub async fn is_reachable(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Names of models the server knows about.
    pub async fn list_models(&self) -> CoreResult<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CoreError::Other(format!(
                "model server returned {}",
                resp.status()
            )));
        }
        let v: Value = resp.json().await?;
        Ok(extract_model_names(&v))
    }

    /// Models currently loaded in VRAM. GET /api/ps.
    pub async fn loaded_models(&self) -> CoreResult<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/ps", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CoreError::Other(format!(
                "model server returned {}",
                resp.status()
            )));
        }
        let v: Value = resp.json().await?;
        Ok(extract_model_names(&v))
    }

    /// Pin `model` into VRAM for 30 minutes. Empty prompt — the server loads
    /// the model and holds it per its own keep_alive; idempotent.
    pub async fn warm_up(&self, model: &str) -> CoreResult<()> {
        info!("[ollama] warm-up: pinning '{}' for 30m", model);
        let body = json!({
            "model": model,
            "prompt": "",
            "keep_alive": "30m",
        });
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Other(format!("warm-up failed {} — {}", status, text)));
        }
        Ok(())
    }

    /// One non-streaming generation. 180 s default timeout — local models
    /// on cold VRAM can take a while on first token.
    pub async fn generate(&self, req: &GenerateRequest) -> CoreResult<GenerateResult> {
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(req)
            .timeout(Duration::from_secs(180))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Other(format!("generate {} — {}", status, text)));
        }
        let v: Value = resp.json().await?;
        let response = v["response"].as_str().unwrap_or_default().to_string();
        if response.is_empty() && v["done"].as_bool() != Some(true) {
            return Err(CoreError::Other("empty generation from model server".into()));
        }
        // total_duration is nanoseconds on the wire.
        let latency_ms = v["total_duration"].as_u64().unwrap_or(0) as f64 / 1_000_000.0;
        Ok(GenerateResult {
            response,
            model: v["model"].as_str().unwrap_or(&req.model).to_string(),
            latency_ms,
            tokens_out: v["eval_count"].as_u64().unwrap_or(0),
        })
    }
}

/// Both /api/tags and /api/ps return {"models": [{"name": …} | {"model": …}]}.
fn extract_model_names(v: &Value) -> Vec<String> {
    v["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| {
                    m["name"]
                        .as_str()
                        .or_else(|| m["model"].as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_names_handles_both_keys() {
        let v = json!({"models": [{"name": "gemma3:4b"}, {"model": "qwen2.5:3b"}]});
        assert_eq!(extract_model_names(&v), vec!["gemma3:4b", "qwen2.5:3b"]);
        assert!(extract_model_names(&json!({})).is_empty());
    }

    #[test]
    fn generate_request_serializes_wire_shape() {
        let req = GenerateRequest {
            model: "gemma3:4b".into(),
            prompt: "hello".into(),
            system: None,
            stream: false,
            options: GenerateOptions { num_predict: Some(128), temperature: Some(0.2) },
            keep_alive: Some("30m".into()),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "gemma3:4b");
        assert_eq!(v["stream"], false);
        assert_eq!(v["options"]["num_predict"], 128);
        assert!(v.get("system").is_none());
    }
}
