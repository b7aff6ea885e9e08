// signal_metadata builder + the static model registry.
//
// The registry is fixed at compile time and updated only by code change —
// it is the source of truth for model family, size, provider, tier, VRAM
// footprint, and per-1M-token prices. Unknown models still produce a record
// that passes the four-field gate, with "Unknown"/zero observations.

use crate::atoms::types::SignalMetadata;
use chrono::Utc;

/// One registry entry. Prices are USD per 1M tokens; zero for local models.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub model_id: &'static str,
    pub family: &'static str,
    pub params_b: f64,
    pub provider: &'static str,
    pub tier: &'static str,
    pub vram_gb: f64,
    pub price_in_per_1m: f64,
    pub price_out_per_1m: f64,
    pub supports_thinking: bool,
    pub rpm_limit: u32,
    pub rpd_limit: u32,
}

/// The fleet's known models. Local (ollama) entries carry VRAM footprints;
/// hosted entries carry prices and free-tier rate limits.
pub const MODEL_REGISTRY: &[ModelSpec] = &[
    ModelSpec { model_id: "gemma3:4b", family: "Gemma 3", params_b: 4.3, provider: "ollama", tier: "apex_speed", vram_gb: 3.3, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: false, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "qwen2.5:3b", family: "Qwen 2.5", params_b: 3.1, provider: "ollama", tier: "apex_speed", vram_gb: 2.3, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: false, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "qwen2.5:14b", family: "Qwen 2.5", params_b: 14.8, provider: "ollama", tier: "apex_balanced", vram_gb: 9.0, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: false, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "qwen2.5-coder:7b", family: "Qwen 2.5 Coder", params_b: 7.6, provider: "ollama", tier: "apex_balanced", vram_gb: 4.7, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: false, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "qwen3:8b", family: "Qwen 3", params_b: 8.2, provider: "ollama", tier: "apex_speed", vram_gb: 5.2, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: true, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "phi4:14b", family: "Phi 4", params_b: 14.7, provider: "ollama", tier: "apex_intelligence", vram_gb: 9.1, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: false, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "deepseek-r1:8b", family: "DeepSeek R1", params_b: 8.0, provider: "ollama", tier: "apex_intelligence", vram_gb: 5.2, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: true, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "lfm2.5-thinking:1.2b", family: "LFM 2.5", params_b: 1.2, provider: "ollama", tier: "apex_speed", vram_gb: 1.0, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: true, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "nomic-embed-text", family: "Nomic Embed", params_b: 0.14, provider: "ollama", tier: "apex_speed", vram_gb: 0.4, price_in_per_1m: 0.0, price_out_per_1m: 0.0, supports_thinking: false, rpm_limit: 0, rpd_limit: 0 },
    ModelSpec { model_id: "gemini-2.5-flash", family: "Gemini 2.5", params_b: 0.0, provider: "gemini_free", tier: "apex_speed", vram_gb: 0.0, price_in_per_1m: 0.30, price_out_per_1m: 2.50, supports_thinking: true, rpm_limit: 10, rpd_limit: 250 },
    ModelSpec { model_id: "gemini-3-flash-preview", family: "Gemini 3", params_b: 0.0, provider: "gemini_free", tier: "apex_speed", vram_gb: 0.0, price_in_per_1m: 0.50, price_out_per_1m: 3.00, supports_thinking: true, rpm_limit: 10, rpd_limit: 250 },
    ModelSpec { model_id: "gemini-3.1-pro-preview", family: "Gemini 3.1", params_b: 0.0, provider: "google", tier: "apex_intelligence", vram_gb: 0.0, price_in_per_1m: 2.00, price_out_per_1m: 12.00, supports_thinking: true, rpm_limit: 5, rpd_limit: 100 },
    ModelSpec { model_id: "gpt-4o", family: "GPT-4o", params_b: 0.0, provider: "openai", tier: "apex_balanced", vram_gb: 0.0, price_in_per_1m: 2.50, price_out_per_1m: 10.00, supports_thinking: false, rpm_limit: 500, rpd_limit: 0 },
    ModelSpec { model_id: "claude-sonnet-4-6", family: "Claude Sonnet", params_b: 0.0, provider: "anthropic", tier: "apex_intelligence", vram_gb: 0.0, price_in_per_1m: 3.00, price_out_per_1m: 15.00, supports_thinking: true, rpm_limit: 50, rpd_limit: 0 },
];

/// Registry lookup by model id.
pub fn model_spec(model_id: &str) -> Option<&'static ModelSpec> {
    MODEL_REGISTRY.iter().find(|m| m.model_id == model_id)
}

/// Per-call observation fields. Everything defaults to zero/empty — the
/// builder fills registry facts and computes cost when it can.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub model_provider: Option<String>,
    pub inference_latency_ms: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_thinking: u64,
    pub quality_score: f64,
    pub quality_method: String,
    pub cost_usd: Option<f64>,
    pub cycle: u64,
    pub task_type: String,
}

/// Assemble a signal_metadata record from registry facts + observations.
///
/// Unknown model_id degrades gracefully: family "Unknown", provider from the
/// caller or "unknown" — the four required fields stay non-empty so the
/// record still passes the writer's gate.
pub fn build_signal_metadata(
    port: &str,
    model_id: &str,
    daemon_name: &str,
    daemon_version: &str,
    generation: &str,
    obs: Observations,
) -> SignalMetadata {
    let spec = model_spec(model_id);

    let cost_usd = obs.cost_usd.unwrap_or_else(|| {
        spec.map(|s| {
            (obs.tokens_in as f64 / 1_000_000.0) * s.price_in_per_1m
                + ((obs.tokens_out + obs.tokens_thinking) as f64 / 1_000_000.0)
                    * s.price_out_per_1m
        })
        .unwrap_or(0.0)
    });

    let provider = spec
        .map(|s| s.provider.to_string())
        .or(obs.model_provider)
        .unwrap_or_else(|| "unknown".to_string());

    SignalMetadata {
        port: port.to_uppercase(),
        daemon_name: daemon_name.to_string(),
        daemon_version: daemon_version.to_string(),
        model_id: model_id.to_string(),
        model_family: spec.map(|s| s.family.to_string()).unwrap_or_else(|| "Unknown".into()),
        model_params_b: spec.map(|s| s.params_b).unwrap_or(0.0),
        model_provider: provider,
        model_tier: spec.map(|s| s.tier.to_string()).unwrap_or_else(|| "unknown".into()),
        inference_latency_ms: obs.inference_latency_ms,
        tokens_in: obs.tokens_in,
        tokens_out: obs.tokens_out,
        tokens_thinking: obs.tokens_thinking,
        quality_score: obs.quality_score,
        quality_method: if obs.quality_method.is_empty() {
            "none".into()
        } else {
            obs.quality_method
        },
        cost_usd,
        vram_gb: spec.map(|s| s.vram_gb).unwrap_or(0.0),
        cycle: obs.cycle,
        task_type: obs.task_type,
        generation: generation.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_fills_registry_facts() {
        let sig = build_signal_metadata(
            "p4",
            "gemma3:4b",
            "SelfTest",
            "v1.0",
            "90",
            Observations::default(),
        );
        assert_eq!(sig.port, "P4");
        assert_eq!(sig.model_family, "Gemma 3");
        assert_eq!(sig.model_provider, "ollama");
        assert_eq!(sig.model_tier, "apex_speed");
        assert!(sig.vram_gb > 0.0);
    }

    #[test]
    fn unknown_model_still_passes_field_gate() {
        let sig = build_signal_metadata(
            "P2",
            "mystery:1b",
            "SelfTest",
            "v1.0",
            "90",
            Observations::default(),
        );
        assert_eq!(sig.model_family, "Unknown");
        assert_eq!(sig.model_provider, "unknown");
        assert!(!sig.model_id.is_empty());
        assert!(!sig.daemon_name.is_empty());
    }

    #[test]
    fn caller_provider_wins_for_unknown_model() {
        let sig = build_signal_metadata(
            "P2",
            "mystery:1b",
            "SelfTest",
            "v1.0",
            "90",
            Observations { model_provider: Some("lmstudio".into()), ..Default::default() },
        );
        assert_eq!(sig.model_provider, "lmstudio");
    }

    #[test]
    fn cost_computed_from_registry_prices() {
        let sig = build_signal_metadata(
            "P7",
            "gemini-3.1-pro-preview",
            "Summoner",
            "v1.0",
            "90",
            Observations { tokens_in: 1_000_000, tokens_out: 500_000, ..Default::default() },
        );
        assert!((sig.cost_usd - (2.00 + 6.00)).abs() < 1e-9);
    }

    #[test]
    fn observed_cost_is_not_overwritten() {
        let sig = build_signal_metadata(
            "P7",
            "gemini-3.1-pro-preview",
            "Summoner",
            "v1.0",
            "90",
            Observations { cost_usd: Some(0.123), tokens_in: 1_000_000, ..Default::default() },
        );
        assert!((sig.cost_usd - 0.123).abs() < 1e-12);
    }
}
