// ACO pheromone scoring over the stigmergy window.
//
//   pheromone = quality² / (latency_norm × √cost_norm) × evaporation × volume
//   evaporation = (1 − 0.10)^age_hours, floored at MIN_PHEROMONE
//   volume = min(2, 1 + log10(count))
//
// Every constant lives in atoms::constants — the scheduler, coordinator,
// and CLI all read the same knobs.

use crate::atoms::constants::{
    COST_WEIGHT, EVAPORATION_RATE, MIN_PHEROMONE, QUALITY_WEIGHT, SPEED_WEIGHT,
};
use crate::atoms::error::CoreResult;
use crate::paths::Paths;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PheromoneEntry {
    pub port: String,
    pub model_id: String,
    pub model_tier: String,
    pub total_inferences: u64,
    pub avg_latency_ms: f64,
    pub avg_quality: f64,
    pub total_cost_usd: f64,
    pub pheromone: f64,
    pub age_hours: f64,
    pub evaporation: f64,
}

#[derive(Default)]
struct Bucket {
    latencies: Vec<f64>,
    qualities: Vec<f64>,
    cost: f64,
    count: u64,
    last_ts: String,
}

/// Read the window, aggregate per (port, model, tier), score, sort descending.
pub fn compute_pheromone(store: &Store, paths: &Paths, hours_back: f64) -> CoreResult<Vec<PheromoneEntry>> {
    let cutoff = (Utc::now() - Duration::seconds((hours_back * 3600.0) as i64)).to_rfc3339();
    let events = store.events_since(&cutoff, &format!("{}.", paths.namespace()))?;

    let mut buckets: HashMap<(String, String, String), Bucket> = HashMap::new();

    for event in &events {
        let data = match event.data() {
            Some(d) => d,
            None => continue,
        };
        // Prefer signal_metadata; fold legacy model tags in at neutral quality
        // so pre-contract daemons still leave a trail.
        let (port, model_id, tier, latency, quality, cost, ts) = match data.get("signal_metadata") {
            Some(sig) if sig.is_object() => {
                let port = sig.get("port").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let model = sig.get("model_id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let tier = sig
                    .get("model_tier")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let latency = sig.get("inference_latency_ms").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let quality = sig.get("quality_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let cost = sig.get("cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let ts = sig
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&event.timestamp)
                    .to_string();
                (port, model, tier, latency, quality, cost, ts)
            }
            _ => {
                let model = data
                    .get("ai_model")
                    .or_else(|| data.get("model"))
                    .or_else(|| data.get("identity").and_then(|i| i.get("model")))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let port = data
                    .get("daemon_port")
                    .or_else(|| data.get("port"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                (port, model, "unknown".to_string(), 0.0, 0.5, 0.0, event.timestamp.clone())
            }
        };

        if port.is_empty() || model_id.is_empty() {
            continue;
        }

        let bucket = buckets.entry((port, model_id, tier)).or_default();
        bucket.count += 1;
        if latency > 0.0 {
            bucket.latencies.push(latency);
        }
        if quality > 0.0 {
            bucket.qualities.push(quality);
        }
        if cost > 0.0 {
            bucket.cost += cost;
        }
        if ts > bucket.last_ts {
            bucket.last_ts = ts;
        }
    }

    let now = Utc::now();
    let mut entries: Vec<PheromoneEntry> = buckets
        .into_iter()
        .map(|((port, model_id, tier), b)| {
            let avg_latency = if b.latencies.is_empty() {
                0.0
            } else {
                b.latencies.iter().sum::<f64>() / b.latencies.len() as f64
            };
            let avg_quality = if b.qualities.is_empty() {
                0.5
            } else {
                b.qualities.iter().sum::<f64>() / b.qualities.len() as f64
            };

            let age_hours = DateTime::parse_from_rfc3339(&b.last_ts)
                .map(|t| (now - t.with_timezone(&Utc)).num_seconds() as f64 / 3600.0)
                .unwrap_or(0.0)
                .max(0.0);

            let evaporation = ((1.0 - EVAPORATION_RATE).powf(age_hours)).max(MIN_PHEROMONE);
            let latency_norm = if avg_latency > 0.0 { (avg_latency / 1000.0).max(0.01) } else { 1.0 };
            let cost_norm = if b.cost > 0.0 {
                (b.cost / (b.count.max(1) as f64)).max(0.001)
            } else {
                0.001
            };
            let volume = (1.0 + (b.count.max(1) as f64).log10()).min(2.0);

            let pheromone = avg_quality.powf(QUALITY_WEIGHT)
                / (latency_norm.powf(SPEED_WEIGHT) * cost_norm.powf(COST_WEIGHT))
                * evaporation
                * volume;

            PheromoneEntry {
                port,
                model_id,
                model_tier: tier,
                total_inferences: b.count,
                avg_latency_ms: (avg_latency * 10.0).round() / 10.0,
                avg_quality: (avg_quality * 1000.0).round() / 1000.0,
                total_cost_usd: b.cost,
                pheromone: (pheromone * 10000.0).round() / 10000.0,
                age_hours: (age_hours * 100.0).round() / 100.0,
                evaporation: (evaporation * 10000.0).round() / 10000.0,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.pheromone.partial_cmp(&a.pheromone).unwrap_or(std::cmp::Ordering::Equal));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::signal::{build_signal_metadata, Observations};
    use crate::events::writer::write_event;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn single_fresh_event_has_unit_volume() {
        let store = Store::open_in_memory("90").unwrap();
        let paths = Paths::at_root(PathBuf::from("/tmp"), "90");
        let sig = build_signal_metadata(
            "P4",
            "gemma3:4b",
            "T",
            "v1",
            "90",
            Observations { quality_score: 0.8, inference_latency_ms: 500.0, ..Default::default() },
        );
        write_event(&store, &paths, "hfo.gen90.t.one", "s", json!({}), Some(&sig), None).unwrap();

        let entries = compute_pheromone(&store, &paths, 24.0).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.total_inferences, 1);
        assert!(e.evaporation > 0.99, "fresh event should barely evaporate");
        // volume = 1.0, evaporation ≈ 1.0 → pheromone ≈ q²/(lat_norm × √cost_norm)
        let expected = 0.8f64.powi(2) / (0.5 * 0.001f64.sqrt());
        assert!((e.pheromone - expected).abs() / expected < 0.02, "pheromone {} vs {}", e.pheromone, expected);
    }

    #[test]
    fn old_events_evaporate() {
        let store = Store::open_in_memory("90").unwrap();
        let paths = Paths::at_root(PathBuf::from("/tmp"), "90");
        // Write directly with a stale timestamp (exempt prior-generation type
        // is not needed — include signal_metadata so the trigger passes).
        let stale_ts = (Utc::now() - Duration::hours(12)).to_rfc3339();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                 VALUES ('hfo.gen90.t.old', ?1, 's', 'src', ?2, 'oldhash')",
                rusqlite::params![
                    stale_ts,
                    json!({"data": {"signal_metadata": {
                        "port": "P4", "model_id": "gemma3:4b", "daemon_name": "T",
                        "model_provider": "ollama", "model_tier": "apex_speed",
                        "quality_score": 0.8, "inference_latency_ms": 500.0,
                        "timestamp": stale_ts,
                    }}}).to_string()
                ],
            )
            .unwrap();
        }
        let entries = compute_pheromone(&store, &paths, 24.0).unwrap();
        assert_eq!(entries.len(), 1);
        let evap = entries[0].evaporation;
        // 12 hours at 10%/hour decay → 0.9^12 ≈ 0.28
        assert!((evap - 0.9f64.powi(12)).abs() < 0.05, "evaporation {}", evap);
    }

    #[test]
    fn legacy_events_fold_in_at_neutral_quality() {
        let store = Store::open_in_memory("90").unwrap();
        let paths = Paths::at_root(PathBuf::from("/tmp"), "90");
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                 VALUES ('hfo.gen89.singer.tick', ?1, 's', 'src', ?2, 'legacyhash')",
                rusqlite::params![
                    Utc::now().to_rfc3339(),
                    json!({"data": {"ai_model": "gemma3:4b", "port": "P4"}}).to_string()
                ],
            )
            .unwrap();
        }
        // Legacy rows ride the prior-generation prefix; widen the window to
        // the prior namespace to see them.
        let cutoff = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let events = store.events_since(&cutoff, "hfo.gen89.").unwrap();
        assert_eq!(events.len(), 1);

        // And under the current namespace nothing is picked up.
        let entries = compute_pheromone(&store, &paths, 24.0).unwrap();
        assert!(entries.is_empty());
    }
}
