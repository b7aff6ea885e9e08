// Swarm coordinator — read stigmergy, score pheromone, emit recommendations.
//
// The coordinator is compute-free: it never calls a model, it only reads
// signal_metadata that daemons already paid for. Per cycle it:
//   1. audits signal adoption (grade A–F)
//   2. aggregates ACO pheromone per (port, model, tier)
//   3. picks a recommendation per port (exploit best / explore second-best)
//   4. measures swarm depth (8^N fractal coverage)
//   5. detects duplicated daemon processes
//   6. emits everything back into stigmergy for daemons to read next cycle
//
// The cycle is strictly through the store: daemons read recommendations at
// cycle start and never share memory with the coordinator.

pub mod intent;
pub mod pheromone;

use crate::atoms::constants::{EXPLORATION_RATE, PORTS};
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::paths::Paths;
use crate::store::Store;
use chrono::{Duration, Utc};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

pub use pheromone::{compute_pheromone, PheromoneEntry};

/// MAP-Elite registry defaults — the fallback model per port when the
/// window holds no pheromone at all (cold start, fresh store).
const PORT_DEFAULTS: [(&str, &str, &str); 8] = [
    ("P0", "gemma3:4b", "apex_speed"),
    ("P1", "gemini-3-flash-preview", "apex_speed"),
    ("P2", "gemma3:4b", "apex_speed"),
    ("P3", "lfm2.5-thinking:1.2b", "apex_speed"),
    ("P4", "phi4:14b", "apex_intelligence"),
    ("P5", "qwen3:8b", "apex_speed"),
    ("P6", "deepseek-r1:8b", "apex_intelligence"),
    ("P7", "gemini-3.1-pro-preview", "apex_intelligence"),
];

// ── Signal audit ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalAudit {
    pub grade: String,
    pub total_events: usize,
    pub has_signal: usize,
    pub has_legacy: usize,
    pub blind: usize,
    pub signal_pct: f64,
    pub legacy_pct: f64,
    pub by_port: BTreeMap<String, usize>,
    pub models_seen: BTreeMap<String, usize>,
    pub hours_back: f64,
}

/// Classify every event in the window: signal / legacy / blind, then grade.
pub fn compute_signal_audit(store: &Store, paths: &Paths, hours_back: f64) -> crate::atoms::error::CoreResult<SignalAudit> {
    let cutoff = (Utc::now() - Duration::seconds((hours_back * 3600.0) as i64)).to_rfc3339();
    let events = store.events_since(&cutoff, &format!("{}.", paths.namespace()))?;

    let mut has_signal = 0usize;
    let mut has_legacy = 0usize;
    let mut blind = 0usize;
    let mut by_port: BTreeMap<String, usize> = BTreeMap::new();
    let mut models_seen: BTreeMap<String, usize> = BTreeMap::new();

    for event in &events {
        let data = match event.data() {
            Some(d) => d,
            None => {
                blind += 1;
                continue;
            }
        };
        let sig = data.get("signal_metadata");
        let model_id = sig
            .and_then(|s| s.get("model_id"))
            .and_then(|m| m.as_str())
            .unwrap_or("");
        if !model_id.is_empty() {
            has_signal += 1;
            let port = sig
                .and_then(|s| s.get("port"))
                .and_then(|p| p.as_str())
                .unwrap_or("?");
            *by_port.entry(port.to_string()).or_default() += 1;
            *models_seen.entry(model_id.to_string()).or_default() += 1;
        } else if data.get("ai_model").is_some()
            || data.get("model").is_some()
            || data
                .get("identity")
                .map(|i| i.get("model").is_some())
                .unwrap_or(false)
        {
            has_legacy += 1;
        } else {
            blind += 1;
        }
    }

    let total = events.len();
    let signal_pct = if total > 0 { has_signal as f64 / total as f64 * 100.0 } else { 0.0 };
    let legacy_pct = if total > 0 { has_legacy as f64 / total as f64 * 100.0 } else { 0.0 };

    let grade = if signal_pct >= 80.0 {
        "A"
    } else if signal_pct + legacy_pct >= 70.0 {
        "B"
    } else if signal_pct + legacy_pct >= 50.0 {
        "C"
    } else if legacy_pct >= 30.0 {
        "D"
    } else {
        "F"
    };

    Ok(SignalAudit {
        grade: grade.to_string(),
        total_events: total,
        has_signal,
        has_legacy,
        blind,
        signal_pct: (signal_pct * 10.0).round() / 10.0,
        legacy_pct: (legacy_pct * 10.0).round() / 10.0,
        by_port,
        models_seen,
        hours_back,
    })
}

// ── Recommendations ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub model: String,
    pub pheromone: f64,
    pub inferences: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommended_model: String,
    pub recommended_tier: String,
    pub pheromone_strength: f64,
    pub reason: String,
    pub exploration: bool,
    pub signal_count: u64,
    pub alternatives: Vec<Alternative>,
}

/// Per-port model recommendation. Exploit the strongest pheromone with
/// probability 1 − EXPLORATION_RATE, otherwise take the second-best.
pub fn compute_recommendations(pheromone: &[PheromoneEntry]) -> BTreeMap<String, Recommendation> {
    let mut rng = rand::rng();
    let mut recs = BTreeMap::new();

    for port in PORTS {
        let mut entries: Vec<&PheromoneEntry> =
            pheromone.iter().filter(|e| e.port == port).collect();

        if entries.is_empty() {
            let (_, model, tier) = PORT_DEFAULTS
                .iter()
                .find(|(p, _, _)| *p == port)
                .copied()
                .unwrap_or((port, "unknown", "apex_speed"));
            recs.insert(
                port.to_string(),
                Recommendation {
                    recommended_model: model.to_string(),
                    recommended_tier: tier.to_string(),
                    pheromone_strength: 0.0,
                    reason: "No pheromone — MAP-Elite registry default".into(),
                    exploration: false,
                    signal_count: 0,
                    alternatives: vec![],
                },
            );
            continue;
        }

        entries.sort_by(|a, b| b.pheromone.partial_cmp(&a.pheromone).unwrap_or(std::cmp::Ordering::Equal));
        let best = entries[0];
        let signal_count: u64 = entries.iter().map(|e| e.total_inferences).sum();
        let alternatives: Vec<Alternative> = entries
            .iter()
            .take(3)
            .map(|e| Alternative {
                model: e.model_id.clone(),
                pheromone: e.pheromone,
                inferences: e.total_inferences,
            })
            .collect();

        let exploring = entries.len() > 1 && rng.random::<f64>() < EXPLORATION_RATE;
        let rec = if exploring {
            let alt = entries[1];
            Recommendation {
                recommended_model: alt.model_id.clone(),
                recommended_tier: alt.model_tier.clone(),
                pheromone_strength: alt.pheromone,
                reason: format!(
                    "EXPLORE: {} ({:.2}) vs best {} ({:.2})",
                    alt.model_id, alt.pheromone, best.model_id, best.pheromone
                ),
                exploration: true,
                signal_count,
                alternatives,
            }
        } else {
            Recommendation {
                recommended_model: best.model_id.clone(),
                recommended_tier: best.model_tier.clone(),
                pheromone_strength: best.pheromone,
                reason: format!(
                    "FOLLOW: {} ({} inferences, quality={:.3}, lat={:.0}ms)",
                    best.model_id, best.total_inferences, best.avg_quality, best.avg_latency_ms
                ),
                exploration: false,
                signal_count,
                alternatives,
            }
        };
        recs.insert(port.to_string(), rec);
    }

    recs
}

// ── Swarm depth (8^N) ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmDepth {
    pub fractal_n: f64,
    pub total_combos: usize,
    pub ports_covered: usize,
    pub port_coverage: f64,
    pub filled_niches: usize,
    pub max_niches: usize,
    pub quality_diversity_score: f64,
}

/// How deep is the swarm? 8^0 = a coordinator exists; 8^1 = every port has
/// signal; beyond that, unique (port, model, tier) combos fill the grid.
pub fn compute_depth(pheromone: &[PheromoneEntry]) -> SwarmDepth {
    use std::collections::{BTreeSet, HashMap};

    let mut ports: BTreeSet<&str> = BTreeSet::new();
    let mut combos: BTreeSet<(&str, &str, &str)> = BTreeSet::new();
    let mut tiers_per_port: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for e in pheromone {
        ports.insert(e.port.as_str());
        combos.insert((e.port.as_str(), e.model_id.as_str(), e.model_tier.as_str()));
        tiers_per_port
            .entry(e.port.as_str())
            .or_default()
            .insert(e.model_tier.as_str());
    }

    let total_combos = combos.len();
    let fractal_n = if total_combos > 0 {
        (total_combos as f64).ln() / 8f64.ln()
    } else {
        0.0
    };
    let max_niches = 8 * 3; // 8 ports × 3 tiers
    let filled_niches: usize = tiers_per_port.values().map(|t| t.len()).sum();

    SwarmDepth {
        fractal_n: (fractal_n * 100.0).round() / 100.0,
        total_combos,
        ports_covered: ports.len(),
        port_coverage: ports.len() as f64 / 8.0,
        filled_niches,
        max_niches,
        quality_diversity_score: ((filled_niches as f64 / max_niches as f64) * 100.0).round() / 100.0,
    }
}

// ── Duplicate daemon detection ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub total_daemon_processes: usize,
    pub duplicate_count: usize,
    pub waste_processes: usize,
    pub by_daemon: BTreeMap<String, usize>,
}

/// Scan running processes for duplicate daemon instances. Unix-only (/proc
/// cmdline scan); other platforms report an empty result.
pub fn detect_duplicates() -> DuplicateReport {
    let mut report = DuplicateReport::default();
    #[cfg(unix)]
    {
        let keywords = [
            ("hfo-fleetd", "FleetScheduler"),
            ("coordinator daemon", "Coordinator"),
            ("singer", "P4_Singer"),
            ("dancer", "P5_Dancer"),
            ("kraken", "P6_Kraken"),
            ("devourer", "P6_Devourer"),
            ("foresight", "P7_Foresight"),
        ];
        let entries = match std::fs::read_dir("/proc") {
            Ok(e) => e,
            Err(_) => return report,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let pid_str = name.to_string_lossy();
            if !pid_str.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let cmdline = std::fs::read(entry.path().join("cmdline")).unwrap_or_default();
            let cmdline = String::from_utf8_lossy(&cmdline).replace('\0', " ").to_lowercase();
            for (keyword, label) in keywords {
                if cmdline.contains(keyword) {
                    *report.by_daemon.entry(label.to_string()).or_default() += 1;
                }
            }
        }
        report.total_daemon_processes = report.by_daemon.values().sum();
        report.duplicate_count = report.by_daemon.values().filter(|&&n| n > 1).count();
        report.waste_processes = report
            .by_daemon
            .values()
            .filter(|&&n| n > 1)
            .map(|n| n - 1)
            .sum();
    }
    report
}

// ── Emit + cycle ───────────────────────────────────────────────────────────

fn coordinator_signal(paths: &Paths) -> crate::atoms::types::SignalMetadata {
    // The coordinator is compute-free; "none" keeps the gate satisfied while
    // saying so honestly.
    build_signal_metadata(
        "P7",
        "none",
        "Coordinator",
        "v1.0",
        &paths.generation,
        Observations { model_provider: Some("none".into()), ..Default::default() },
    )
}

/// Write one recommendation event per port. Daemons read these back with
/// `Store::latest_recommendation` at cycle start.
pub fn emit_recommendations(
    store: &Store,
    paths: &Paths,
    recs: &BTreeMap<String, Recommendation>,
) -> crate::atoms::error::CoreResult<usize> {
    let sig = coordinator_signal(paths);
    let mut count = 0;
    for (port, rec) in recs {
        write_event(
            store,
            paths,
            &paths.event_type("coordinator.recommendation"),
            &format!("recommendation:{}:{}", port, rec.recommended_model),
            json!({
                "port": port,
                "recommendation": rec,
            }),
            Some(&sig),
            None,
        )?;
        count += 1;
    }
    Ok(count)
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub audit: SignalAudit,
    pub pheromone_entries: usize,
    pub recommendations: BTreeMap<String, Recommendation>,
    pub depth: SwarmDepth,
    pub duplicates: DuplicateReport,
    pub cycle_time_s: f64,
}

/// One full coordination cycle: audit → pheromone → recommendations →
/// depth → duplicates → emit → cycle health event.
pub fn run_cycle(store: &Store, paths: &Paths, hours_back: f64) -> crate::atoms::error::CoreResult<CycleReport> {
    let t0 = std::time::Instant::now();

    let audit = compute_signal_audit(store, paths, hours_back)?;
    info!(
        "[coordinator] signal grade {} ({}% signal, {}% legacy) over {} events",
        audit.grade, audit.signal_pct, audit.legacy_pct, audit.total_events
    );

    let pheromone = compute_pheromone(store, paths, hours_back)?;
    let recs = compute_recommendations(&pheromone);
    let depth = compute_depth(&pheromone);
    let duplicates = detect_duplicates();

    let emitted = emit_recommendations(store, paths, &recs)?;
    info!("[coordinator] emitted {} recommendations", emitted);

    let cycle_time_s = t0.elapsed().as_secs_f64();
    let sig = coordinator_signal(paths);
    write_event(
        store,
        paths,
        &paths.event_type("coordinator.cycle"),
        &format!("coordinator:cycle:grade_{}", audit.grade),
        json!({
            "cycle_time_s": (cycle_time_s * 100.0).round() / 100.0,
            "signal_grade": audit.grade,
            "signal_pct": audit.signal_pct,
            "pheromone_entries": pheromone.len(),
            "fractal_n": depth.fractal_n,
            "total_combos": depth.total_combos,
            "ports_covered": depth.ports_covered,
            "quality_diversity": depth.quality_diversity_score,
            "duplicate_count": duplicates.duplicate_count,
            "waste_processes": duplicates.waste_processes,
            "total_events": audit.total_events,
            "recommendations": recs.iter()
                .map(|(p, r)| (p.clone(), r.recommended_model.clone()))
                .collect::<BTreeMap<_, _>>(),
        }),
        Some(&sig),
        None,
    )?;

    Ok(CycleReport {
        audit,
        pheromone_entries: pheromone.len(),
        recommendations: recs,
        depth,
        duplicates,
        cycle_time_s,
    })
}
