// Defense supervisor — anomaly detection over the event stream.
//
// Seven anomaly classes (D1–D7), each producing a severity and a score
// deduction. Defense score = 100 − Σ deductions, graded A–F, with a trend
// over the last three runs. Reads from a persisted watermark so each run
// scans only new events.
//
// This supervisor NEVER restarts daemons. It emits events and
// recommendations; the lifecycle supervisor is the only restarter.

use crate::atoms::error::CoreResult;
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::paths::Paths;
use crate::statefile;
use crate::store::Store;
use crate::watchdog::{pid_running, FleetState};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

// Thresholds (WARN at >, CRITICAL at the larger bound) and deductions.
const GATE_BLOCK_WARN: i64 = 10;
const GATE_BLOCK_CRIT: i64 = 20;
const TAMPER_WARN: i64 = 3;
const TAMPER_CRIT: i64 = 6;
const ORPHAN_WARN: i64 = 5;
const ORPHAN_CRIT: i64 = 10;
const SNR_WARN_PCT: f64 = 1.0;
const SNR_CRIT_PCT: f64 = 0.5;
const SNR_MIN_TOTAL: i64 = 50;
const FLAPPING_RESTARTS: u32 = 5;
const FLAPPING_WARN: usize = 1;
const FLAPPING_CRIT: usize = 3;
const QUALITY_WARN: i64 = 10;
const QUALITY_CRIT: i64 = 30;
const STALE_MINUTES: i64 = 30;
const STALE_WARN: usize = 2;
const STALE_CRIT: usize = 4;

const WEIGHT_GATE_BLOCKS: f64 = 15.0;
const WEIGHT_TAMPER: f64 = 20.0;
const WEIGHT_ORPHANS: f64 = 10.0;
const WEIGHT_SNR: f64 = 15.0;
const WEIGHT_FLAPPING: f64 = 15.0;
const WEIGHT_EVENT_QUALITY: f64 = 10.0;
const WEIGHT_STALE: f64 = 15.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub code: String,
    pub severity: String,
    pub description: String,
    pub count: i64,
    pub score_deduction: f64,
}

fn grade_severity(count: i64, warn: i64, crit: i64, weight: f64) -> (String, f64) {
    if count > crit {
        ("CRITICAL".into(), weight)
    } else if count > warn {
        ("WARN".into(), weight * 0.5)
    } else {
        ("INFO".into(), 0.0)
    }
}

/// Watermark + score history, persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefenseState {
    #[serde(default)]
    pub last_event_id: i64,
    #[serde(default)]
    pub last_score: f64,
    #[serde(default)]
    pub score_history: Vec<f64>,
    #[serde(default)]
    pub last_run: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefenseReport {
    pub score: f64,
    pub grade: String,
    pub trend: String,
    pub events_scanned: usize,
    pub anomalies: Vec<AnomalyReport>,
}

pub fn grade_defense(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 70.0 {
        "C"
    } else if score >= 60.0 {
        "D"
    } else {
        "F"
    }
}

/// D1 — excessive gate_block events.
fn detect_gate_blocks(events: &[crate::atoms::types::StoredEvent]) -> AnomalyReport {
    let count = events.iter().filter(|e| e.event_type.contains("gate_block")).count() as i64;
    let (severity, deduction) =
        grade_severity(count, GATE_BLOCK_WARN, GATE_BLOCK_CRIT, WEIGHT_GATE_BLOCKS);
    AnomalyReport {
        code: "D1".into(),
        severity,
        description: format!("Gate blocks in window: {}", count),
        count,
        score_deduction: deduction,
    }
}

/// D2 — tamper alerts (chain integrity violations).
fn detect_tamper_alerts(events: &[crate::atoms::types::StoredEvent]) -> AnomalyReport {
    let count = events.iter().filter(|e| e.event_type.contains("tamper_alert")).count() as i64;
    let (severity, deduction) = grade_severity(count, TAMPER_WARN, TAMPER_CRIT, WEIGHT_TAMPER);
    AnomalyReport {
        code: "D2".into(),
        severity,
        description: format!("Tamper alerts: {}", count),
        count,
        score_deduction: deduction,
    }
}

/// D3 — orphan sessions: session opens without a matching close.
fn detect_orphans(events: &[crate::atoms::types::StoredEvent]) -> AnomalyReport {
    let opens = events
        .iter()
        .filter(|e| e.event_type.ends_with(".prey8.perceive") || e.event_type.ends_with(".hive8.hunt"))
        .count() as i64;
    let closes = events
        .iter()
        .filter(|e| e.event_type.ends_with(".prey8.yield") || e.event_type.ends_with(".hive8.emit"))
        .count() as i64;
    let count = (opens - closes).max(0);
    let (severity, deduction) = grade_severity(count, ORPHAN_WARN, ORPHAN_CRIT, WEIGHT_ORPHANS);
    AnomalyReport {
        code: "D3".into(),
        severity,
        description: format!("Orphan sessions: {} ({} opened, {} closed)", count, opens, closes),
        count,
        score_deduction: deduction,
    }
}

/// D4 — signal-to-noise: share of events carrying signal_metadata.
fn detect_snr(events: &[crate::atoms::types::StoredEvent]) -> AnomalyReport {
    let total = events.len() as i64;
    let signal = events
        .iter()
        .filter(|e| e.data_json.contains("\"signal_metadata\""))
        .count() as i64;
    let pct = if total > 0 { signal as f64 / total as f64 * 100.0 } else { 100.0 };

    let (severity, deduction) = if total > SNR_MIN_TOTAL && pct < SNR_CRIT_PCT {
        ("CRITICAL".to_string(), WEIGHT_SNR)
    } else if total > SNR_MIN_TOTAL && pct < SNR_WARN_PCT {
        ("WARN".to_string(), WEIGHT_SNR * 0.5)
    } else {
        ("INFO".to_string(), 0.0)
    };
    AnomalyReport {
        code: "D4".into(),
        severity,
        description: format!("Signal events: {:.1}% of {} total", pct, total),
        count: signal,
        score_deduction: deduction,
    }
}

/// D5 — daemon flapping: restart counts from the lifecycle state file.
fn detect_flapping(fleet_state: &FleetState) -> AnomalyReport {
    let flapping: Vec<&String> = fleet_state
        .daemons
        .iter()
        .filter(|(_, d)| d.restarts >= FLAPPING_RESTARTS)
        .map(|(name, _)| name)
        .collect();
    let count = flapping.len();
    let (severity, deduction) = if count >= FLAPPING_CRIT {
        ("CRITICAL".to_string(), WEIGHT_FLAPPING)
    } else if count >= FLAPPING_WARN {
        ("WARN".to_string(), WEIGHT_FLAPPING * 0.5)
    } else {
        ("INFO".to_string(), 0.0)
    };
    AnomalyReport {
        code: "D5".into(),
        severity,
        description: format!("Flapping daemons (≥{} restarts): {}", FLAPPING_RESTARTS, count),
        count: count as i64,
        score_deduction: deduction,
    }
}

/// D6 — event quality: missing signal_metadata on non-exempt types, or
/// empty data payloads.
fn detect_event_quality(
    events: &[crate::atoms::types::StoredEvent],
    paths: &Paths,
) -> AnomalyReport {
    let ns = paths.namespace();
    let exempt = |t: &str| {
        t.contains("gate_block")
            || t.contains(".prey8.")
            || t.contains(".hive8.")
            || t.starts_with("system_health")
            || t.contains(".chimera.")
            || !t.starts_with(&ns)
    };
    let missing = events
        .iter()
        .filter(|e| !exempt(&e.event_type) && !e.data_json.contains("\"signal_metadata\""))
        .count() as i64;
    let empty = events
        .iter()
        .filter(|e| e.data_json.is_empty() || e.data_json == "{}")
        .count() as i64;
    let count = missing + empty;
    let (severity, deduction) =
        grade_severity(count, QUALITY_WARN, QUALITY_CRIT, WEIGHT_EVENT_QUALITY);
    AnomalyReport {
        code: "D6".into(),
        severity,
        description: format!(
            "Event quality issues: {} ({} missing signal_metadata, {} empty data)",
            count, missing, empty
        ),
        count,
        score_deduction: deduction,
    }
}

/// D7 — stale daemons: PID alive but silent in stigmergy for 30 minutes.
fn detect_stale(store: &Store, fleet_state: &FleetState) -> AnomalyReport {
    let mut stale = 0usize;
    for (name, d) in &fleet_state.daemons {
        if !pid_running(d.pid) {
            continue;
        }
        let pattern = format!("%{}%", name.to_lowercase().replace(' ', "_"));
        let recent = store
            .count_recent_by_source(&pattern, STALE_MINUTES)
            .unwrap_or(0);
        if recent == 0 {
            stale += 1;
        }
    }
    let (severity, deduction) = if stale >= STALE_CRIT {
        ("CRITICAL".to_string(), WEIGHT_STALE)
    } else if stale >= STALE_WARN {
        ("WARN".to_string(), WEIGHT_STALE * 0.5)
    } else {
        ("INFO".to_string(), 0.0)
    };
    AnomalyReport {
        code: "D7".into(),
        severity,
        description: format!("Stale daemons: {} alive but silent for >{} min", stale, STALE_MINUTES),
        count: stale as i64,
        score_deduction: deduction,
    }
}

/// One defense scan: read events past the watermark, run D1–D7, persist the
/// new watermark + score history, emit a summary event and one event per
/// non-INFO anomaly.
pub fn defense_scan(store: &Store, paths: &Paths) -> CoreResult<DefenseReport> {
    let mut state: DefenseState = statefile::load_or_default(&paths.defense_watermark());
    let events = store.events_after_id(state.last_event_id)?;
    let fleet_state: FleetState = statefile::load_or_default(&paths.fleet_state());

    let anomalies = vec![
        detect_gate_blocks(&events),
        detect_tamper_alerts(&events),
        detect_orphans(&events),
        detect_snr(&events),
        detect_flapping(&fleet_state),
        detect_event_quality(&events, paths),
        detect_stale(store, &fleet_state),
    ];

    let score = (100.0 - anomalies.iter().map(|a| a.score_deduction).sum::<f64>()).clamp(0.0, 100.0);
    let grade = grade_defense(score).to_string();

    state.score_history.push(score);
    if state.score_history.len() > 50 {
        let excess = state.score_history.len() - 50;
        state.score_history.drain(0..excess);
    }
    let trend = if state.score_history.len() >= 3 {
        let recent = &state.score_history[state.score_history.len() - 3..];
        if recent[0] < recent[1] && recent[1] < recent[2] {
            "improving"
        } else if recent[0] > recent[1] && recent[1] > recent[2] {
            "degrading"
        } else {
            "stable"
        }
    } else {
        "stable"
    };

    let sig = build_signal_metadata(
        "P5",
        "none",
        "DefenseSupervisor",
        "v1.0",
        &paths.generation,
        Observations { model_provider: Some("none".into()), ..Default::default() },
    );

    // Per-anomaly events first, then the summary.
    for anomaly in anomalies.iter().filter(|a| a.severity != "INFO") {
        write_event(
            store,
            paths,
            &paths.event_type("defense.anomaly"),
            &format!("anomaly:{}:{}", anomaly.code, anomaly.severity),
            serde_json::to_value(anomaly)?,
            Some(&sig),
            None,
        )?;
    }
    write_event(
        store,
        paths,
        &paths.event_type("defense.scan"),
        &format!("defense:score_{:.0}:grade_{}", score, grade),
        json!({
            "score": score,
            "grade": grade,
            "trend": trend,
            "events_scanned": events.len(),
            "anomalies": anomalies,
            "run_at": Utc::now().to_rfc3339(),
        }),
        Some(&sig),
        None,
    )?;

    // Watermark moves to the end of everything written this run, so the next
    // scan does not re-count our own events.
    state.last_event_id = store.latest_event_id()?;
    state.last_score = score;
    state.last_run = Utc::now().to_rfc3339();
    statefile::save_best_effort(&paths.defense_watermark(), &state);

    info!(
        "[defense] score {:.0} grade {} trend {} over {} events",
        score,
        grade,
        trend,
        events.len()
    );

    Ok(DefenseReport {
        score,
        grade,
        trend: trend.to_string(),
        events_scanned: events.len(),
        anomalies,
    })
}

/// Age of the watermark, for operators wondering whether scans are running.
pub fn watermark_age_hours(paths: &Paths) -> Option<f64> {
    let state: DefenseState = statefile::load(&paths.defense_watermark())?;
    let last = chrono::DateTime::parse_from_rfc3339(&state.last_run).ok()?;
    Some((Utc::now() - last.with_timezone(&Utc)).num_seconds() as f64 / 3600.0)
}
