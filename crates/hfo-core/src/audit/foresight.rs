// Foresight mapper — classify events into leverage levels (1..13) and map
// the flow between them.
//
// Classification mechanism (the table itself is fixed, the mechanism is the
// contract): first regex match wins → fallback to the median of the source
// port's native levels → fallback to level 6 (information flows).

use crate::atoms::error::CoreResult;
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::paths::Paths;
use crate::store::Store;
use chrono::{Duration, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

/// Leverage levels, low (parameters) to high (paradigm shifts). Level 13 is
/// reserved for direct operator action.
const LEVEL_PATTERNS: [(u8, &str); 12] = [
    (1, r"config|param|tune|interval|threshold"),
    (2, r"queue|buffer|backlog|batch"),
    (3, r"schema|migrat|route|structure|table"),
    (4, r"latency|timeout|stale|delay"),
    (5, r"gate_block|denied|blocked|tamper|immuniz"),
    (6, r"heartbeat|status|telemetry|signal|recommendation|digest"),
    (7, r"swarm|wake|cascade|amplif|explore"),
    (8, r"policy|rule|invariant|wish|enforce"),
    (9, r"spawn|restart|watchdog|fleet|self_heal"),
    (10, r"goal|mission|objective|yield"),
    (11, r"paradigm|worldview|reframe"),
    (12, r"transcend|meta_|bootstrap"),
];

/// Native levels per port — where each role's events land when no pattern
/// matches. The median of the list is the fallback level.
fn native_levels(port: &str) -> &'static [u8] {
    match port {
        "P0" => &[1, 2, 4],
        "P1" => &[6],
        "P2" => &[3, 9],
        "P3" => &[6, 7],
        "P4" => &[5, 7],
        "P5" => &[5, 8],
        "P6" => &[2, 6, 9],
        "P7" => &[6, 8, 10],
        _ => &[6],
    }
}

fn median(levels: &[u8]) -> u8 {
    if levels.is_empty() {
        return 6;
    }
    let mut sorted = levels.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

fn compiled_patterns() -> &'static Vec<(u8, Regex)> {
    static PATTERNS: OnceLock<Vec<(u8, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        LEVEL_PATTERNS
            .iter()
            .map(|(level, pat)| (*level, Regex::new(pat).expect("static pattern")))
            .collect()
    })
}

/// Port tag buried in a source string like `hfo_singer_gen90_p4`.
fn port_from_source(source: &str) -> Option<String> {
    let lower = source.to_lowercase();
    for i in 0..8 {
        if lower.contains(&format!("p{}", i)) {
            return Some(format!("P{}", i));
        }
    }
    None
}

/// Classify one event. First regex match on type+subject wins; operator
/// sources map to 13; otherwise the source port's native median; else 6.
pub fn classify_event(event_type: &str, subject: &str, source: &str) -> u8 {
    if source.to_lowercase().contains("operator") {
        return 13;
    }
    let haystack = format!("{} {}", event_type, subject).to_lowercase();
    for (level, re) in compiled_patterns() {
        if re.is_match(&haystack) {
            return *level;
        }
    }
    match port_from_source(source) {
        Some(port) => median(native_levels(&port)),
        None => 6,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForesightReport {
    pub hours: f64,
    pub events_mapped: usize,
    pub level_counts: BTreeMap<u8, usize>,
    /// (from, to) → weight for adjacent events that changed level.
    pub transitions: Vec<(u8, u8, usize)>,
    pub dominant_transition: Option<(u8, u8, usize)>,
    /// Share of events stuck at levels 1–3.
    pub attractor_basin_pct: f64,
    /// Share of events at levels 8–12.
    pub high_leverage_pct: f64,
    pub identity_violations: Vec<String>,
}

/// Map the window: level distribution, transition weights, and identity
/// violations (an execute event whose session never reacted).
pub fn compute_foresight(store: &Store, paths: &Paths, hours: f64) -> CoreResult<ForesightReport> {
    let cutoff = (Utc::now() - Duration::seconds((hours * 3600.0) as i64)).to_rfc3339();
    let events = store.events_since(&cutoff, "")?;

    let mut level_counts: BTreeMap<u8, usize> = BTreeMap::new();
    let mut transition_weights: HashMap<(u8, u8), usize> = HashMap::new();
    let mut levels_in_order: Vec<u8> = Vec::with_capacity(events.len());

    for event in &events {
        let level = classify_event(&event.event_type, &event.subject, &event.source);
        *level_counts.entry(level).or_default() += 1;
        levels_in_order.push(level);
    }
    for pair in levels_in_order.windows(2) {
        if pair[0] != pair[1] {
            *transition_weights.entry((pair[0], pair[1])).or_default() += 1;
        }
    }

    let total = levels_in_order.len();
    let attractor: usize = (1..=3).map(|l| level_counts.get(&l).copied().unwrap_or(0)).sum();
    let high: usize = (8..=12).map(|l| level_counts.get(&l).copied().unwrap_or(0)).sum();

    let mut transitions: Vec<(u8, u8, usize)> = transition_weights
        .into_iter()
        .map(|((a, b), w)| (a, b, w))
        .collect();
    transitions.sort_by(|x, y| y.2.cmp(&x.2).then(x.0.cmp(&y.0)));
    let dominant_transition = transitions.first().copied();

    // Identity violations: execute without a react in the same session.
    let mut reacted_sessions: HashSet<String> = HashSet::new();
    let mut violations = Vec::new();
    let session_of = |data_json: &str| -> Option<String> {
        serde_json::from_str::<serde_json::Value>(data_json)
            .ok()?
            .get("data")?
            .get("session_id")?
            .as_str()
            .map(str::to_string)
    };
    for event in &events {
        if event.event_type.ends_with(".prey8.react") {
            if let Some(sid) = session_of(&event.data_json) {
                reacted_sessions.insert(sid);
            }
        } else if event.event_type.ends_with(".prey8.execute") {
            if let Some(sid) = session_of(&event.data_json) {
                if !reacted_sessions.contains(&sid) {
                    violations.push(format!("execute without react in session {}", sid));
                }
            }
        }
    }

    let report = ForesightReport {
        hours,
        events_mapped: total,
        level_counts,
        transitions,
        dominant_transition,
        attractor_basin_pct: if total > 0 {
            (attractor as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        },
        high_leverage_pct: if total > 0 {
            (high as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        },
        identity_violations: violations,
    };

    let sig = build_signal_metadata(
        "P7",
        "none",
        "ForesightMapper",
        "v1.0",
        &paths.generation,
        Observations { model_provider: Some("none".into()), ..Default::default() },
    );
    write_event(
        store,
        paths,
        &paths.event_type("audit.foresight"),
        &format!("foresight:{}events:{}violations", report.events_mapped, report.identity_violations.len()),
        json!({
            "hours": report.hours,
            "events_mapped": report.events_mapped,
            "level_counts": report.level_counts,
            "dominant_transition": report.dominant_transition,
            "attractor_basin_pct": report.attractor_basin_pct,
            "high_leverage_pct": report.high_leverage_pct,
            "identity_violations": report.identity_violations,
        }),
        Some(&sig),
        None,
    )?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn regex_match_wins() {
        assert_eq!(classify_event("hfo.gen90.scheduler.heartbeat", "HEARTBEAT:1", "x"), 6);
        assert_eq!(classify_event("hfo.gen90.ssot_write.gate_block", "gate_block:x", "x"), 5);
        assert_eq!(classify_event("hfo.gen90.scheduler.watchdog", "WATCHDOG:1/1", "x"), 9);
    }

    #[test]
    fn operator_source_is_level_13() {
        assert_eq!(classify_event("anything.else", "s", "operator_console"), 13);
    }

    #[test]
    fn native_plane_fallback_by_port() {
        // No pattern hits; source carries p4 → median of [5,7] = 7.
        assert_eq!(classify_event("hfo.gen90.singer.muse", "muse", "hfo_singer_gen90_p4"), 7);
        // No port either → 6.
        assert_eq!(classify_event("hfo.gen90.mystery.thing", "zzz", "nowhere"), 6);
    }

    #[test]
    fn mapping_counts_and_violations() {
        let store = Store::open_in_memory("90").unwrap();
        let paths = Paths::at_root(PathBuf::from("/tmp"), "90");
        let conn_insert = |et: &str, data: &str, hash: &str| {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                 VALUES (?1, ?2, 's', 'src', ?3, ?4)",
                rusqlite::params![et, Utc::now().to_rfc3339(), data, hash],
            )
            .unwrap();
        };
        conn_insert(
            "hfo.gen90.prey8.execute",
            r#"{"data":{"session_id":"orphan01"}}"#,
            "h1",
        );
        conn_insert(
            "hfo.gen90.prey8.react",
            r#"{"data":{"session_id":"good01"}}"#,
            "h2",
        );
        conn_insert(
            "hfo.gen90.prey8.execute",
            r#"{"data":{"session_id":"good01"}}"#,
            "h3",
        );

        let report = compute_foresight(&store, &paths, 1.0).unwrap();
        assert_eq!(report.events_mapped, 3);
        assert_eq!(report.identity_violations.len(), 1);
        assert!(report.identity_violations[0].contains("orphan01"));
    }
}
