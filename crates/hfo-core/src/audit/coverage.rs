// Coverage auditor — uptime computed from stigmergy density, not process
// liveness. A daemon that is "running" but writes nothing is down as far as
// the fleet is concerned.
//
//   uptime_pct = covered_minutes / total_minutes
//   covered    = distinct UTC minutes holding ≥1 event

use crate::atoms::error::CoreResult;
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::paths::Paths;
use crate::store::Store;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

const GRADE_BANDS: [(f64, &str, &str); 5] = [
    (99.0, "A+", "Production grade"),
    (95.0, "A", "Excellent"),
    (90.0, "B", "Good"),
    (75.0, "C", "Patchy"),
    (50.0, "D", "Failing"),
];

#[derive(Debug, Clone, Serialize)]
pub struct DeadZone {
    pub start: String,
    pub end: String,
    pub minutes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub hours: f64,
    pub total_minutes: usize,
    pub covered_minutes: usize,
    pub dead_minutes: usize,
    pub uptime_pct: f64,
    pub grade: String,
    pub grade_desc: String,
    pub dead_zone_count: usize,
    pub longest_dead_zone: usize,
    pub dead_zones: Vec<DeadZone>,
    /// source tag → minutes covered, best first.
    pub leaderboard: Vec<(String, usize)>,
}

pub fn grade_uptime(pct: f64) -> (&'static str, &'static str) {
    for (threshold, grade, desc) in GRADE_BANDS {
        if pct >= threshold {
            return (grade, desc);
        }
    }
    ("F", "Dead air")
}

/// Minute bucket key of an RFC 3339 timestamp: "YYYY-MM-DDTHH:MM".
fn minute_key(ts: &str) -> Option<String> {
    if ts.len() >= 16 {
        Some(ts[..16].to_string())
    } else {
        None
    }
}

/// Scan the trailing `hours` window, bucket by minute, grade the coverage.
/// Empty window (hours ≤ 0) reports total_minutes = 0, uptime 0.0, grade F.
pub fn compute_coverage(store: &Store, hours: f64) -> CoreResult<CoverageReport> {
    let total_minutes = (hours * 60.0) as usize;
    if total_minutes == 0 {
        return Ok(CoverageReport {
            hours,
            total_minutes: 0,
            covered_minutes: 0,
            dead_minutes: 0,
            uptime_pct: 0.0,
            grade: "F".into(),
            grade_desc: "Dead air".into(),
            dead_zone_count: 0,
            longest_dead_zone: 0,
            dead_zones: vec![],
            leaderboard: vec![],
        });
    }

    // The window is the last `total_minutes` whole minutes, current minute
    // included — an event written one second ago covers its minute.
    let now = Utc::now();
    let end_minute = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);
    let start = end_minute - Duration::minutes(total_minutes as i64 - 1);
    let cutoff = start.to_rfc3339();
    let events = store.events_since(&cutoff, "")?;

    // Bucket events + per-source minute sets.
    let mut covered: HashSet<String> = HashSet::new();
    let mut per_source: HashMap<String, HashSet<String>> = HashMap::new();
    for event in &events {
        if let Some(key) = minute_key(&event.timestamp) {
            covered.insert(key.clone());
            per_source.entry(event.source.clone()).or_default().insert(key);
        }
    }

    // Walk the window minute by minute to find dead zones.
    let mut dead_zones: Vec<DeadZone> = Vec::new();
    let mut run_start: Option<(DateTime<Utc>, usize)> = None;
    let mut covered_minutes = 0usize;
    for i in 0..total_minutes {
        let t = start + Duration::minutes(i as i64);
        let key = minute_key(&t.to_rfc3339()).unwrap_or_default();
        if covered.contains(&key) {
            covered_minutes += 1;
            if let Some((zone_start, count)) = run_start.take() {
                dead_zones.push(DeadZone {
                    start: zone_start.to_rfc3339(),
                    end: t.to_rfc3339(),
                    minutes: count,
                });
            }
        } else {
            match run_start {
                Some((_, ref mut count)) => *count += 1,
                None => run_start = Some((t, 1)),
            }
        }
    }
    if let Some((zone_start, count)) = run_start {
        dead_zones.push(DeadZone {
            start: zone_start.to_rfc3339(),
            end: now.to_rfc3339(),
            minutes: count,
        });
    }

    let uptime_pct = covered_minutes as f64 / total_minutes as f64 * 100.0;
    let (grade, grade_desc) = grade_uptime(uptime_pct);
    let longest_dead_zone = dead_zones.iter().map(|z| z.minutes).max().unwrap_or(0);

    let mut leaderboard: Vec<(String, usize)> = per_source
        .into_iter()
        .map(|(source, minutes)| (source, minutes.len()))
        .collect();
    leaderboard.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    Ok(CoverageReport {
        hours,
        total_minutes,
        covered_minutes,
        dead_minutes: total_minutes - covered_minutes,
        uptime_pct: (uptime_pct * 10.0).round() / 10.0,
        grade: grade.to_string(),
        grade_desc: grade_desc.to_string(),
        dead_zone_count: dead_zones.len(),
        longest_dead_zone,
        dead_zones,
        leaderboard,
    })
}

/// Run the audit and write the summary event.
pub fn coverage_audit(store: &Store, paths: &Paths, hours: f64) -> CoreResult<CoverageReport> {
    let report = compute_coverage(store, hours)?;
    let sig = build_signal_metadata(
        "P7",
        "none",
        "CoverageAuditor",
        "v1.0",
        &paths.generation,
        Observations { model_provider: Some("none".into()), ..Default::default() },
    );
    write_event(
        store,
        paths,
        &paths.event_type("audit.coverage"),
        &format!("coverage:{:.0}pct:grade_{}", report.uptime_pct, report.grade),
        json!({
            "hours": report.hours,
            "uptime_pct": report.uptime_pct,
            "grade": report.grade,
            "covered_minutes": report.covered_minutes,
            "dead_minutes": report.dead_minutes,
            "dead_zone_count": report.dead_zone_count,
            "longest_dead_zone": report.longest_dead_zone,
            "leaderboard": report.leaderboard.iter().take(10).cloned().collect::<Vec<_>>(),
        }),
        Some(&sig),
        None,
    )?;
    Ok(report)
}

/// ASCII per-minute grid for operator display: one row per 60 minutes,
/// '█' covered, '·' dead.
pub fn ascii_grid(store: &Store, hours: f64) -> CoreResult<String> {
    let total_minutes = (hours * 60.0) as usize;
    let now = Utc::now();
    let end_minute = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);
    let start = end_minute - Duration::minutes(total_minutes as i64 - 1);
    let events = store.events_since(&start.to_rfc3339(), "")?;
    let covered: HashSet<String> = events
        .iter()
        .filter_map(|e| minute_key(&e.timestamp))
        .collect();

    let mut rows: BTreeMap<String, String> = BTreeMap::new();
    for i in 0..total_minutes {
        let t = start + Duration::minutes(i as i64);
        let key = minute_key(&t.to_rfc3339()).unwrap_or_default();
        let hour_key = key[..13].to_string();
        rows.entry(hour_key)
            .or_default()
            .push(if covered.contains(&key) { '█' } else { '·' });
    }
    Ok(rows
        .into_iter()
        .map(|(hour, cells)| format!("{}  {}", hour, cells))
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> (Store, Paths) {
        (
            Store::open_in_memory("90").unwrap(),
            Paths::at_root(PathBuf::from("/tmp"), "90"),
        )
    }

    fn insert_at_minute_offset(store: &Store, offset: i64, hash: &str) {
        let ts = (Utc::now() - Duration::minutes(offset)).to_rfc3339();
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
             VALUES ('system_health.tick', ?1, 's', 'hfo_test_daemon', '{\"x\":1}', ?2)",
            rusqlite::params![ts, hash],
        )
        .unwrap();
    }

    #[test]
    fn full_hour_is_a_plus() {
        let (store, _paths) = ctx();
        for i in 0..60 {
            insert_at_minute_offset(&store, i, &format!("m{}", i));
        }
        let report = compute_coverage(&store, 1.0).unwrap();
        assert!(report.uptime_pct >= 99.0, "uptime {}", report.uptime_pct);
        assert_eq!(report.grade, "A+");
        assert_eq!(report.dead_zone_count, 0);
    }

    #[test]
    fn dead_zone_drops_grade_to_c() {
        let (store, _paths) = ctx();
        // Minutes 10–25 (16 minutes) missing from the hour.
        for i in 0..60 {
            if (10..26).contains(&i) {
                continue;
            }
            insert_at_minute_offset(&store, i, &format!("m{}", i));
        }
        let report = compute_coverage(&store, 1.0).unwrap();
        assert_eq!(report.covered_minutes, 44);
        assert_eq!(report.dead_minutes, 16);
        assert!((report.uptime_pct - 73.3).abs() < 1.0, "uptime {}", report.uptime_pct);
        assert_eq!(report.grade, "C");
        assert_eq!(report.longest_dead_zone, 16);
    }

    #[test]
    fn empty_window_reports_zero() {
        let (store, _paths) = ctx();
        let report = compute_coverage(&store, 0.0).unwrap();
        assert_eq!(report.total_minutes, 0);
        assert_eq!(report.uptime_pct, 0.0);
        assert_eq!(report.grade, "F");
    }

    #[test]
    fn empty_store_is_f() {
        let (store, _paths) = ctx();
        let report = compute_coverage(&store, 1.0).unwrap();
        assert_eq!(report.covered_minutes, 0);
        assert_eq!(report.grade, "F");
        assert_eq!(report.dead_zone_count, 1);
        assert_eq!(report.longest_dead_zone, 60);
    }

    #[test]
    fn audit_emits_summary_event() {
        let (store, paths) = ctx();
        coverage_audit(&store, &paths, 1.0).unwrap();
        let n: i64 = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT COUNT(*) FROM stigmergy_events WHERE event_type = 'hfo.gen90.audit.coverage'",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(n, 1);
    }

    #[test]
    fn leaderboard_ranks_sources() {
        let (store, _paths) = ctx();
        for i in 0..5 {
            insert_at_minute_offset(&store, i, &format!("a{}", i));
        }
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                 VALUES ('system_health.tick', ?1, 's', 'hfo_other_daemon', '{\"x\":1}', 'b0')",
                [(Utc::now() - Duration::minutes(30)).to_rfc3339()],
            )
            .unwrap();
        }
        let report = compute_coverage(&store, 1.0).unwrap();
        assert_eq!(report.leaderboard[0].0, "hfo_test_daemon");
        assert_eq!(report.leaderboard[0].1, 5);
        assert_eq!(report.leaderboard[1].1, 1);
    }
}
