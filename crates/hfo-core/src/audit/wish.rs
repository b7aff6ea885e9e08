// Invariant verifier — named checks with SBE clauses.
//
// The operator registers a wish (an invariant the system should hold);
// casting it runs the named check against the store and filesystem and
// produces GRANTED (zero violations) or DENIED (with the violation list).
// Verdicts persist to a small registry so wishes can be re-audited en
// masse or revoked.

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

pub struct WishContext<'a> {
    pub store: &'a Store,
    pub paths: &'a Paths,
}

type CheckFn = fn(&WishContext) -> (bool, Vec<String>);

pub struct WishCheck {
    pub name: &'static str,
    pub sbe_given: &'static str,
    pub sbe_when: &'static str,
    pub sbe_then: &'static str,
    pub run: CheckFn,
}

/// The built-in check registry. Extensible by code change only — a wish
/// with an unknown check name is INVALID, never silently granted.
static CHECKS: [WishCheck; 7] = [
    WishCheck {
        name: "ssot_health",
        sbe_given: "SSOT database exists at the pointer-resolved path",
        sbe_when: "ssot_health wish is evaluated",
        sbe_then: "DB opens, core tables exist, FTS works, documents present",
        run: check_ssot_health,
    },
    WishCheck {
        name: "heartbeat_compliance",
        sbe_given: "Daemons are recorded in the fleet state file",
        sbe_when: "heartbeat_compliance wish is evaluated",
        sbe_then: "Each recorded daemon left events within the last hour",
        run: check_heartbeat_compliance,
    },
    WishCheck {
        name: "prey8_integrity",
        sbe_given: "Session open and close events exist in the stigmergy trail",
        sbe_when: "prey8_integrity wish is evaluated",
        sbe_then: "Every recent perceive's session reaches a yield",
        run: check_prey8_integrity,
    },
    WishCheck {
        name: "medallion_boundary",
        sbe_given: "State files at the project root follow the blessed naming set",
        sbe_when: "medallion_boundary wish is evaluated",
        sbe_then: "No unexpected JSON state files exist at the root",
        run: check_medallion_boundary,
    },
    WishCheck {
        name: "daemon_fleet_alive",
        sbe_given: "The fleet state file records daemon PIDs",
        sbe_when: "daemon_fleet_alive wish is evaluated",
        sbe_then: "Every recorded daemon has a live PID",
        run: check_daemon_fleet_alive,
    },
    WishCheck {
        name: "stigmergy_freshness",
        sbe_given: "The fleet writes events while healthy",
        sbe_when: "stigmergy_freshness wish is evaluated",
        sbe_then: "At least one event exists in the last 4 hours",
        run: check_stigmergy_freshness,
    },
    WishCheck {
        name: "config_valid",
        sbe_given: "HFO_ROOT, the pointer registry, and the generation are set",
        sbe_when: "config_valid wish is evaluated",
        sbe_then: "The configuration loader reports zero errors",
        run: check_config_valid,
    },
];

pub fn wish_checks() -> &'static [WishCheck] {
    &CHECKS
}

fn find_check(name: &str) -> Option<&'static WishCheck> {
    wish_checks().iter().find(|c| c.name == name)
}

// ── Checks ─────────────────────────────────────────────────────────────────

fn check_ssot_health(ctx: &WishContext) -> (bool, Vec<String>) {
    let mut violations = Vec::new();
    {
        let conn = ctx.store.conn.lock();
        for table in ["stigmergy_events", "documents", "compute_route", "embed_queue"] {
            let present: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap_or(0);
            if present == 0 {
                violations.push(format!("missing table: {}", table));
            }
        }
    }
    match ctx.store.document_count() {
        Ok(0) => violations.push("no documents in corpus".into()),
        Ok(_) => {}
        Err(e) => violations.push(format!("document count failed: {}", e)),
    }
    if let Err(e) = ctx.store.fts_search("health", 1) {
        violations.push(format!("FTS query failed: {}", e));
    }
    (violations.is_empty(), violations)
}

fn check_heartbeat_compliance(ctx: &WishContext) -> (bool, Vec<String>) {
    let fleet: FleetState = statefile::load_or_default(&ctx.paths.fleet_state());
    let mut violations = Vec::new();
    for name in fleet.daemons.keys() {
        let pattern = format!("%{}%", name.to_lowercase().replace(' ', "_"));
        match ctx.store.count_recent_by_source(&pattern, 60) {
            Ok(0) => violations.push(format!("{}: no events in the last hour", name)),
            Ok(_) => {}
            Err(e) => violations.push(format!("{}: query failed: {}", name, e)),
        }
    }
    (violations.is_empty(), violations)
}

fn check_prey8_integrity(ctx: &WishContext) -> (bool, Vec<String>) {
    // For each recent perceive, its session must reach a yield. Limited to
    // the last 200 opens so one ancient orphan does not deny forever.
    let conn = ctx.store.conn.lock();
    let ns = ctx.paths.namespace();
    let mut stmt = match conn.prepare(
        "SELECT data_json FROM stigmergy_events
         WHERE event_type = ?1 ORDER BY id DESC LIMIT 200",
    ) {
        Ok(s) => s,
        Err(e) => return (false, vec![format!("query failed: {}", e)]),
    };
    let perceives: Vec<String> = stmt
        .query_map([format!("{}.prey8.perceive", ns)], |r| r.get::<_, String>(0))
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();

    let mut violations = Vec::new();
    for data_json in perceives {
        let session_id = serde_json::from_str::<serde_json::Value>(&data_json)
            .ok()
            .and_then(|v| {
                v.get("data")
                    .and_then(|d| d.get("session_id"))
                    .and_then(|s| s.as_str())
                    .map(str::to_string)
            });
        let session_id = match session_id {
            Some(s) if !s.is_empty() => s,
            _ => continue,
        };
        let yielded: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stigmergy_events
                 WHERE event_type = ?1 AND data_json LIKE ?2",
                rusqlite::params![
                    format!("{}.prey8.yield", ns),
                    format!("%{}%", session_id)
                ],
                |r| r.get(0),
            )
            .unwrap_or(0);
        if yielded == 0 {
            violations.push(format!("session {} perceived but never yielded", session_id));
        }
    }
    (violations.is_empty(), violations)
}

fn check_medallion_boundary(ctx: &WishContext) -> (bool, Vec<String>) {
    // Root-level JSON files must belong to the blessed set — a stray state
    // file usually means a tool wrote somewhere it should not have.
    let allowed_exact = ["pointers_blessed.json", "fleet.json", "package.json"];
    let allowed_prefixes = [".fleet_state", ".p5_supervisor", ".p7_wish_state", ".hive8_session_", ".prey8_session_"];
    let mut violations = Vec::new();
    let entries = match std::fs::read_dir(&ctx.paths.root) {
        Ok(e) => e,
        Err(e) => return (false, vec![format!("cannot read root: {}", e)]),
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".json") {
            continue;
        }
        let ok = allowed_exact.contains(&name.as_str())
            || allowed_prefixes.iter().any(|p| name.starts_with(p));
        if !ok {
            violations.push(format!("unexpected state file: {}", name));
        }
    }
    (violations.is_empty(), violations)
}

fn check_daemon_fleet_alive(ctx: &WishContext) -> (bool, Vec<String>) {
    let fleet: FleetState = statefile::load_or_default(&ctx.paths.fleet_state());
    let mut violations = Vec::new();
    for (name, d) in &fleet.daemons {
        if !pid_running(d.pid) {
            violations.push(format!("{}: pid {} not running", name, d.pid));
        }
    }
    (violations.is_empty(), violations)
}

fn check_stigmergy_freshness(ctx: &WishContext) -> (bool, Vec<String>) {
    match ctx.store.count_events_since_hours(4.0) {
        Ok(0) => (false, vec!["no events in the last 4 hours".into()]),
        Ok(_) => (true, vec![]),
        Err(e) => (false, vec![format!("query failed: {}", e)]),
    }
}

fn check_config_valid(ctx: &WishContext) -> (bool, Vec<String>) {
    let mut violations = Vec::new();
    if ctx.paths.generation.parse::<u64>().is_err() {
        violations.push(format!("generation '{}' is not numeric", ctx.paths.generation));
    }
    let pointer = ctx.paths.root.join(crate::paths::POINTER_FILE);
    if pointer.exists() {
        if let Ok(text) = std::fs::read_to_string(&pointer) {
            if serde_json::from_str::<serde_json::Value>(&text).is_err() {
                violations.push("pointer registry is not valid JSON".into());
            }
        }
    }
    if let Some(parent) = ctx.paths.db.parent() {
        if !parent.exists() {
            violations.push(format!("DB parent directory missing: {}", parent.display()));
        }
    }
    (violations.is_empty(), violations)
}

// ── Registry persistence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WishRecord {
    pub wish_id: u64,
    pub wish_text: String,
    pub check_name: String,
    pub created_at: String,
    pub last_verdict: String,
    pub evaluation_count: u64,
    pub last_evaluated: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WishState {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub wishes: Vec<WishRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WishVerdict {
    pub wish_id: u64,
    pub check_name: String,
    pub verdict: String,
    pub violations: Vec<String>,
}

/// Cast a wish: evaluate the named check, persist the verdict, emit the
/// event. Unknown check names produce an INVALID_WISH verdict.
pub fn cast(store: &Store, paths: &Paths, check_name: &str, wish_text: &str) -> CoreResult<WishVerdict> {
    let mut state: WishState = statefile::load_or_default(&paths.wish_state());

    let check = match find_check(check_name) {
        Some(c) => c,
        None => {
            return Ok(WishVerdict {
                wish_id: 0,
                check_name: check_name.to_string(),
                verdict: "INVALID_WISH".into(),
                violations: vec![format!("unknown check '{}'", check_name)],
            });
        }
    };

    let ctx = WishContext { store, paths };
    let (granted, violations) = (check.run)(&ctx);
    let verdict = if granted { "GRANTED" } else { "DENIED" };
    let now = Utc::now().to_rfc3339();

    // Re-casting an existing wish updates its record in place.
    let wish_id = match state.wishes.iter_mut().find(|w| w.check_name == check_name) {
        Some(record) => {
            record.last_verdict = verdict.to_string();
            record.evaluation_count += 1;
            record.last_evaluated = now.clone();
            if !wish_text.is_empty() {
                record.wish_text = wish_text.to_string();
            }
            record.wish_id
        }
        None => {
            state.next_id += 1;
            let id = state.next_id;
            state.wishes.push(WishRecord {
                wish_id: id,
                wish_text: if wish_text.is_empty() {
                    check.sbe_then.to_string()
                } else {
                    wish_text.to_string()
                },
                check_name: check_name.to_string(),
                created_at: now.clone(),
                last_verdict: verdict.to_string(),
                evaluation_count: 1,
                last_evaluated: now.clone(),
            });
            id
        }
    };
    statefile::save_best_effort(&paths.wish_state(), &state);

    let sig = build_signal_metadata(
        "P7",
        "none",
        "WishVerifier",
        "v1.0",
        &paths.generation,
        Observations { model_provider: Some("none".into()), ..Default::default() },
    );
    write_event(
        store,
        paths,
        &paths.event_type("audit.wish"),
        &format!("wish:{}:{}", check_name, verdict),
        json!({
            "wish_id": wish_id,
            "check_name": check_name,
            "verdict": verdict,
            "violations": violations,
            "sbe": {
                "given": check.sbe_given,
                "when": check.sbe_when,
                "then": check.sbe_then,
            },
        }),
        Some(&sig),
        None,
    )?;

    info!("[wish] {} → {} ({} violations)", check_name, verdict, violations.len());
    Ok(WishVerdict {
        wish_id,
        check_name: check_name.to_string(),
        verdict: verdict.to_string(),
        violations,
    })
}

/// Re-evaluate every registered wish. Returns verdicts in registry order.
pub fn audit_all(store: &Store, paths: &Paths) -> CoreResult<Vec<WishVerdict>> {
    let state: WishState = statefile::load_or_default(&paths.wish_state());
    let mut verdicts = Vec::new();
    for record in &state.wishes {
        verdicts.push(cast(store, paths, &record.check_name, &record.wish_text)?);
    }
    Ok(verdicts)
}

/// Remove a wish from the registry. Returns true if something was removed.
pub fn revoke(paths: &Paths, wish_id: u64) -> bool {
    let mut state: WishState = statefile::load_or_default(&paths.wish_state());
    let before = state.wishes.len();
    state.wishes.retain(|w| w.wish_id != wish_id);
    let removed = state.wishes.len() < before;
    if removed {
        statefile::save_best_effort(&paths.wish_state(), &state);
    }
    removed
}

/// Current registry contents, for operator listing.
pub fn list(paths: &Paths) -> Vec<WishRecord> {
    let state: WishState = statefile::load_or_default(&paths.wish_state());
    state.wishes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx() -> (Store, Paths, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at_root(PathBuf::from(dir.path()), "90");
        (Store::open_in_memory("90").unwrap(), paths, dir)
    }

    #[test]
    fn ssot_health_denied_on_empty_corpus_then_granted() {
        let (store, paths, _dir) = ctx();
        let verdict = cast(&store, &paths, "ssot_health", "the store is healthy").unwrap();
        assert_eq!(verdict.verdict, "DENIED");
        assert!(verdict.violations.iter().any(|v| v.contains("no documents")));

        store
            .insert_document("T", "b", "some content", "t", "P6", "note", "")
            .unwrap();
        let verdict = cast(&store, &paths, "ssot_health", "").unwrap();
        assert_eq!(verdict.verdict, "GRANTED");
    }

    #[test]
    fn unknown_check_is_invalid() {
        let (store, paths, _dir) = ctx();
        let verdict = cast(&store, &paths, "make_it_rain", "").unwrap();
        assert_eq!(verdict.verdict, "INVALID_WISH");
    }

    #[test]
    fn recast_increments_evaluation_count() {
        let (store, paths, _dir) = ctx();
        cast(&store, &paths, "stigmergy_freshness", "").unwrap();
        cast(&store, &paths, "stigmergy_freshness", "").unwrap();
        let wishes = list(&paths);
        assert_eq!(wishes.len(), 1);
        assert_eq!(wishes[0].evaluation_count, 2);
    }

    #[test]
    fn freshness_granted_after_any_event() {
        let (store, paths, _dir) = ctx();
        let verdict = cast(&store, &paths, "stigmergy_freshness", "").unwrap();
        // The wish event itself was written AFTER evaluation, so the first
        // cast on an empty store is DENIED…
        assert_eq!(verdict.verdict, "DENIED");
        // …and the second sees the first cast's event.
        let verdict = cast(&store, &paths, "stigmergy_freshness", "").unwrap();
        assert_eq!(verdict.verdict, "GRANTED");
    }

    #[test]
    fn revoke_removes_record() {
        let (store, paths, _dir) = ctx();
        let v = cast(&store, &paths, "config_valid", "").unwrap();
        assert!(revoke(&paths, v.wish_id));
        assert!(list(&paths).is_empty());
        assert!(!revoke(&paths, v.wish_id));
    }

    #[test]
    fn audit_reevaluates_all() {
        let (store, paths, _dir) = ctx();
        cast(&store, &paths, "config_valid", "").unwrap();
        cast(&store, &paths, "medallion_boundary", "").unwrap();
        let verdicts = audit_all(&store, &paths).unwrap();
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts.iter().all(|v| v.verdict == "GRANTED"));
    }

    #[test]
    fn medallion_boundary_flags_stray_files() {
        let (store, paths, _dir) = ctx();
        std::fs::write(paths.root.join("rogue_dump.json"), "{}").unwrap();
        let verdict = cast(&store, &paths, "medallion_boundary", "").unwrap();
        assert_eq!(verdict.verdict, "DENIED");
        assert!(verdict.violations[0].contains("rogue_dump.json"));
    }
}
