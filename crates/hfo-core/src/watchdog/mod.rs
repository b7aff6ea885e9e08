// Lifecycle supervisor — the only component that restarts daemons.
//
// Aliveness uses two independent signals, either one is enough:
//   (a) the PID recorded in .fleet_state.json is still running
//   (b) the daemon left stigmergy events in the last 10 minutes
// Dead + prerequisites satisfied → relaunch as a detached process in its
// own process group, record the new PID, and write one watchdog event.
//
// The defense supervisor (defense.rs) watches for anomalies and NEVER
// restarts anything. The separation is load-bearing: one writer for the
// fleet state file, one component with spawn authority.

pub mod defense;

use crate::atoms::constants::LIVENESS_WINDOW_MINUTES;
use crate::atoms::error::CoreResult;
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::ollama::OllamaClient;
use crate::paths::Paths;
use crate::statefile;
use crate::store::Store;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// One daemon the fleet should keep alive. Declarative — loaded from
/// `fleet.json` at the project root (absent file = empty fleet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub name: String,
    /// Program to exec. Relative paths resolve against the project root.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub port: String,
    /// Skip restart while the local model server is down.
    #[serde(default)]
    pub requires_local_models: bool,
    /// LIKE pattern matched against event `source` for liveness; defaults
    /// to %<lowercased name>%.
    #[serde(default)]
    pub source_pattern: Option<String>,
}

impl DaemonSpec {
    fn pattern(&self) -> String {
        self.source_pattern
            .clone()
            .unwrap_or_else(|| format!("%{}%", self.name.to_lowercase().replace(' ', "_")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSpec {
    pub daemons: Vec<DaemonSpec>,
}

impl FleetSpec {
    /// Load from `<root>/fleet.json`; an absent or unreadable file is an
    /// empty fleet, not an error — the watchdog then has nothing to do.
    pub fn load(paths: &Paths) -> FleetSpec {
        statefile::load_or_default(&paths.fleet_spec())
    }
}

/// Per-daemon record in `.fleet_state.json`. Owned by this supervisor; other
/// components read it without locking and tolerate staleness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub script: String,
    pub port: String,
    pub started: String,
    pub started_by: String,
    #[serde(default)]
    pub restarts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetState {
    #[serde(default)]
    pub daemons: BTreeMap<String, DaemonState>,
    #[serde(default)]
    pub last_update: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogReport {
    pub checked: usize,
    pub alive: usize,
    pub dead: usize,
    pub restarted: usize,
    pub daemons: BTreeMap<String, DaemonStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub status: String,
    pub port: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_pid: Option<u32>,
}

/// Is this PID a running process?
pub fn pid_running(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    #[cfg(unix)]
    {
        // kill(pid, 0): EPERM still means "exists".
        let ret = unsafe { libc::kill(pid as i32, 0) };
        ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Spawn a daemon detached: stdio null, own process group, cwd at the
/// project root. Returns the child PID.
fn launch(paths: &Paths, spec: &DaemonSpec) -> CoreResult<u32> {
    let program = {
        let p = std::path::Path::new(&spec.program);
        if p.is_absolute() || spec.program.contains('/') {
            paths.root.join(p).to_string_lossy().to_string()
        } else {
            spec.program.clone()
        }
    };
    let mut cmd = std::process::Command::new(&program);
    cmd.args(&spec.args)
        .current_dir(&paths.root)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn()?;
    Ok(child.id())
}

/// Check the fleet, restart what is dead, persist the state file, and write
/// one watchdog summary event. `dry_run` reports without spawning.
pub async fn watchdog_check(
    store: &Store,
    paths: &Paths,
    fleet: &FleetSpec,
    dry_run: bool,
) -> CoreResult<WatchdogReport> {
    let models_online = OllamaClient::from_env().is_reachable().await;
    let mut state: FleetState = statefile::load_or_default(&paths.fleet_state());

    let mut report = WatchdogReport {
        checked: 0,
        alive: 0,
        dead: 0,
        restarted: 0,
        daemons: BTreeMap::new(),
    };

    for spec in &fleet.daemons {
        report.checked += 1;

        let recorded = state.daemons.get(&spec.name).cloned().unwrap_or_default();
        let by_pid = pid_running(recorded.pid);
        let by_stigmergy = store
            .count_recent_by_source(&spec.pattern(), LIVENESS_WINDOW_MINUTES)
            .unwrap_or(0)
            > 0;

        if by_pid || by_stigmergy {
            report.alive += 1;
            report.daemons.insert(
                spec.name.clone(),
                DaemonStatus {
                    status: "ALIVE".into(),
                    port: spec.port.clone(),
                    evidence: Some(if by_stigmergy { "stigmergy" } else { "pid" }.into()),
                    new_pid: None,
                },
            );
            continue;
        }

        report.dead += 1;
        let can_restart = !(spec.requires_local_models && !models_online);

        if dry_run || !can_restart {
            let status = if dry_run { "DEAD_DRY_RUN" } else { "DEAD_NO_PREREQ" };
            report.daemons.insert(
                spec.name.clone(),
                DaemonStatus {
                    status: status.into(),
                    port: spec.port.clone(),
                    evidence: None,
                    new_pid: None,
                },
            );
            continue;
        }

        match launch(paths, spec) {
            Ok(pid) => {
                info!("[watchdog] restarted '{}' as pid {}", spec.name, pid);
                report.restarted += 1;
                report.daemons.insert(
                    spec.name.clone(),
                    DaemonStatus {
                        status: "RESTARTED".into(),
                        port: spec.port.clone(),
                        evidence: None,
                        new_pid: Some(pid),
                    },
                );
                state.daemons.insert(
                    spec.name.clone(),
                    DaemonState {
                        pid,
                        script: spec.program.clone(),
                        port: spec.port.clone(),
                        started: Utc::now().to_rfc3339(),
                        started_by: "watchdog".into(),
                        restarts: recorded.restarts + 1,
                    },
                );
            }
            Err(e) => {
                warn!("[watchdog] restart of '{}' failed: {}", spec.name, e);
                report.daemons.insert(
                    spec.name.clone(),
                    DaemonStatus {
                        status: "RESTART_FAILED".into(),
                        port: spec.port.clone(),
                        evidence: None,
                        new_pid: None,
                    },
                );
            }
        }
    }

    if !dry_run {
        if report.restarted > 0 {
            state.last_update = Utc::now().to_rfc3339();
            statefile::save_best_effort(&paths.fleet_state(), &state);
        }
        let sig = build_signal_metadata(
            "P7",
            "none",
            "Watchdog",
            "v1.0",
            &paths.generation,
            Observations { model_provider: Some("none".into()), ..Default::default() },
        );
        write_event(
            store,
            paths,
            &paths.event_type("scheduler.watchdog"),
            &format!(
                "WATCHDOG:{}/{} alive:{} restarted",
                report.alive, report.checked, report.restarted
            ),
            json!({
                "checked": report.checked,
                "alive": report.alive,
                "dead": report.dead,
                "restarted": report.restarted,
                "daemons": report.daemons,
            }),
            Some(&sig),
            None,
        )?;
    }

    Ok(report)
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
    fn own_pid_is_running() {
        assert!(pid_running(std::process::id()));
        assert!(!pid_running(0));
    }

    #[tokio::test]
    async fn empty_fleet_is_a_noop() {
        let (store, paths, _dir) = ctx();
        let report = watchdog_check(&store, &paths, &FleetSpec::default(), false)
            .await
            .unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(report.restarted, 0);
    }

    #[tokio::test]
    async fn recent_stigmergy_counts_as_alive() {
        let (store, paths, _dir) = ctx();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO stigmergy_events (event_type, timestamp, subject, source, data_json, content_hash)
                 VALUES ('system_health.tick', ?1, 's', 'hfo_singer_gen90_p4', '{}', 'h')",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
        }
        let fleet = FleetSpec {
            daemons: vec![DaemonSpec {
                name: "Singer".into(),
                program: "hfo_singer_ai_daemon.py".into(),
                args: vec![],
                port: "P4".into(),
                requires_local_models: false,
                source_pattern: None,
            }],
        };
        let report = watchdog_check(&store, &paths, &fleet, true).await.unwrap();
        assert_eq!(report.alive, 1);
        assert_eq!(report.daemons["Singer"].evidence.as_deref(), Some("stigmergy"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_daemon_is_restarted() {
        let (store, paths, _dir) = ctx();

        // Pre-seed fleet state with a dead PID and no recent events.
        let mut state = FleetState::default();
        state.daemons.insert(
            "Singer".into(),
            DaemonState {
                pid: 999_999,
                script: "hfo_singer_ai_daemon.py".into(),
                port: "P4".into(),
                started: "2026-01-01T00:00:00Z".into(),
                started_by: "test".into(),
                restarts: 0,
            },
        );
        statefile::save(&paths.fleet_state(), &state).unwrap();

        let fleet = FleetSpec {
            daemons: vec![DaemonSpec {
                name: "Singer".into(),
                program: "sleep".into(),
                args: vec!["2".into()],
                port: "P4".into(),
                requires_local_models: false,
                source_pattern: Some("%no_such_source%".into()),
            }],
        };

        let report = watchdog_check(&store, &paths, &fleet, false).await.unwrap();
        assert_eq!(report.restarted, 1);
        let status = &report.daemons["Singer"];
        assert_eq!(status.status, "RESTARTED");
        let new_pid = status.new_pid.unwrap();
        assert_ne!(new_pid, 999_999);

        let saved: FleetState = statefile::load_or_default(&paths.fleet_state());
        assert_eq!(saved.daemons["Singer"].pid, new_pid);
        assert_eq!(saved.daemons["Singer"].started_by, "watchdog");
        assert_eq!(saved.daemons["Singer"].restarts, 1);

        let events: i64 = {
            let conn = store.conn.lock();
            conn.query_row(
                "SELECT COUNT(*) FROM stigmergy_events
                 WHERE event_type = 'hfo.gen90.scheduler.watchdog'",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(events, 1);
    }
}
