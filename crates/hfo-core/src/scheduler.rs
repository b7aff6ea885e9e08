// The strange-loop scheduler — one tick loop driving every fixed cadence.
//
// Single-threaded over the tick; each cadence owns a last-run marker and
// fires when its interval elapses. The loop sleeps in one-second slices so
// a shutdown signal takes effect within a second of the current task
// finishing. Cadences are fixed by design — this is not a workflow engine.

use crate::atoms::constants::{
    AUDIT_INTERVAL, EMBED_INTERVAL, ENRICHMENT_INTERVAL, GOVERNANCE_INTERVAL, HEARTBEAT_INTERVAL,
    RESEARCH_INTERVAL, WATCHDOG_INTERVAL,
};
use crate::atoms::error::CoreResult;
use crate::audit::{coverage, wish};
use crate::embedder::{self, EmbeddingClient};
use crate::events::signal::{build_signal_metadata, Observations};
use crate::events::writer::write_event;
use crate::ollama::{OllamaClient, DEFAULT_WARM_MODEL};
use crate::runtime::Runtime;
use crate::watchdog::{self, FleetSpec};
use log::{info, warn};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct Scheduler {
    runtime: Runtime,
    running: Arc<AtomicBool>,
    dry_run: bool,
    cycle_count: u64,
    last_heartbeat: Option<Instant>,
    last_enrichment: Option<Instant>,
    last_embed: Option<Instant>,
    last_research: Option<Instant>,
    last_governance: Option<Instant>,
    last_audit: Option<Instant>,
    last_watchdog: Option<Instant>,
}

fn due(last: &Option<Instant>, interval_secs: u64) -> bool {
    match last {
        None => true,
        Some(t) => t.elapsed().as_secs() >= interval_secs,
    }
}

impl Scheduler {
    pub fn new(runtime: Runtime, dry_run: bool) -> Self {
        Scheduler {
            runtime,
            running: Arc::new(AtomicBool::new(true)),
            dry_run,
            cycle_count: 0,
            last_heartbeat: None,
            last_enrichment: None,
            last_embed: None,
            last_research: None,
            last_governance: None,
            last_audit: None,
            last_watchdog: None,
        }
    }

    /// Shared shutdown flag — signal handlers clear it; the loop exits after
    /// the current tick.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// One tick: run every cadence that is due. Returns the task names that
    /// fired, for the per-tick log line.
    pub async fn tick(&mut self) -> CoreResult<Vec<&'static str>> {
        let mut ran = Vec::new();

        if due(&self.last_heartbeat, HEARTBEAT_INTERVAL) {
            self.last_heartbeat = Some(Instant::now());
            self.heartbeat()?;
            ran.push("heartbeat");
        }

        if due(&self.last_enrichment, ENRICHMENT_INTERVAL) {
            self.last_enrichment = Some(Instant::now());
            let queue = self.runtime.store.embed_queue_status()?;
            info!(
                "[scheduler] enrichment pass — embed queue: {} pending / {} claimed",
                queue.pending, queue.claimed
            );
            ran.push("enrichment");
        }

        if due(&self.last_embed, EMBED_INTERVAL) {
            self.last_embed = Some(Instant::now());
            self.embed_sweep().await;
            ran.push("embed_sweep");
        }

        if due(&self.last_research, RESEARCH_INTERVAL) {
            self.last_research = Some(Instant::now());
            info!("[scheduler] research window open (port daemons own the work)");
            ran.push("research");
        }

        if due(&self.last_governance, GOVERNANCE_INTERVAL) {
            self.last_governance = Some(Instant::now());
            info!("[scheduler] governance window open (port daemons own the work)");
            ran.push("governance");
        }

        if due(&self.last_audit, AUDIT_INTERVAL) {
            self.last_audit = Some(Instant::now());
            self.audits()?;
            ran.push("audit");
        }

        if due(&self.last_watchdog, WATCHDOG_INTERVAL) {
            self.last_watchdog = Some(Instant::now());
            let fleet = FleetSpec::load(&self.runtime.paths);
            let report =
                watchdog::watchdog_check(&self.runtime.store, &self.runtime.paths, &fleet, self.dry_run)
                    .await?;
            info!(
                "[scheduler] watchdog: {}/{} alive, {} restarted",
                report.alive, report.checked, report.restarted
            );
            ran.push("watchdog");
        }

        if !ran.is_empty() {
            info!("[scheduler] tick #{}: ran {}", self.cycle_count, ran.join("+"));
        }
        Ok(ran)
    }

    /// Run until the flag clears. 1 s sleep slices keep shutdown latency low.
    pub async fn run(&mut self) -> CoreResult<()> {
        info!("[scheduler] loop starting (dry_run={})", self.dry_run);
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.tick().await {
                // Transient store contention fails this tick only; the next
                // scheduled cycle retries.
                warn!("[scheduler] tick failed: {}", e);
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        info!("[scheduler] loop stopped cleanly");
        Ok(())
    }

    fn heartbeat(&mut self) -> CoreResult<()> {
        self.cycle_count += 1;
        let coverage = coverage::compute_coverage(&self.runtime.store, 1.0)?;
        let events_1h = self.runtime.store.count_events_since_hours(1.0)?;

        let sig = build_signal_metadata(
            "P7",
            "none",
            "Scheduler",
            "v1.0",
            &self.runtime.paths.generation,
            Observations {
                model_provider: Some("none".into()),
                cycle: self.cycle_count,
                ..Default::default()
            },
        );
        write_event(
            &self.runtime.store,
            &self.runtime.paths,
            &self.runtime.paths.event_type("scheduler.heartbeat"),
            &format!("HEARTBEAT:{}:{:.0}%", self.cycle_count, coverage.uptime_pct),
            json!({
                "cycle": self.cycle_count,
                "uptime_1h_pct": coverage.uptime_pct,
                "events_1h": events_1h,
            }),
            Some(&sig),
            None,
        )?;
        info!(
            "[scheduler] HEARTBEAT #{} | 1h uptime {:.1}% | {} events",
            self.cycle_count, coverage.uptime_pct, events_1h
        );
        Ok(())
    }

    /// Keep VRAM warm and drain the embed queue while the server is up.
    async fn embed_sweep(&mut self) {
        let ollama = OllamaClient::from_env();
        if !ollama.is_reachable().await {
            info!("[scheduler] embed sweep skipped — model server offline");
            return;
        }

        let warm_model =
            std::env::var("HFO_WARM_MODEL").unwrap_or_else(|_| DEFAULT_WARM_MODEL.into());
        if let Err(e) = ollama.warm_up(&warm_model).await {
            warn!("[scheduler] warm-up failed: {}", e);
        }

        let queue = match self.runtime.store.embed_queue_status() {
            Ok(q) => q,
            Err(e) => {
                warn!("[scheduler] embed queue status failed: {}", e);
                return;
            }
        };
        if queue.pending == 0 {
            info!("[scheduler] embed queue empty");
            return;
        }
        let client = EmbeddingClient::from_env();
        match embedder::drain(&self.runtime.store, &client, 50, "scheduler_sweep").await {
            Ok(report) => info!(
                "[scheduler] embed sweep: {} claimed, {} embedded, {} failed",
                report.claimed, report.embedded, report.failed
            ),
            Err(e) => warn!("[scheduler] embed sweep failed: {}", e),
        }
    }

    fn audits(&mut self) -> CoreResult<()> {
        let report = coverage::coverage_audit(&self.runtime.store, &self.runtime.paths, 1.0)?;
        info!(
            "[scheduler] coverage: {:.1}% grade {} ({} dead zones)",
            report.uptime_pct, report.grade, report.dead_zone_count
        );
        let verdicts = wish::audit_all(&self.runtime.store, &self.runtime.paths)?;
        let denied = verdicts.iter().filter(|v| v.verdict == "DENIED").count();
        info!("[scheduler] wish audit: {} wishes, {} denied", verdicts.len(), denied);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_tick_runs_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::in_memory(dir.path().to_path_buf(), "90").unwrap();
        let mut scheduler = Scheduler::new(runtime, true);

        let ran = scheduler.tick().await.unwrap();
        assert!(ran.contains(&"heartbeat"));
        assert!(ran.contains(&"audit"));
        assert!(ran.contains(&"watchdog"));

        // Heartbeat event landed.
        let n: i64 = {
            let conn = scheduler.runtime().store.conn.lock();
            conn.query_row(
                "SELECT COUNT(*) FROM stigmergy_events
                 WHERE event_type = 'hfo.gen90.scheduler.heartbeat'",
                [],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn second_tick_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::in_memory(dir.path().to_path_buf(), "90").unwrap();
        let mut scheduler = Scheduler::new(runtime, true);
        scheduler.tick().await.unwrap();
        let ran = scheduler.tick().await.unwrap();
        assert!(ran.is_empty(), "nothing should be due one instant later: {:?}", ran);
    }

    #[tokio::test]
    async fn shutdown_flag_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::in_memory(dir.path().to_path_buf(), "90").unwrap();
        let mut scheduler = Scheduler::new(runtime, true);
        let flag = scheduler.running_handle();
        flag.store(false, Ordering::SeqCst);
        // Flag already cleared → run() returns without sleeping forever.
        scheduler.run().await.unwrap();
    }
}
