// hfo — operator CLI for the fleet.
//
// Every tool follows the same surface: a subcommand, `--json` for machine
// output, `--dry-run`/`--once`/`--interval` where they make sense. Exit
// codes: 0 success, 1 typed core errors (NoRoute, gate errors, store
// unavailable), 2 usage errors (clap).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use hfo_core::audit::{coverage, foresight, wish};
use hfo_core::coordinator::{self, intent};
use hfo_core::events::signal::{build_signal_metadata, Observations};
use hfo_core::events::writer::write_event;
use hfo_core::runtime::Runtime;
use hfo_core::watchdog::{self, defense, FleetSpec};
use hfo_core::CoreError;
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "hfo",
    version,
    about = "Self-governing daemon fleet — stigmergy, routes, audits, and the coordinator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the SSOT database (tables, triggers, route seeds)
    Migrate {
        /// Actually execute (default is a dry-run report)
        #[arg(long)]
        execute: bool,
        #[arg(long)]
        json: bool,
    },
    /// Stigmergy event tools
    #[command(subcommand)]
    Event(EventCmd),
    /// Compute-route table: which model a (port, daemon, task) uses
    #[command(subcommand)]
    Route(RouteCmd),
    /// Embed queue inspection
    #[command(subcommand)]
    Queue(QueueCmd),
    /// Swarm coordinator: signal audit, pheromone, recommendations
    #[command(subcommand)]
    Coordinator(CoordinatorCmd),
    /// Lifecycle watchdog: check the fleet, restart the dead
    Watchdog {
        /// Report without restarting anything
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Defense supervisor: anomaly scan (D1–D7), score, trend
    Defense {
        #[arg(long)]
        json: bool,
    },
    /// Coverage auditor: uptime from stigmergy density
    Coverage {
        /// Window in hours
        #[arg(long, default_value_t = 1.0)]
        hours: f64,
        /// Print the per-minute ASCII grid
        #[arg(long)]
        grid: bool,
        #[arg(long)]
        json: bool,
    },
    /// Invariant verifier: cast, audit, list, revoke wishes
    #[command(subcommand)]
    Wish(WishCmd),
    /// Foresight mapper: leverage-level distribution of the event stream
    Foresight {
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        #[arg(long)]
        json: bool,
    },
    /// Route operator intent text to a port
    Intent {
        /// The intent text, e.g. "re-embed the memory corpus"
        text: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum EventCmd {
    /// Self-test the canonical write path (write + dedup + gate checks)
    Test {
        #[arg(long)]
        json: bool,
    },
    /// Write one event with minimal signal metadata
    Write {
        event_type: String,
        subject: String,
        /// Event payload as JSON
        #[arg(long, default_value = "{}")]
        data: String,
        #[arg(long, default_value = "P7")]
        port: String,
        #[arg(long, default_value = "gemma3:4b")]
        model: String,
        #[arg(long, default_value = "hfo_cli")]
        daemon: String,
    },
}

#[derive(Subcommand)]
enum RouteCmd {
    /// Look a route up (falls back to the 'default' task)
    Get {
        port: String,
        daemon: String,
        #[arg(default_value = "default")]
        task: String,
        #[arg(long)]
        json: bool,
    },
    /// Set or update a route
    Set {
        port: String,
        daemon: String,
        model: String,
        provider: String,
        #[arg(long, default_value = "default")]
        task: String,
        #[arg(long, default_value = "operator")]
        by: String,
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// List every route
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum QueueCmd {
    /// Per-status counters
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CoordinatorCmd {
    /// Signal grade + pheromone summary, no writes
    Status {
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        #[arg(long)]
        json: bool,
    },
    /// One full cycle: audit, score, recommend, emit
    Cycle {
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        #[arg(long)]
        json: bool,
    },
    /// Recurring cycles until interrupted
    Daemon {
        /// Seconds between cycles
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Stop after N cycles (0 = forever)
        #[arg(long, default_value_t = 0)]
        max_cycles: u64,
    },
}

#[derive(Subcommand)]
enum WishCmd {
    /// Evaluate one named check
    Cast {
        check: String,
        /// Optional wish text stored alongside the verdict
        #[arg(long, default_value = "")]
        text: String,
        #[arg(long)]
        json: bool,
    },
    /// Re-evaluate every registered wish
    Audit {
        #[arg(long)]
        json: bool,
    },
    /// Show the registry
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a wish by id
    Revoke { id: u64 },
    /// Show the available checks
    Checks,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), CoreError> {
    match cli.command {
        Command::Migrate { execute, json } => {
            if !execute {
                let paths = hfo_core::Paths::resolve();
                let report = json!({
                    "dry_run": true,
                    "db_path": paths.db.display().to_string(),
                    "db_exists": paths.db.exists(),
                    "generation": paths.generation,
                });
                print_report(&report, json, || {
                    println!("dry run — would migrate {}", paths.db.display());
                    println!("pass --execute to apply");
                });
                return Ok(());
            }
            let runtime = Runtime::migrate()?;
            let report = json!({
                "dry_run": false,
                "db_path": runtime.paths.db.display().to_string(),
                "vec_index": runtime.store.has_vec_index(),
                "routes": runtime.store.list_routes()?.len(),
            });
            print_report(&report, json, || {
                println!("migrated {}", runtime.paths.db.display());
            });
            Ok(())
        }

        Command::Event(cmd) => event_cmd(cmd),
        Command::Route(cmd) => route_cmd(cmd),

        Command::Queue(QueueCmd::Status { json }) => {
            let runtime = Runtime::open_ro()?;
            let status = runtime.store.embed_queue_status()?;
            print_report(&serde_json::to_value(&status)?, json, || {
                println!(
                    "embed queue: {} pending, {} claimed, {} done, {} failed",
                    status.pending, status.claimed, status.done, status.failed
                );
            });
            Ok(())
        }

        Command::Coordinator(cmd) => coordinator_cmd(cmd).await,

        Command::Watchdog { dry_run, json } => {
            let runtime = Runtime::open_rw()?;
            let fleet = FleetSpec::load(&runtime.paths);
            let report =
                watchdog::watchdog_check(&runtime.store, &runtime.paths, &fleet, dry_run).await?;
            print_report(&serde_json::to_value(&report)?, json, || {
                println!(
                    "watchdog: {}/{} alive, {} restarted",
                    report.alive, report.checked, report.restarted
                );
                for (name, status) in &report.daemons {
                    println!("  {:<20} {} ({})", name, status.status, status.port);
                }
            });
            Ok(())
        }

        Command::Defense { json } => {
            let runtime = Runtime::open_rw()?;
            let report = defense::defense_scan(&runtime.store, &runtime.paths)?;
            print_report(&serde_json::to_value(&report)?, json, || {
                println!(
                    "defense score {:.0} grade {} ({}, {} events scanned)",
                    report.score, report.grade, report.trend, report.events_scanned
                );
                for a in &report.anomalies {
                    println!("  {} [{}] {}", a.code, a.severity, a.description);
                }
            });
            Ok(())
        }

        Command::Coverage { hours, grid, json } => {
            let runtime = Runtime::open_rw()?;
            let report = coverage::coverage_audit(&runtime.store, &runtime.paths, hours)?;
            print_report(&serde_json::to_value(&report)?, json, || {
                println!(
                    "uptime {:.1}% over {}h — grade {} ({})",
                    report.uptime_pct, hours, report.grade, report.grade_desc
                );
                println!(
                    "covered {} / {} minutes, {} dead zones (longest {} min)",
                    report.covered_minutes,
                    report.total_minutes,
                    report.dead_zone_count,
                    report.longest_dead_zone
                );
                for (source, minutes) in report.leaderboard.iter().take(8) {
                    println!("  {:<40} {:>4} min", source, minutes);
                }
            });
            if grid {
                println!("{}", coverage::ascii_grid(&runtime.store, hours)?);
            }
            Ok(())
        }

        Command::Wish(cmd) => wish_cmd(cmd),

        Command::Foresight { hours, json } => {
            let runtime = Runtime::open_rw()?;
            let report = foresight::compute_foresight(&runtime.store, &runtime.paths, hours)?;
            print_report(&serde_json::to_value(&report)?, json, || {
                println!("{} events mapped over {}h", report.events_mapped, hours);
                println!(
                    "attractor basin (L1–3): {:.1}%   high leverage (L8–12): {:.1}%",
                    report.attractor_basin_pct, report.high_leverage_pct
                );
                if let Some((from, to, weight)) = report.dominant_transition {
                    println!("dominant transition: L{} → L{} (×{})", from, to, weight);
                }
                for v in &report.identity_violations {
                    println!("  violation: {}", v);
                }
            });
            Ok(())
        }

        Command::Intent { text, json } => {
            let route = intent::route_intent(&text.join(" "));
            print_report(&serde_json::to_value(&route)?, json, || {
                println!(
                    "{} (confidence {:.2}) — {}",
                    route.primary_port, route.confidence, route.reason
                );
            });
            Ok(())
        }

        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "hfo", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn event_cmd(cmd: EventCmd) -> Result<(), CoreError> {
    match cmd {
        EventCmd::Test { json } => {
            let runtime = Runtime::open_rw()?;
            let sig = build_signal_metadata(
                "P4",
                "gemma3:4b",
                "SelfTest",
                "v1.0",
                &runtime.paths.generation,
                Observations::default(),
            );
            let event_type = runtime.paths.event_type("self_test");
            let first = write_event(
                &runtime.store,
                &runtime.paths,
                &event_type,
                "self_test:canonical_write",
                json!({"test": true}),
                Some(&sig),
                None,
            )?;
            let second = write_event(
                &runtime.store,
                &runtime.paths,
                &event_type,
                "self_test:canonical_write",
                json!({"test": true}),
                Some(&sig),
                None,
            )?;
            let missing_gate = write_event(
                &runtime.store,
                &runtime.paths,
                &event_type,
                "self_test:gate",
                json!({}),
                None,
                None,
            );
            let report = json!({
                "write_row_id": first,
                "dedup_returned_zero": second == 0,
                "missing_metadata_rejected": missing_gate.is_err(),
            });
            print_report(&report, json, || {
                println!("write → row {}", first);
                println!("dedup → {}", if second == 0 { "ok" } else { "FAILED" });
                println!(
                    "gate  → {}",
                    if missing_gate.is_err() { "ok (rejected)" } else { "FAILED (accepted)" }
                );
            });
            Ok(())
        }
        EventCmd::Write { event_type, subject, data, port, model, daemon } => {
            let runtime = Runtime::open_rw()?;
            let payload: serde_json::Value = serde_json::from_str(&data)?;
            let sig = build_signal_metadata(
                &port,
                &model,
                &daemon,
                "v1.0",
                &runtime.paths.generation,
                Observations::default(),
            );
            let row =
                write_event(&runtime.store, &runtime.paths, &event_type, &subject, payload, Some(&sig), None)?;
            println!("{}", row);
            Ok(())
        }
    }
}

fn route_cmd(cmd: RouteCmd) -> Result<(), CoreError> {
    match cmd {
        RouteCmd::Get { port, daemon, task, json } => {
            let runtime = Runtime::open_ro()?;
            let route = runtime.store.get_route(&port, &daemon, &task)?;
            print_report(&serde_json::to_value(&route)?, json, || {
                println!(
                    "{}/{}/{} → {} ({}) [by {}: {}]",
                    route.port, route.daemon_name, route.task_type, route.model_id,
                    route.provider, route.updated_by, route.reason
                );
            });
            Ok(())
        }
        RouteCmd::Set { port, daemon, model, provider, task, by, reason, priority } => {
            let runtime = Runtime::open_rw()?;
            runtime
                .store
                .set_route(&port, &daemon, &model, &provider, &task, &by, &reason, priority)?;
            println!("route set: {}/{}/{} → {}", port.to_uppercase(), daemon, task, model);
            Ok(())
        }
        RouteCmd::List { json } => {
            let runtime = Runtime::open_ro()?;
            let routes = runtime.store.list_routes()?;
            print_report(&serde_json::to_value(&routes)?, json, || {
                for r in &routes {
                    println!(
                        "{:<4} {:<12} {:<16} {:<24} {}",
                        r.port, r.daemon_name, r.task_type, r.model_id, r.provider
                    );
                }
            });
            Ok(())
        }
    }
}

async fn coordinator_cmd(cmd: CoordinatorCmd) -> Result<(), CoreError> {
    match cmd {
        CoordinatorCmd::Status { hours, json } => {
            let runtime = Runtime::open_ro()?;
            let audit = coordinator::compute_signal_audit(&runtime.store, &runtime.paths, hours)?;
            let pheromone = coordinator::compute_pheromone(&runtime.store, &runtime.paths, hours)?;
            let depth = coordinator::compute_depth(&pheromone);
            let report = json!({
                "audit": &audit,
                "pheromone": pheromone.iter().take(10).collect::<Vec<_>>(),
                "depth": &depth,
            });
            print_report(&report, json, || {
                println!(
                    "signal grade {} ({}% signal, {}% legacy, {} events)",
                    audit.grade, audit.signal_pct, audit.legacy_pct, audit.total_events
                );
                println!(
                    "depth: 8^{:.2} ≈ {} combos across {}/8 ports, QD {:.0}%",
                    depth.fractal_n,
                    depth.total_combos,
                    depth.ports_covered,
                    depth.quality_diversity_score * 100.0
                );
                for e in pheromone.iter().take(8) {
                    println!(
                        "  {:<4} {:<24} {:>8.2} ({} inferences, q={:.2})",
                        e.port, e.model_id, e.pheromone, e.total_inferences, e.avg_quality
                    );
                }
            });
            Ok(())
        }
        CoordinatorCmd::Cycle { hours, json } => {
            let runtime = Runtime::open_rw()?;
            let report = coordinator::run_cycle(&runtime.store, &runtime.paths, hours)?;
            print_report(&serde_json::to_value(&report)?, json, || {
                println!(
                    "cycle complete in {:.1}s — grade {}, {} pheromone entries",
                    report.cycle_time_s, report.audit.grade, report.pheromone_entries
                );
                for (port, rec) in &report.recommendations {
                    println!(
                        "  {} → {} {}",
                        port,
                        rec.recommended_model,
                        if rec.exploration { "(exploring)" } else { "" }
                    );
                }
            });
            Ok(())
        }
        CoordinatorCmd::Daemon { interval, max_cycles } => {
            let runtime = Runtime::open_rw()?;
            let mut cycle = 0u64;
            loop {
                cycle += 1;
                match coordinator::run_cycle(&runtime.store, &runtime.paths, 24.0) {
                    Ok(report) => log::info!(
                        "[coordinator] cycle {} — grade {}, {} entries",
                        cycle,
                        report.audit.grade,
                        report.pheromone_entries
                    ),
                    Err(e) => log::warn!("[coordinator] cycle {} failed: {}", cycle, e),
                }
                if max_cycles > 0 && cycle >= max_cycles {
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("[coordinator] interrupted — exiting after cycle {}", cycle);
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn wish_cmd(cmd: WishCmd) -> Result<(), CoreError> {
    match cmd {
        WishCmd::Cast { check, text, json } => {
            let runtime = Runtime::open_rw()?;
            let verdict = wish::cast(&runtime.store, &runtime.paths, &check, &text)?;
            print_report(&serde_json::to_value(&verdict)?, json, || {
                println!("{} → {}", verdict.check_name, verdict.verdict);
                for v in &verdict.violations {
                    println!("  {}", v);
                }
            });
            Ok(())
        }
        WishCmd::Audit { json } => {
            let runtime = Runtime::open_rw()?;
            let verdicts = wish::audit_all(&runtime.store, &runtime.paths)?;
            print_report(&serde_json::to_value(&verdicts)?, json, || {
                for v in &verdicts {
                    println!("{:<24} {}", v.check_name, v.verdict);
                }
            });
            Ok(())
        }
        WishCmd::List { json } => {
            let paths = hfo_core::Paths::resolve();
            let wishes = wish::list(&paths);
            print_report(&serde_json::to_value(&wishes)?, json, || {
                for w in &wishes {
                    println!(
                        "#{} {:<24} {} (evaluated {}×) — {}",
                        w.wish_id, w.check_name, w.last_verdict, w.evaluation_count, w.wish_text
                    );
                }
            });
            Ok(())
        }
        WishCmd::Revoke { id } => {
            let paths = hfo_core::Paths::resolve();
            if wish::revoke(&paths, id) {
                println!("wish {} revoked", id);
                Ok(())
            } else {
                Err(CoreError::Config(format!("no wish with id {}", id)))
            }
        }
        WishCmd::Checks => {
            for check in wish::wish_checks() {
                println!("{}", check.name);
                println!("  given: {}", check.sbe_given);
                println!("  when:  {}", check.sbe_when);
                println!("  then:  {}", check.sbe_then);
            }
            Ok(())
        }
    }
}

fn print_report<F: FnOnce()>(value: &serde_json::Value, json: bool, human: F) {
    if json {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    } else {
        human();
    }
}
