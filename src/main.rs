// hfo-fleetd — the fleet daemon shell.
//
// A thin wrapper over hfo_core::scheduler: resolve paths, open the store,
// run the fixed-cadence tick loop until SIGINT/SIGTERM. Everything the
// daemon does is visible in stigmergy; `hfo coverage` is the way to ask
// whether it has actually been alive.

use clap::Parser;
use hfo_core::runtime::Runtime;
use hfo_core::scheduler::Scheduler;
use log::info;
use std::sync::atomic::Ordering;

#[derive(Parser)]
#[command(
    name = "hfo-fleetd",
    version,
    about = "Fleet scheduler daemon — heartbeats, audits, warm-up, watchdog"
)]
struct Args {
    /// Run one tick and exit (for cron-style deployments)
    #[arg(long)]
    once: bool,
    /// Never spawn or restart daemons; report only
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let runtime = match Runtime::open_rw() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(e.exit_code());
        }
    };
    info!(
        "[fleetd] root {} | generation {} | db {}",
        runtime.paths.root.display(),
        runtime.paths.generation,
        runtime.paths.db.display()
    );

    let mut scheduler = Scheduler::new(runtime, args.dry_run);

    if args.once {
        match scheduler.tick().await {
            Ok(ran) => info!("[fleetd] single tick ran: {}", ran.join("+")),
            Err(e) => {
                eprintln!("error: {}", e);
                std::process::exit(e.exit_code());
            }
        }
        return;
    }

    // INT/TERM clear the running flag; the loop exits within a second of
    // the current task finishing.
    let running = scheduler.running_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("[fleetd] shutdown signal received");
        running.store(false, Ordering::SeqCst);
    });

    if let Err(e) = scheduler.run().await {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
