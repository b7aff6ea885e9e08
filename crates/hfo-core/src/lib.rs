// hfo-core — engine library for the self-governing daemon fleet.
//
// A dozen long-running workers coordinate indirectly through an append-only
// event log in SQLite ("stigmergy"): daemons write structured events, other
// daemons read them, and the coordinator derives fleet policy from the
// aggregate. The coordination fabric is the product; the enrichment work the
// ports do with it lives outside this crate.
//
// Module map (leaves first):
//   atoms       — constants, the error enum, wire types
//   paths       — HFO_ROOT resolution + pointer registry
//   statefile   — best-effort atomic JSON state files
//   store       — SQLite schema, triggers, routes, embed queue, documents
//   events      — envelope + signal builder + the canonical event writer
//   gates       — PREY8/HIVE8 gated session machines
//   coordinator — pheromone scoring, recommendations, intent routing
//   audit       — coverage, wish, and foresight spells
//   watchdog    — lifecycle supervisor (restarts) + defense supervisor (events only)
//   scheduler   — the fixed-cadence tick loop
//   ollama      — local model server client
//   embedder    — embedding client + queue drain
//   runtime     — the per-process context bundle

pub mod atoms;
pub mod audit;
pub mod coordinator;
pub mod embedder;
pub mod events;
pub mod gates;
pub mod ollama;
pub mod paths;
pub mod runtime;
pub mod scheduler;
pub mod statefile;
pub mod store;
pub mod watchdog;

pub use atoms::error::{CoreError, CoreResult};
pub use atoms::types::SignalMetadata;
pub use paths::Paths;
pub use runtime::Runtime;
pub use store::Store;
