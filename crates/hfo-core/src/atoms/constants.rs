// ── Fleet Atoms: Constants ─────────────────────────────────────────────────
// Single home for every knob that used to be scattered across the fleet
// tools: port labels, the signal-metadata contract, pheromone weights, and
// the scheduler cadences. Tools import from here; none redefine locally.

/// The eight logical ports. Every daemon and every event is tagged with one.
/// Pure labels — no runtime semantics attach to them.
pub const PORTS: [&str; 8] = ["P0", "P1", "P2", "P3", "P4", "P5", "P6", "P7"];

/// Short role word per port, used in operator output and intent routing.
pub const PORT_LABELS: [(&str, &str); 8] = [
    ("P0", "OBSERVE"),
    ("P1", "BRIDGE"),
    ("P2", "SHAPE"),
    ("P3", "INJECT"),
    ("P4", "DISRUPT"),
    ("P5", "IMMUNIZE"),
    ("P6", "ASSIMILATE"),
    ("P7", "NAVIGATE"),
];

/// Is `port` one of P0..P7? Case-insensitive.
pub fn is_valid_port(port: &str) -> bool {
    PORTS.iter().any(|p| p.eq_ignore_ascii_case(port))
}

/// Role word for a port, or "?" for anything outside P0..P7.
pub fn port_label(port: &str) -> &'static str {
    PORT_LABELS
        .iter()
        .find(|(p, _)| p.eq_ignore_ascii_case(port))
        .map(|(_, w)| *w)
        .unwrap_or("?")
}

// ── Signal metadata contract ───────────────────────────────────────────────

/// The four fields that MUST be present and non-empty in every
/// signal_metadata record. This is the structural contract — the event
/// writer rejects, and the database trigger backstops.
pub const REQUIRED_SIGNAL_FIELDS: [&str; 4] =
    ["port", "model_id", "daemon_name", "model_provider"];

// ── Pheromone scoring (ACO) ────────────────────────────────────────────────
// pheromone = quality^QUALITY_WEIGHT
//           / (latency_norm^SPEED_WEIGHT × cost_norm^COST_WEIGHT)
//           × evaporation × volume

pub const EVAPORATION_RATE: f64 = 0.10;
pub const MIN_PHEROMONE: f64 = 0.01;
pub const QUALITY_WEIGHT: f64 = 2.0;
pub const SPEED_WEIGHT: f64 = 1.0;
pub const COST_WEIGHT: f64 = 0.5;

/// Probability of picking the second-best model instead of the best.
pub const EXPLORATION_RATE: f64 = 0.10;

// ── Scheduler cadences (seconds) ───────────────────────────────────────────

pub const HEARTBEAT_INTERVAL: u64 = 60; // heartbeat event
pub const ENRICHMENT_INTERVAL: u64 = 120; // enrichment status pass
pub const EMBED_INTERVAL: u64 = 300; // GPU warm-up + embed sweep
pub const RESEARCH_INTERVAL: u64 = 900; // research status pass
pub const GOVERNANCE_INTERVAL: u64 = 1800; // deep governance pass
pub const AUDIT_INTERVAL: u64 = 3600; // coverage + wish audits
pub const WATCHDOG_INTERVAL: u64 = 21600; // full fleet restart check

// ── Gated sessions ─────────────────────────────────────────────────────────

/// Parent hash of the first link in every session chain.
pub const CHAIN_GENESIS: &str = "GENESIS";

/// Minutes of stigmergy silence before a daemon counts as not-alive
/// for the lifecycle watchdog.
pub const LIVENESS_WINDOW_MINUTES: i64 = 10;

/// Default generation when HFO_GENERATION is unset. Event-type prefixes,
/// trigger exempt patterns, and the coordinator window all derive from it.
pub const DEFAULT_GENERATION: &str = "90";

/// Embedding vector width. The embeddings BLOB and the vec index both
/// store exactly this many f32 lanes.
pub const EMBED_DIM: usize = 384;
