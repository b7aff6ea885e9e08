// ── Fleet Atoms ────────────────────────────────────────────────────────────
// Leaf definitions shared by every engine module: constants, the canonical
// error enum, and the wire-level record types. Nothing in here touches I/O.

pub mod constants;
pub mod error;
pub mod types;
