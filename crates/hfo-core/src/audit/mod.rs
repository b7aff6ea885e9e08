// Audit spells — read-only verifiers that turn the event log into grades.
//
//   coverage  — uptime-from-stigmergy (minute buckets, dead zones, A+–F)
//   wish      — named invariant checks with SBE clauses (GRANTED/DENIED)
//   foresight — leverage-level mapping over the event stream
//
// All three are read-only on the store and emit exactly one summary event
// per invocation. Unparseable rows are counted and skipped, never raised.

pub mod coverage;
pub mod foresight;
pub mod wish;
