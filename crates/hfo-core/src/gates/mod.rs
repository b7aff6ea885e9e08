// Gated session machines — the eight-tile protocol for multi-agent work.
//
// One generic engine, two alphabets. PREY8 is the strategic loop
// (perceive → react → execute → yield), HIVE8 the tactical one
// (hunt → intervene → verify → emit). Identical skeleton: deny-by-default
// agent authorization, nonce/token chaining, non-empty structured fields,
// and a fail-closed test gate that blocks forward progress until PASSED.
//
//   engine   — the generic tile machine (phases, chain, persistence)
//   registry — agent authorization table + dynamic-agent patterns
//   prey8    — strategic profile and typed wrappers
//   hive8    — tactical profile and typed wrappers

pub mod engine;
pub mod hive8;
pub mod prey8;
pub mod registry;

pub use engine::{TileMachine, TileResponse};
pub use hive8::Hive8;
pub use prey8::Prey8;
