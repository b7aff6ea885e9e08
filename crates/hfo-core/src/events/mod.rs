// Stigmergy events — the coordination fabric's write side.
//
//   envelope — CloudEvents 1.0 construction + canonical hashing
//   signal   — signal_metadata builder + the static model registry
//   writer   — write_event, the ONE choke point every event passes through

pub mod envelope;
pub mod signal;
pub mod writer;

pub use signal::{build_signal_metadata, model_spec, Observations};
pub use writer::write_event;
