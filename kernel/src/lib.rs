// Ladder Kernel
//
// Elo rating engine: match validation, pairwise decomposition, a
// serialized rating store with deterministic replay, and read-only
// aggregation views.

pub mod aggregate;
pub mod config;
pub mod decompose;
pub mod elo;
pub mod invariants;
pub mod log;
pub mod payload;
pub mod preview;
pub mod ranking;
pub mod ratings;
pub mod replay;
pub mod state;
pub mod validate;
