// ============================================================
// Price manipulation engine: per-pair price windows plus
// global pump-and-dump, wash-trading and slippage scans.
// ============================================================

pub mod engine;
pub mod rules;

pub use engine::{ManipulationEngine, ManipulationStats};
