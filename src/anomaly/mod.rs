// ============================================================
// Anomaly detection engine: statistical, behavioral and
// network analyzers over the recent transaction stream.
// ============================================================

pub mod engine;
pub mod rules;

pub use engine::{AnomalyEngine, AnomalyStats};
