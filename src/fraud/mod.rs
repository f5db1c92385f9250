// ============================================================
// Fraud detection engine: device and login tracking plus
// account-state and bulk-pattern correlation.
// ============================================================

pub mod engine;
pub mod rules;

pub use engine::{FraudEngine, FraudStats};
