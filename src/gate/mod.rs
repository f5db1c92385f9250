// ============================================================
// DDoS & attack prevention: synchronous per-request gate plus
// a background sweep over per-IP request logs.
// ============================================================

pub mod engine;
pub mod patterns;

pub use engine::{AttackShield, GateDecision, ShieldStats};
