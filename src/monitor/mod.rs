// ============================================================
// Security monitoring core: shared alert state and the
// synchronous validation gate transactions pass before commit.
// ============================================================

pub mod service;
pub mod types;
pub mod validation;

pub use service::SecurityMonitor;
pub use types::{Alert, AlertKind, Severity};
pub use validation::TransactionValidator;
