//! Health signals and the bounded ledger that stores them

pub mod ledger;
pub mod signal;

pub use ledger::{ComponentHealth, HealthLedger, HealthStatus, LedgerSummary};
pub use signal::{HealthSignal, Severity};
