//! Auditing staged data.
//!
//! - [`QualityCheck`] predicates with deterministic evaluation
//! - [`Verdict`] with per-check diagnostics
//! - [`CheckAuditor`] reading the staging branch through the lakehouse

mod auditor;
mod checks;

pub use auditor::CheckAuditor;
pub use checks::{evaluate_all, CheckDiagnostic, QualityCheck, Verdict, VerdictStatus};
