//! Core domain types for the Warden tenant-limit controller.
//!
//! Everything that crosses a crate boundary lives here: metric samples,
//! limit definitions and values, per-tenant limit sets, audit entries, and
//! the shared error taxonomy. The types are deliberately free of behavior
//! beyond what their invariants require; the pipeline crates own the logic.

mod alert;
mod audit;
mod errors;
mod limits;
mod sample;

pub use alert::{Alert, AlertSeverity};
pub use audit::{actions, AuditEntry, AuditQuery};
pub use errors::{WardenError, WardenResult};
pub use limits::{LimitDefinition, LimitType, LimitValue, TenantLimits};
pub use sample::{Sample, TenantMetrics};
