//! Shared helpers for the Warden crates.
//!
//! Small, dependency-light pieces used across the pipeline: the
//! optimistic-concurrency retry envelope shared by the patcher and the audit
//! logger, the tenant pattern matcher, and the clock abstraction that keeps
//! time-dependent state machines testable.

mod clock;
mod matcher;
mod retry;

pub use clock::{Clock, ManualClock, RealClock};
pub use matcher::{MatchMode, PatternList, TenantSelector};
pub use retry::{with_conflict_retry, BackoffPolicy};
