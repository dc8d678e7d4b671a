//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Readiness (probe.rs):
//!     Backend spawned
//!     → sleep interval → GET health path (short timeout)
//!     → repeat until success or attempts exhausted
//!     → supervisor marked Ready / Degraded
//!
//! Aggregate (aggregate.rs):
//!     GET <prefix>/health on the edge
//!     → one-shot backend lookup + supervisor status
//!     → always 200
//! ```

pub mod aggregate;
pub mod probe;

pub use aggregate::HealthReport;
pub use probe::{HealthProbe, HealthStatus};
