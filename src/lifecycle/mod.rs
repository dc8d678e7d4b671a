//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Bind listener → Launch backend (supervisor.rs)
//!     → Readiness probe → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections
//!     → Stop backend (SIGTERM, kill after grace) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: listener first so port conflicts fail before a child exists
//! - Readiness timeout degrades, it does not abort
//! - Backend stop is the last step, after the server has drained

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use supervisor::{LaunchSpec, LifecycleState, ProcessStatus, ProcessSupervisor, StopOutcome};
