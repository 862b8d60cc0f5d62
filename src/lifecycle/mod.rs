//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal or bailout fault → Stop accepting → Drain in-flight requests → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → ShutdownReason::Signal
//! ```
//!
//! # Design Decisions
//! - A bailout exits with status 70 so the process supervisor replaces the worker
//! - In-flight requests are drained, never cancelled

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownReason, BAILOUT_EXIT_CODE};
