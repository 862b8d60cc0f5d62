//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → retry.rs (re-invoke on failure, backoff.rs decides the wait)
//!     → throttle.rs (take a slot or queue FIFO)
//!     → wrapped operation
//!
//! Composition (function_set.rs):
//!     FunctionSet ──wrap(&throttle)──▶ FunctionSet ──wrap(&retry)──▶ FunctionSet
//! ```
//!
//! # Design Decisions
//! - Wrapping is transparent: callers see one result, value or error
//! - No cancellation or timeouts here; a started call always completes
//! - All resilience logic composes through the `Policy` trait

pub mod backoff;
pub mod function_set;
pub mod retry;
pub mod throttle;

pub use function_set::{FunctionSet, Member, Operation, Policy};
pub use retry::{retry, Retry, Retrying};
pub use throttle::{throttle, throttle_with, Throttle, Throttled};
