//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (buffered into an Exchange)
//!     → router.rs (open a fault scope, walk the layers)
//!     → matcher.rs (method + path conditions, route params)
//!     → handler.rs (adapted handler: callback, error or step style)
//!     → fault.rs (classify faults, bailout for untrusted code)
//!     → Flow back to the caller for finalization
//!
//! Registration (at startup):
//!     FaultRouter::build(trusted)
//!     → use_handler / use_at / route(path).get(..) adapt each handler
//!     → mount(prefix, router) nests routers of other trust levels
//! ```
//!
//! # Design Decisions
//! - Routers are immutable once served
//! - No regex in hot path (segment matching only)
//! - Deterministic: layers run in registration order

pub mod exchange;
pub mod fault;
pub mod handler;
pub mod matcher;
pub mod router;

pub use exchange::{Exchange, RequestView, ResponseDraft};
pub use fault::{FaultScope, HandlerError, ScopePhase};
pub use handler::{adapt, Adapted, Flow, Handler, Next};
pub use router::{FaultRouter, Route};
