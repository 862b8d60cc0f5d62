//! Resilience substrate for the usage-metering pipeline services.
//!
//! Throttle and retry wrap outbound calls (singly or as a function set); the
//! fault-isolating router runs request handlers and classifies their faults.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use resilience::{retry, throttle, FunctionSet, Policy, Retry, Throttle};
pub use routing::{FaultRouter, Handler, HandlerError};
