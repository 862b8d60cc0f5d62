//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id and trace layers)
//!     → request.rs (request id, body limit, build the Exchange)
//!     → routing (fault-isolated middleware chain)
//!     → response.rs (finalize: value, body, error or 404)
//!     → Send to client
//!
//! Outbound:
//!     handler → client.rs (retry → throttle → reqwest) → next pipeline stage
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::{UpstreamCall, UpstreamClient, UpstreamError};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
