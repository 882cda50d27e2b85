//! HTTP boundary: admission middleware for axum routers and a standalone
//! decision service.

mod middleware;
mod server;
mod service;

pub use middleware::{admission_middleware, with_admission, AdmissionState, DEFAULT_EXEMPT_PATHS};
pub use server::HttpServer;
pub use service::{router, OutcomeReport};
