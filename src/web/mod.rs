//! HTTP control API module (§6).

pub mod error;
pub mod routes;
pub mod sse;

pub use routes::create_router;
