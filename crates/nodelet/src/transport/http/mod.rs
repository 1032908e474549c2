//! HTTP/JSON transport.

mod routes;
mod server;

pub use routes::{HealthCheckResponse, SetWorkerRequest, routes};
pub use server::{ServerConfig, serve};
