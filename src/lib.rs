//! Sidecar proxy with pluggable metric handlers.
//!
//! The sidecar runs next to a single service instance. It forwards every inbound request
//! to the co-located backend (plain HTTP or WebSocket passthrough) and exposes Prometheus
//! metrics describing that instance on `GET /metrics`, so an external controller can
//! tell idle instances from busy ones.
//!
//! # Metric handlers
//! Each exported metric is owned by one [`MetricsHandler`](ports::metrics_handler::MetricsHandler):
//! - `num_of_requests`: counter of forwarded requests. This handler is the proxy itself
//!   and is always enabled. It also counts ticks of the liveness monitor while the
//!   auxiliary connection marker reads `1`.
//! - `jupyter_kernel_busyness`: gauge set to `1` while any kernel reported by
//!   `GET /api/kernels` on the backend is busy.
//!
//! Handlers are built by name through the [`HandlerFactory`] and driven by the
//! [`SidecarServer`]: every handler registers its metrics before any handler starts.
//!
//! # Quick Example
//! ```no_run
//! use sidecar_proxy::{
//!     GracefulShutdown, HandlerContext, HandlerFactory, SidecarServer, config::SidecarConfig,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = SidecarConfig {
//!     forward_addr: "127.0.0.1:8888".to_string(),
//!     metric_names: vec!["jupyter_kernel_busyness".to_string()],
//!     ..SidecarConfig::default()
//! };
//! let shutdown = GracefulShutdown::new();
//! let server = SidecarServer::new(
//!     &config.metric_names,
//!     &HandlerFactory::with_defaults(),
//!     &HandlerContext::from_config(&config),
//!     shutdown.token(),
//! )?;
//! server.bind_and_run().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the handlers, the handshake check and the orchestration inside `core`.
//!
//! # Error Handling
//! Each seam has its own `thiserror` enum. Startup paths return `eyre::Result<T>` with
//! context attached through `WrapErr`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FileSystemAdapter, HttpClientAdapter},
    core::{HandlerContext, HandlerFactory, SidecarServer},
    metrics::MetricsRegistry,
    ports::{http_client::HttpClient, metrics_handler::MetricsHandler},
    utils::GracefulShutdown,
};
