//! Server orchestrator.
//!
//! Owns the configured metric handlers and drives their two-phase lifecycle: every
//! handler registers its metrics before any handler starts, and every route is installed
//! before the listener accepts its first connection.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{ConnectInfo, Request},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{MethodFilter, on},
};
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{
    config::listen_bind_address,
    core::{
        factory::{HandlerContext, HandlerFactory},
        routes::RouteTable,
    },
    metrics::MetricsRegistry,
    ports::metrics_handler::{
        HandlerResult, MetricName, MetricsHandler, NUM_OF_REQUESTS, StartContext,
    },
};

/// Path of the scrape endpoint
pub const METRICS_PATH: &str = "/metrics";

/// Return the requested names with the forwarding handler added when missing.
///
/// Blank names are dropped; order and duplicates are otherwise kept, so a duplicated
/// name still fails registration.
pub fn with_forwarding_handler<S: AsRef<str>>(metric_names: &[S]) -> Vec<MetricName> {
    let mut names: Vec<MetricName> = metric_names
        .iter()
        .map(|name| name.as_ref().trim())
        .filter(|name| !name.is_empty())
        .map(MetricName::from)
        .collect();
    if !names.iter().any(|name| name.as_str() == NUM_OF_REQUESTS) {
        names.push(MetricName::from(NUM_OF_REQUESTS));
    }
    names
}

pub struct SidecarServer {
    listen_addr: String,
    handlers: Vec<Arc<dyn MetricsHandler>>,
    registry: MetricsRegistry,
    shutdown: CancellationToken,
}

impl SidecarServer {
    /// Instantiate every requested handler. Any unknown name or failed constructor aborts.
    pub fn new<S: AsRef<str>>(
        metric_names: &[S],
        factory: &HandlerFactory,
        context: &HandlerContext,
        shutdown: CancellationToken,
    ) -> HandlerResult<Self> {
        let handlers = with_forwarding_handler(metric_names)
            .iter()
            .map(|name| factory.create(name.as_str(), context))
            .collect::<HandlerResult<Vec<_>>>()?;

        Ok(Self {
            listen_addr: context.listen_addr.clone(),
            handlers,
            registry: MetricsRegistry::new(),
            shutdown,
        })
    }

    /// Names of the handlers this server runs, in start order
    pub fn metric_names(&self) -> Vec<&MetricName> {
        self.handlers.iter().map(|h| h.metric_name()).collect()
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Register all metrics, start all handlers and build the router.
    pub fn prepare(&self) -> Result<Router> {
        tracing::info!("Registering metrics");
        for handler in &self.handlers {
            handler
                .register_metrics(&self.registry)
                .wrap_err("Failed registering metrics")?;
        }

        tracing::info!("Starting metrics handlers");
        let mut routes = RouteTable::new();
        for handler in &self.handlers {
            let name = handler.metric_name().clone();
            handler
                .clone()
                .start(StartContext {
                    routes: &mut routes,
                    shutdown: self.shutdown.child_token(),
                })
                .wrap_err_with(|| format!("Failed starting metrics handler '{name}'"))?;
        }

        tracing::info!("Registering metrics endpoint");
        let registry = self.registry.clone();
        routes
            .route(
                METRICS_PATH,
                on(MethodFilter::GET, move |req: Request| {
                    let registry = registry.clone();
                    async move { serve_metrics(&registry, &req) }
                }),
            )
            .wrap_err("Failed registering metrics endpoint")?;

        Ok(routes.into_router().layer(TraceLayer::new_for_http()))
    }

    /// Prepare and serve on an already bound listener until shutdown.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        let router = self.prepare()?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to read listener address")?;
        tracing::info!(listen_addr = %local_addr, "Listening to incoming requests");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
        .await
        .wrap_err("Failed while listening to incoming requests")?;

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Bind the configured listen address, then [`run`](Self::run).
    pub async fn bind_and_run(self) -> Result<()> {
        let listener = TcpListener::bind(listen_bind_address(&self.listen_addr))
            .await
            .wrap_err_with(|| format!("Failed to bind listen address {}", self.listen_addr))?;
        self.run(listener).await
    }
}

fn serve_metrics(registry: &MetricsRegistry, req: &Request) -> Response {
    let from = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    tracing::debug!(
        from = %from,
        uri = %req.uri(),
        method = %req.method(),
        "Received new metrics request, invoking handler"
    );

    match registry.encode() {
        Ok((body, content_type)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
