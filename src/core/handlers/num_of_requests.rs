//! Forwarding collector.
//!
//! Owns the catch-all route: every request that is not a metrics scrape is counted and
//! proxied to the co-located backend, over HTTP or as a WebSocket passthrough depending
//! on the handshake check. The same counter also receives the liveness monitor's ticks.
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
};
use prometheus::IntCounter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    adapters::websocket::{WebSocketProxyError, proxy_websocket},
    config::{LabelSet, LivenessConfig},
    core::{
        handlers::liveness::LivenessMonitor,
        handshake::is_websocket_upgrade,
        target::{ProxyTargets, TargetError},
    },
    metrics::MetricsRegistry,
    ports::{
        file_system::MarkerReader,
        http_client::{HttpClient, HttpClientError},
        metrics_handler::{
            HandlerError, HandlerResult, MetricName, MetricsHandler, StartContext,
        },
    },
    tracing_setup::handler_span,
    utils::log_throttle::LogThrottle,
};

/// Help text of the exported counter
pub const HELP: &str = "Total number of requests forwarded.";

/// Why a request could not be forwarded
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Http(#[from] HttpClientError),

    #[error(transparent)]
    WebSocket(#[from] WebSocketProxyError),
}

impl ForwardError {
    /// Whether the caller went away before the exchange completed
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Target(_) => false,
            Self::Http(e) => e.is_canceled(),
            Self::WebSocket(e) => e.is_canceled(),
        }
    }
}

pub struct NumOfRequestsHandler {
    metric_name: MetricName,
    labels: LabelSet,
    forward_addr: String,
    liveness: LivenessConfig,
    http_client: Arc<dyn HttpClient>,
    marker_reader: Arc<dyn MarkerReader>,
    cancel_log: LogThrottle,
    counter: OnceLock<IntCounter>,
    targets: OnceLock<ProxyTargets>,
    shutdown: OnceLock<CancellationToken>,
}

impl NumOfRequestsHandler {
    pub fn new(
        metric_name: MetricName,
        labels: LabelSet,
        forward_addr: impl Into<String>,
        liveness: LivenessConfig,
        http_client: Arc<dyn HttpClient>,
        marker_reader: Arc<dyn MarkerReader>,
    ) -> Self {
        Self {
            metric_name,
            labels,
            forward_addr: forward_addr.into(),
            liveness,
            http_client,
            marker_reader,
            cancel_log: LogThrottle::default(),
            counter: OnceLock::new(),
            targets: OnceLock::new(),
            shutdown: OnceLock::new(),
        }
    }

    /// Current counter value, `0` before registration
    pub fn request_count(&self) -> u64 {
        self.counter.get().map_or(0, IntCounter::get)
    }

    /// Targets resolved at start
    pub fn targets(&self) -> Option<&ProxyTargets> {
        self.targets.get()
    }

    /// Count and forward one inbound request.
    pub async fn on_request(&self, req: Request) -> Response {
        let from = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();
        tracing::debug!(
            from = %from,
            uri = %req.uri(),
            method = %req.method(),
            "Received new request, forwarding"
        );

        if let Some(counter) = self.counter.get() {
            counter.inc();
        }

        match self.forward(req).await {
            Ok((target, response)) => {
                tracing::debug!(
                    target_url = %target,
                    status = %response.status(),
                    "Forwarded to target"
                );
                response
            }
            Err(e) => {
                self.log_forward_error(&e);
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }

    async fn forward(&self, mut req: Request) -> Result<(String, Response), ForwardError> {
        let Some(targets) = self.targets.get() else {
            return Err(TargetError::InvalidAddress {
                address: self.forward_addr.clone(),
                reason: "handler was not started".to_string(),
            }
            .into());
        };
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();

        if is_websocket_upgrade(req.method(), req.headers()) {
            let url = targets.ws_url(&path_and_query);
            let shutdown = self.shutdown.get().cloned().unwrap_or_default();
            let response = proxy_websocket(req, &url, shutdown).await?;
            return Ok((url, response));
        }

        let uri = targets.http_uri(&path_and_query)?;
        let target = uri.to_string();
        *req.uri_mut() = uri;
        let response = self.http_client.send_request(req).await?;
        Ok((target, response))
    }

    fn log_forward_error(&self, e: &ForwardError) {
        if !e.is_canceled() {
            tracing::error!(error = %e, "Failed to forward request");
        } else if self.cancel_log.should_log() {
            tracing::warn!(
                error = %e,
                suppressed_for_secs = self.cancel_log.window().as_secs(),
                "Request canceled while forwarding, suppressing further cancellation logs"
            );
        }
    }
}

impl MetricsHandler for NumOfRequestsHandler {
    fn metric_name(&self) -> &MetricName {
        &self.metric_name
    }

    fn register_metrics(&self, registry: &MetricsRegistry) -> HandlerResult<()> {
        let counter_vec = registry
            .register_counter(self.metric_name.as_str(), HELP)
            .map_err(|source| HandlerError::Registration {
                name: self.metric_name.to_string(),
                source,
            })?;
        let _ = self
            .counter
            .set(counter_vec.with_label_values(&self.labels.values()));

        tracing::info!(metric_name = %self.metric_name, "Metric registered successfully");
        Ok(())
    }

    fn start(self: Arc<Self>, ctx: StartContext<'_>) -> HandlerResult<()> {
        let counter = self
            .counter
            .get()
            .cloned()
            .ok_or_else(|| HandlerError::NotRegistered(self.metric_name.to_string()))?;

        let targets = ProxyTargets::from_forward_addr(&self.forward_addr).map_err(|e| {
            HandlerError::InvalidForwardAddress {
                address: self.forward_addr.clone(),
                reason: e.to_string(),
            }
        })?;
        tracing::info!(
            http_target = %targets.http(),
            ws_target = %targets.ws(),
            "Starting to listen and forward"
        );
        let _ = self.targets.set(targets);
        let _ = self.shutdown.set(ctx.shutdown.clone());

        let handler = self.clone();
        ctx.routes.catch_all(any(move |req: Request| {
            let handler = handler.clone();
            async move { handler.on_request(req).await }
        }))?;

        // Make the series visible before the first real request
        counter.inc();

        let monitor = LivenessMonitor::new(&self.liveness, self.marker_reader.clone(), counter);
        let span = handler_span(self.metric_name.as_str());
        tokio::spawn(monitor.run(ctx.shutdown).instrument(span));
        Ok(())
    }
}
