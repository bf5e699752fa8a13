//! Jupyter kernel busyness collector.
//!
//! Polls the backend's kernels endpoint on a fixed period and exports a gauge that is `1`
//! while at least one kernel is busy and `0` otherwise. A failed poll leaves the gauge
//! untouched and is retried on the next tick.
use std::{
    fmt,
    str::FromStr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use prometheus::Gauge;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::{
    config::LabelSet,
    core::target::ProxyTargets,
    metrics::MetricsRegistry,
    ports::metrics_handler::{
        HandlerError, HandlerResult, MetricName, MetricsHandler, StartContext,
    },
    tracing_setup::handler_span,
};

/// Help text of the exported gauge
pub const HELP: &str = "Jupyter kernel busyness";

/// Path of the kernel listing on the backend
pub const KERNELS_PATH: &str = "/api/kernels";

/// Upper bound for a single poll. Shorter poll intervals lower it further, so a hung
/// backend never holds a poll past the next tick.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout applied to each poll issued every `poll_interval`
pub fn poll_timeout(poll_interval: Duration) -> Duration {
    poll_interval.min(POLL_TIMEOUT)
}

/// Execution state reported for each kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ExecutionState {
    Idle,
    Busy,
    Starting,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Starting => "starting",
        }
    }
}

impl FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "starting" => Ok(Self::Starting),
            other => Err(format!("Unknown kernel execution state: {other}")),
        }
    }
}

impl TryFrom<String> for ExecutionState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExecutionState> for &'static str {
    fn from(state: ExecutionState) -> Self {
        state.as_str()
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the kernels listing. Only the execution state matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kernel {
    pub execution_state: ExecutionState,
}

/// Errors of a single poll. None of them are fatal.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PollError {
    #[error("Failed to send request to kernels endpoint {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Kernels endpoint {url} answered with status {status}")]
    Status { url: String, status: StatusCode },

    #[error("Failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("Failed to parse kernels list: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a kernels listing. Any malformed entry rejects the whole listing.
pub fn parse_kernels(body: &[u8]) -> Result<Vec<Kernel>, PollError> {
    Ok(serde_json::from_slice(body)?)
}

/// Whether any kernel is busy. An empty listing is idle.
pub fn any_busy(kernels: &[Kernel]) -> bool {
    kernels
        .iter()
        .any(|kernel| kernel.execution_state == ExecutionState::Busy)
}

pub struct JupyterKernelBusynessHandler {
    metric_name: MetricName,
    labels: LabelSet,
    kernels_url: Url,
    poll_interval: Duration,
    client: reqwest::Client,
    gauge: OnceLock<Gauge>,
}

impl JupyterKernelBusynessHandler {
    pub fn new(
        metric_name: MetricName,
        labels: LabelSet,
        forward_addr: &str,
        poll_interval: Duration,
    ) -> HandlerResult<Self> {
        let targets = ProxyTargets::from_forward_addr(forward_addr).map_err(|e| {
            HandlerError::InvalidForwardAddress {
                address: forward_addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        let kernels_url = targets.http().join(KERNELS_PATH).map_err(|e| {
            HandlerError::InvalidForwardAddress {
                address: forward_addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        let client = reqwest::Client::builder()
            .timeout(poll_timeout(poll_interval))
            .build()
            .map_err(|e| HandlerError::Initialization {
                name: metric_name.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            metric_name,
            labels,
            kernels_url,
            poll_interval,
            client,
            gauge: OnceLock::new(),
        })
    }

    pub fn kernels_url(&self) -> &Url {
        &self.kernels_url
    }

    /// Current gauge value, `None` before registration
    pub fn busyness(&self) -> Option<f64> {
        self.gauge.get().map(Gauge::get)
    }

    async fn fetch_kernels(&self) -> Result<Vec<Kernel>, PollError> {
        tracing::debug!(url = %self.kernels_url, "Getting Jupyter kernels");
        let response = self
            .client
            .get(self.kernels_url.clone())
            .send()
            .await
            .map_err(|source| PollError::Request {
                url: self.kernels_url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status {
                url: self.kernels_url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(PollError::Body)?;
        let kernels = parse_kernels(&body)?;
        tracing::debug!(kernels = ?kernels, "Successfully got Jupyter kernels");
        Ok(kernels)
    }

    /// Poll once and update the gauge.
    ///
    /// Returns the value that was set. On error the gauge keeps its previous value.
    pub async fn poll_once(&self) -> Result<f64, PollError> {
        let kernels = self.fetch_kernels().await?;
        let value = if any_busy(&kernels) { 1.0 } else { 0.0 };

        if let Some(gauge) = self.gauge.get() {
            tracing::debug!(metric_value = value, labels = ?self.labels, "Setting metric");
            gauge.set(value);
        }
        Ok(value)
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Kernel busyness poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "Failed updating metric");
                    }
                }
            }
        }
    }
}

impl MetricsHandler for JupyterKernelBusynessHandler {
    fn metric_name(&self) -> &MetricName {
        &self.metric_name
    }

    fn register_metrics(&self, registry: &MetricsRegistry) -> HandlerResult<()> {
        let gauge_vec = registry
            .register_gauge(self.metric_name.as_str(), HELP)
            .map_err(|source| HandlerError::Registration {
                name: self.metric_name.to_string(),
                source,
            })?;
        let _ = self
            .gauge
            .set(gauge_vec.with_label_values(&self.labels.values()));

        tracing::info!(metric_name = %self.metric_name, "Metric registered successfully");
        Ok(())
    }

    fn start(self: Arc<Self>, ctx: StartContext<'_>) -> HandlerResult<()> {
        if self.gauge.get().is_none() {
            return Err(HandlerError::NotRegistered(self.metric_name.to_string()));
        }

        tracing::info!(
            metric_name = %self.metric_name,
            url = %self.kernels_url,
            interval_secs = self.poll_interval.as_secs(),
            "Starting jupyter kernel busyness metrics handler"
        );
        let span = handler_span(self.metric_name.as_str());
        tokio::spawn(self.run(ctx.shutdown).instrument(span));
        Ok(())
    }
}
