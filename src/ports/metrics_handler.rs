use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{core::routes::RouteTable, metrics::MetricsError};

/// Name of the request counter, also the handler that performs the forwarding
pub const NUM_OF_REQUESTS: &str = "num_of_requests";

/// Name of the Jupyter kernel busyness gauge
pub const JUPYTER_KERNEL_BUSYNESS: &str = "jupyter_kernel_busyness";

/// Identifier of a metric: the exported metric name and the factory lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName(String);

impl MetricName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MetricName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl AsRef<str> for MetricName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error type for metric handler construction and lifecycle
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The factory has no constructor for this name
    #[error("Metric handler for metric name '{0}' does not exist")]
    UnknownMetricName(String),

    /// The handler's metric could not be added to the registry
    #[error("Failed to register metric '{name}'")]
    Registration {
        name: String,
        #[source]
        source: MetricsError,
    },

    /// `start` was called before `register_metrics` succeeded
    #[error("Metric '{0}' must be registered before its handler is started")]
    NotRegistered(String),

    /// A second handler tried to claim an already installed route
    #[error("Route '{0}' is already registered")]
    RouteConflict(String),

    /// The backend address could not be turned into proxy targets
    #[error("Invalid forward address '{address}': {reason}")]
    InvalidForwardAddress { address: String, reason: String },

    /// Any other construction failure
    #[error("Failed to initialize metric handler '{name}': {message}")]
    Initialization { name: String, message: String },
}

/// Result type alias for metric handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Everything a handler may touch while it starts.
///
/// The route table is owned by the server and only reachable here, so every route is
/// installed before the listener accepts its first connection.
pub struct StartContext<'a> {
    pub routes: &'a mut RouteTable,
    pub shutdown: CancellationToken,
}

/// MetricsHandler defines the port for an independent telemetry collector.
///
/// Lifecycle is two-phase: the server calls `register_metrics` on every handler first,
/// then `start` on every handler. `start` must not block; long running work is spawned.
pub trait MetricsHandler: Send + Sync + 'static {
    /// Name of the metric this handler owns
    fn metric_name(&self) -> &MetricName;

    /// Create the handler's metric family in the registry
    fn register_metrics(&self, registry: &crate::metrics::MetricsRegistry) -> HandlerResult<()>;

    /// Install routes and spawn background work
    fn start(self: Arc<Self>, ctx: StartContext<'_>) -> HandlerResult<()>;
}
