//! Metric handler registry.
//!
//! Maps a metric name to the constructor of the handler that owns it. The registry is
//! open: additional handlers are added with [`HandlerFactory::register`] instead of
//! editing a central match.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use crate::{
    adapters::{FileSystemAdapter, HttpClientAdapter},
    config::{LabelSet, LivenessConfig, SidecarConfig},
    core::handlers::{JupyterKernelBusynessHandler, NumOfRequestsHandler},
    ports::{
        file_system::MarkerReader,
        http_client::HttpClient,
        metrics_handler::{
            HandlerError, HandlerResult, JUPYTER_KERNEL_BUSYNESS, MetricName, MetricsHandler,
            NUM_OF_REQUESTS,
        },
    },
};

/// Everything a handler constructor may need. Shared by every handler of a process.
#[derive(Clone)]
pub struct HandlerContext {
    pub labels: LabelSet,
    pub forward_addr: String,
    pub listen_addr: String,
    pub kernel_poll_interval: Duration,
    pub liveness: LivenessConfig,
    pub http_client: Arc<dyn HttpClient>,
    pub marker_reader: Arc<dyn MarkerReader>,
}

impl HandlerContext {
    /// Build the context for a validated configuration with the default adapters.
    pub fn from_config(config: &SidecarConfig) -> Self {
        Self {
            labels: config.labels(),
            forward_addr: config.forward_addr.clone(),
            listen_addr: config.listen_addr.clone(),
            kernel_poll_interval: config.kernel_poll_interval(),
            liveness: config.liveness.clone(),
            http_client: Arc::new(HttpClientAdapter::new()),
            marker_reader: Arc::new(FileSystemAdapter::new()),
        }
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn with_marker_reader(mut self, marker_reader: Arc<dyn MarkerReader>) -> Self {
        self.marker_reader = marker_reader;
        self
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("labels", &self.labels)
            .field("forward_addr", &self.forward_addr)
            .field("listen_addr", &self.listen_addr)
            .field("kernel_poll_interval", &self.kernel_poll_interval)
            .field("liveness", &self.liveness)
            .finish_non_exhaustive()
    }
}

/// Constructor of one metric handler
pub type HandlerConstructor = Box<
    dyn Fn(MetricName, &HandlerContext) -> HandlerResult<Arc<dyn MetricsHandler>> + Send + Sync,
>;

pub struct HandlerFactory {
    constructors: BTreeMap<String, HandlerConstructor>,
}

impl HandlerFactory {
    /// A factory that knows no handler
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// A factory with the built-in handlers registered
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(NUM_OF_REQUESTS, |name, ctx| {
            Ok(Arc::new(NumOfRequestsHandler::new(
                name,
                ctx.labels.clone(),
                ctx.forward_addr.clone(),
                ctx.liveness.clone(),
                ctx.http_client.clone(),
                ctx.marker_reader.clone(),
            )) as Arc<dyn MetricsHandler>)
        });
        factory.register(JUPYTER_KERNEL_BUSYNESS, |name, ctx| {
            Ok(Arc::new(JupyterKernelBusynessHandler::new(
                name,
                ctx.labels.clone(),
                &ctx.forward_addr,
                ctx.kernel_poll_interval,
            )?) as Arc<dyn MetricsHandler>)
        });
        factory
    }

    /// Add or replace the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(MetricName, &HandlerContext) -> HandlerResult<Arc<dyn MetricsHandler>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self
            .constructors
            .insert(name.clone(), Box::new(constructor))
            .is_some()
        {
            tracing::debug!(metric_name = %name, "Replaced metric handler constructor");
        }
        self
    }

    /// Build the handler owning `name`.
    pub fn create(
        &self,
        name: &str,
        ctx: &HandlerContext,
    ) -> HandlerResult<Arc<dyn MetricsHandler>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| HandlerError::UnknownMetricName(name.to_string()))?;
        constructor(MetricName::new(name), ctx)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered metric names in lexical order
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for HandlerFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> HandlerContext {
        HandlerContext::from_config(&SidecarConfig {
            forward_addr: "127.0.0.1:8888".to_string(),
            namespace: "ns".to_string(),
            ..SidecarConfig::default()
        })
    }

    #[test]
    fn test_defaults() {
        let factory = HandlerFactory::default();
        assert_eq!(factory.names(), vec![JUPYTER_KERNEL_BUSYNESS, NUM_OF_REQUESTS]);
    }

    #[test]
    fn test_create_known_handlers() {
        let factory = HandlerFactory::with_defaults();
        let ctx = context();

        for name in [NUM_OF_REQUESTS, JUPYTER_KERNEL_BUSYNESS] {
            let handler = factory.create(name, &ctx).unwrap();
            assert_eq!(handler.metric_name().as_str(), name);
        }
    }

    #[test]
    fn test_unknown_name_is_error() {
        let factory = HandlerFactory::with_defaults();
        let err = factory.create("gpu_utilization", &context()).err().unwrap();
        assert!(matches!(err, HandlerError::UnknownMetricName(ref n) if n == "gpu_utilization"));

        assert!(HandlerFactory::new().create(NUM_OF_REQUESTS, &context()).is_err());
    }

    #[test]
    fn test_constructor_failure_is_propagated() {
        let factory = HandlerFactory::with_defaults();
        let mut ctx = context();
        ctx.forward_addr = "http://127.0.0.1:8888".to_string();

        let err = factory.create(JUPYTER_KERNEL_BUSYNESS, &ctx).err().unwrap();
        assert!(matches!(err, HandlerError::InvalidForwardAddress { .. }));
    }

    #[test]
    fn test_register_custom_handler() {
        let mut factory = HandlerFactory::new();
        factory.register("custom_busyness", |name, ctx| {
            Ok(Arc::new(JupyterKernelBusynessHandler::new(
                name,
                ctx.labels.clone(),
                &ctx.forward_addr,
                Duration::from_secs(1),
            )?) as Arc<dyn MetricsHandler>)
        });

        assert!(factory.contains("custom_busyness"));
        let handler = factory.create("custom_busyness", &context()).unwrap();
        assert_eq!(handler.metric_name().as_str(), "custom_busyness");
    }
}
