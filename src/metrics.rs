//! Metrics registry shared by every metric handler.
//!
//! A thin wrapper around a `prometheus::Registry`. Handlers register one labeled
//! counter or gauge family each, keyed by their metric name, and the server renders
//! the whole registry in the text exposition format on `GET /metrics`.
//!
//! Registering a second family under an existing name fails with
//! [`MetricsError::AlreadyRegistered`]; the server treats that as a fatal
//! configuration error.
use prometheus::{
    Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder, core::Collector,
};
use thiserror::Error;

use crate::config::LabelSet;

/// Errors raised by the metrics registry
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricsError {
    /// A metric with the same name is already part of the registry
    #[error("Metric '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// The metric definition was rejected (invalid name, label mismatch ...)
    #[error("Failed to register metric '{name}': {source}")]
    Registration {
        name: String,
        #[source]
        source: prometheus::Error,
    },

    /// Rendering the exposition text failed
    #[error("Failed to encode metrics: {0}")]
    Encode(#[source] prometheus::Error),
}

/// Result type alias for registry operations
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Process-wide metrics registry. Cloning shares the underlying registry.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    registry: Registry,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter family labeled by the [`LabelSet`] dimensions.
    pub fn register_counter(&self, name: &str, help: &str) -> MetricsResult<IntCounterVec> {
        let counter = IntCounterVec::new(Opts::new(name, help), &LabelSet::NAMES).map_err(
            |source| MetricsError::Registration {
                name: name.to_string(),
                source,
            },
        )?;
        self.register(name, counter)
    }

    /// Register a gauge family labeled by the [`LabelSet`] dimensions.
    pub fn register_gauge(&self, name: &str, help: &str) -> MetricsResult<GaugeVec> {
        let gauge = GaugeVec::new(Opts::new(name, help), &LabelSet::NAMES).map_err(|source| {
            MetricsError::Registration {
                name: name.to_string(),
                source,
            }
        })?;
        self.register(name, gauge)
    }

    fn register<C>(&self, name: &str, collector: C) -> MetricsResult<C>
    where
        C: Collector + Clone + 'static,
    {
        match self.registry.register(Box::new(collector.clone())) {
            Ok(()) => Ok(collector),
            Err(prometheus::Error::AlreadyReg) => Err(MetricsError::AlreadyRegistered {
                name: name.to_string(),
            }),
            Err(source) => Err(MetricsError::Registration {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Render every registered family in the Prometheus text format.
    ///
    /// Returns the encoded body together with its content type.
    pub fn encode(&self) -> MetricsResult<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(MetricsError::Encode)?;
        Ok((buffer, encoder.format_type().to_string()))
    }

    /// Access the underlying prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
