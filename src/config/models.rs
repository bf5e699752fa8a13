//! Configuration data structures for the sidecar.
//!
//! These types map directly to an optional settings file (TOML / JSON / YAML) and are
//! overlaid with command line flags and environment variables at startup. Defaults keep
//! a minimal deployment down to `forward_addr` plus one metric name.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Default interval between two polls of the backend kernels endpoint.
pub const DEFAULT_KERNEL_POLL_INTERVAL_SECS: u64 = 5;

/// Default interval between two reads of the liveness marker file.
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 10;

/// Default location of the liveness marker file.
pub const DEFAULT_LIVENESS_MARKER_PATH: &str = "/tmp/sidecar-proxy/connection_alive";

/// Resolve a configured listen address into something the listener can bind.
///
/// A bare `:port` listens on every interface, like `0.0.0.0:port`. Anything else is
/// returned trimmed and may still name a host (`localhost:8080`).
pub fn listen_bind_address(listen_addr: &str) -> String {
    let listen_addr = listen_addr.trim();
    match listen_addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => listen_addr.to_string(),
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_kernel_poll_interval_secs() -> u64 {
    DEFAULT_KERNEL_POLL_INTERVAL_SECS
}

/// Output format of the process logger.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "console" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}' (expected json or pretty)")),
        }
    }
}

/// The `{namespace, service_name, instance_name}` triple attached to every observation.
///
/// Fixed at startup and identical for every collector in the process.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct LabelSet {
    pub namespace: String,
    pub service_name: String,
    pub instance_name: String,
}

impl LabelSet {
    /// Label names in registration order.
    pub const NAMES: [&'static str; 3] = ["namespace", "service_name", "instance_name"];

    pub fn new(
        namespace: impl Into<String>,
        service_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service_name: service_name.into(),
            instance_name: instance_name.into(),
        }
    }

    /// Label values in the same order as [`LabelSet::NAMES`].
    pub fn values(&self) -> [&str; 3] {
        [&self.namespace, &self.service_name, &self.instance_name]
    }
}

/// Settings of the liveness monitor folded into the request counter.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LivenessConfig {
    /// Marker file written by the auxiliary connection owner
    pub marker_path: PathBuf,
    /// Seconds between two reads of the marker file
    pub interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            marker_path: PathBuf::from(DEFAULT_LIVENESS_MARKER_PATH),
            interval_secs: DEFAULT_LIVENESS_INTERVAL_SECS,
        }
    }
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Complete sidecar configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    /// Address the proxy and the metrics endpoint listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// `host:port` of the co-located backend, without a scheme
    #[serde(default)]
    pub forward_addr: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Metric handlers to run; `num_of_requests` is always added
    #[serde(default)]
    pub metric_names: Vec<String>,
    #[serde(default = "default_kernel_poll_interval_secs")]
    pub kernel_poll_interval_secs: u64,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            forward_addr: String::new(),
            namespace: String::new(),
            service_name: String::new(),
            instance_name: String::new(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metric_names: Vec::new(),
            kernel_poll_interval_secs: DEFAULT_KERNEL_POLL_INTERVAL_SECS,
            liveness: LivenessConfig::default(),
        }
    }
}

impl SidecarConfig {
    pub fn labels(&self) -> LabelSet {
        LabelSet::new(&self.namespace, &self.service_name, &self.instance_name)
    }

    pub fn kernel_poll_interval(&self) -> Duration {
        Duration::from_secs(self.kernel_poll_interval_secs)
    }

    /// Overlay values coming from flags or the environment on top of this configuration.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(v) = overrides.listen_addr {
            self.listen_addr = v;
        }
        if let Some(v) = overrides.forward_addr {
            self.forward_addr = v;
        }
        if let Some(v) = overrides.namespace {
            self.namespace = v;
        }
        if let Some(v) = overrides.service_name {
            self.service_name = v;
        }
        if let Some(v) = overrides.instance_name {
            self.instance_name = v;
        }
        if let Some(v) = overrides.log_level {
            if !v.trim().is_empty() {
                self.log_level = v;
            }
        }
        if let Some(v) = overrides.log_format {
            self.log_format = v;
        }
        if !overrides.metric_names.is_empty() {
            self.metric_names = overrides
                .metric_names
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
        }
        if let Some(v) = overrides.kernel_poll_interval_secs {
            self.kernel_poll_interval_secs = v;
        }
        if let Some(v) = overrides.liveness_marker_path {
            self.liveness.marker_path = v;
        }
        if let Some(v) = overrides.liveness_interval_secs {
            self.liveness.interval_secs = v;
        }
    }
}

/// Values that take precedence over the settings file. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen_addr: Option<String>,
    pub forward_addr: Option<String>,
    pub namespace: Option<String>,
    pub service_name: Option<String>,
    pub instance_name: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub metric_names: Vec<String>,
    pub kernel_poll_interval_secs: Option<u64>,
    pub liveness_marker_path: Option<PathBuf>,
    pub liveness_interval_secs: Option<u64>,
}
