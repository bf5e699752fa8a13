use std::path::PathBuf;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use sidecar_proxy::{
    GracefulShutdown, HandlerContext, HandlerFactory, SidecarServer,
    config::{ConfigOverrides, LogFormat, SidecarConfig, SidecarConfigValidator, load_config},
    tracing_setup,
    utils::ShutdownReason,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Optional settings file (YAML, JSON or TOML); flags and environment override it
    #[clap(long, env = "PROXY_CONFIG_FILE")]
    config: Option<String>,

    /// Address to listen on: `:PORT`, `HOST:PORT` or `IP:PORT`
    #[clap(long = "listen-addr", env = "PROXY_LISTEN_ADDRESS")]
    listen_addr: Option<String>,

    /// IP /w port to forward to (without protocol)
    #[clap(long = "forward-addr", env = "PROXY_FORWARD_ADDRESS")]
    forward_addr: Option<String>,

    /// Kubernetes namespace
    #[clap(long, env = "PROXY_NAMESPACE")]
    namespace: Option<String>,

    /// Service which the proxy serves
    #[clap(long = "service-name", env = "PROXY_SERVICE_NAME")]
    service_name: Option<String>,

    /// Deployment instance name
    #[clap(long = "instance-name", env = "PROXY_INSTANCE_NAME")]
    instance_name: Option<String>,

    /// Log level or filter directive
    #[clap(long = "log-level", env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format: json or pretty
    #[clap(long = "log-format", env = "LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Metric to collect; repeat the flag for several metrics
    #[clap(long = "metric-name", env = "PROXY_METRIC_NAMES", value_delimiter = ',')]
    metric_names: Vec<String>,

    /// Seconds between two polls of the backend kernels endpoint
    #[clap(long = "kernel-poll-interval-secs", env = "PROXY_KERNEL_POLL_INTERVAL_SECS")]
    kernel_poll_interval_secs: Option<u64>,

    /// Seconds between two reads of the liveness marker
    #[clap(long = "liveness-interval-secs", env = "PROXY_LIVENESS_INTERVAL_SECS")]
    liveness_interval_secs: Option<u64>,

    /// Marker file reporting the auxiliary connection state
    #[clap(long = "liveness-marker-path", env = "PROXY_LIVENESS_MARKER_PATH")]
    liveness_marker_path: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the effective configuration and exit
    Validate,
    /// Start the sidecar (default)
    Serve,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen_addr: self.listen_addr.clone(),
            forward_addr: self.forward_addr.clone(),
            namespace: self.namespace.clone(),
            service_name: self.service_name.clone(),
            instance_name: self.instance_name.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format,
            metric_names: self.metric_names.clone(),
            kernel_poll_interval_secs: self.kernel_poll_interval_secs,
            liveness_marker_path: self.liveness_marker_path.clone(),
            liveness_interval_secs: self.liveness_interval_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config = load_config(args.config.as_deref(), args.overrides())
        .context("Failed to load configuration")?;

    match args.command {
        Some(Commands::Validate) => validate_config_command(&config),
        Some(Commands::Serve) | None => serve(config).await,
    }
}

async fn serve(config: SidecarConfig) -> Result<()> {
    tracing_setup::init_tracing(&config.log_level, config.log_format)
        .context("Failed to parse log level")?;

    SidecarConfigValidator::validate(&config).map_err(|e| eyre!("{e}"))?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        forward_addr = %config.forward_addr,
        namespace = %config.namespace,
        service_name = %config.service_name,
        instance_name = %config.instance_name,
        metric_names = ?config.metric_names,
        "Starting sidecar proxy"
    );

    let shutdown = GracefulShutdown::new();
    let server = SidecarServer::new(
        &config.metric_names,
        &HandlerFactory::with_defaults(),
        &HandlerContext::from_config(&config),
        shutdown.token(),
    )
    .context("Failed to create new server")?;

    let signal_handler = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await })
    };

    let result = server.bind_and_run().await.context("Failed to start server");

    // The server can stop without a signal (bind failure); stop the handlers too
    if !shutdown.is_shutdown_initiated() {
        shutdown.trigger_shutdown(ShutdownReason::Manual);
    }
    if let Err(e) = signal_handler.await {
        tracing::warn!(error = %e, "Signal handler task failed");
    }
    result
}

fn validate_config_command(config: &SidecarConfig) -> Result<()> {
    println!("Validating configuration");

    match SidecarConfigValidator::validate(config) {
        Ok(()) => {
            println!("Configuration validation: OK");
            println!("  Listen address:  {}", config.listen_addr);
            println!("  Forward address: {}", config.forward_addr);
            println!(
                "  Labels:          {}/{}/{}",
                config.namespace, config.service_name, config.instance_name
            );
            println!("  Metric names:    {}", config.metric_names.join(", "));
            println!(
                "  Liveness marker: {} (every {}s)",
                config.liveness.marker_path.display(),
                config.liveness.interval_secs
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
