use eyre::{Result, WrapErr, eyre};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Map a configured level onto an `EnvFilter` directive.
///
/// Accepts the plain `trace|debug|info|warn|error` levels, the `warning`, `fatal` and
/// `panic` aliases used by older deployments, and full filter directives such as
/// `info,sidecar_proxy=debug`. A blank value means `info`.
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    match level.to_ascii_lowercase().as_str() {
        "" => "info".to_string(),
        "warning" => "warn".to_string(),
        "fatal" | "panic" => "error".to_string(),
        "trace" | "debug" | "info" | "warn" | "error" | "off" => level.to_ascii_lowercase(),
        _ => level.to_string(),
    }
}

/// Whether `directive` is a plain level rather than a target or span filter
fn is_bare_word(directive: &str) -> bool {
    !directive.contains(['=', ',', '['])
}

/// Build the filter for a configured level, rejecting anything unparseable.
///
/// A bare word must be one of the known levels. Otherwise `EnvFilter` would read a
/// mistyped level such as `inf` as a target name and silence everything else.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let directive = filter_directive(level);
    if is_bare_word(&directive)
        && !matches!(
            directive.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        )
    {
        return Err(eyre!(
            "Invalid log level: {level} (expected trace, debug, info, warn or error)"
        ));
    }
    EnvFilter::builder()
        .parse(&directive)
        .wrap_err_with(|| format!("Invalid log level: {level}"))
}

/// Initialize the process logger.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = build_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!(level = %filter_directive(level), ?format, "Logging initialized");
    Ok(())
}

/// Span wrapping the background work of one metric handler
pub fn handler_span(metric_name: &str) -> tracing::Span {
    tracing::info_span!("handler", handler = metric_name)
}
