use eyre::Result;
use http::uri::Authority;

use crate::config::models::{SidecarConfig, listen_bind_address};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid forward address '{address}': {reason}")]
    InvalidForwardAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Sidecar configuration validator
pub struct SidecarConfigValidator;

impl SidecarConfigValidator {
    /// Validate the entire sidecar configuration, reporting every violation at once
    pub fn validate(config: &SidecarConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_forward_address(&config.forward_addr) {
            errors.push(e);
        }

        if config.metric_names.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "metric_names (at least one metric name should be given)".to_string(),
            });
        }

        if config.kernel_poll_interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "kernel_poll_interval_secs".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if config.liveness.interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "liveness.interval_secs".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if config.liveness.marker_path.as_os_str().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "liveness.marker_path".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format: `host:port`, `IP:PORT` or a bare `:port`
    pub fn validate_listen_address(address: &str) -> ValidationResult<()> {
        let invalid = |reason: String| ValidationError::InvalidListenAddress {
            address: address.to_string(),
            reason,
        };
        let bind = listen_bind_address(address);
        if bind.contains("://") || bind.contains('/') {
            return Err(invalid(
                "Must not include a scheme or path (e.g., ':8080' or '0.0.0.0:8080')".to_string(),
            ));
        }

        let authority = bind
            .parse::<Authority>()
            .map_err(|e| invalid(format!("Not a valid host:port ({e})")))?;
        if authority.as_str().contains('@') {
            return Err(invalid("Must not include user info".to_string()));
        }
        if authority.host().is_empty() || authority.port_u16().is_none() {
            return Err(invalid(
                "Must be in format 'HOST:PORT' or ':PORT' (e.g., ':8080' or '127.0.0.1:3000')"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Validate that the forward address is a bare `host:port`
    pub fn validate_forward_address(address: &str) -> ValidationResult<()> {
        let invalid = |reason: &str| ValidationError::InvalidForwardAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if address.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "forward_addr".to_string(),
            });
        }
        if address.contains("://") {
            return Err(invalid("Must not include a scheme (e.g., '127.0.0.1:8888')"));
        }

        let authority = address
            .parse::<Authority>()
            .map_err(|e| invalid(&format!("Not a valid host:port ({e})")))?;
        if authority.as_str().contains('@') {
            return Err(invalid("Must not include user info"));
        }
        if authority.port_u16().is_none() {
            return Err(invalid("Must include a port"));
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
