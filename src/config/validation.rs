use std::{net::SocketAddr, path::Path};

use http::HeaderValue;

use crate::config::models::{ForwardConfig, LoggingConfig, RelayConfig, ServerConfig, TlsConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Upper bound for the reconnect delay.
const MAX_RETRY_DELAY_MS: u64 = 10 * 60 * 1000;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_tls_config(&config.tls) {
            errors.push(e);
        }

        errors.extend(Self::validate_relay_config(&config.relay));
        errors.extend(Self::validate_forward_config(&config.forward));

        if let Err(e) = Self::validate_logging_config(&config.logging) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate TLS configuration
    fn validate_tls_config(config: &TlsConfig) -> ValidationResult<()> {
        if !config.enabled {
            return Ok(());
        }

        if !Path::new(&config.cert_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Certificate file does not exist: {}", config.cert_path),
            });
        }

        if !Path::new(&config.key_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Private key file does not exist: {}", config.key_path),
            });
        }

        Ok(())
    }

    fn validate_relay_config(config: &RelayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if config.retry_delay_ms > MAX_RETRY_DELAY_MS {
            errors.push(ValidationError::InvalidField {
                field: "relay.retry_delay_ms".to_string(),
                message: format!("Must not exceed {MAX_RETRY_DELAY_MS}ms"),
            });
        }

        if config.max_retries > 0 && config.retry_delay_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "relay.retry_delay_ms".to_string(),
                message: "Must be greater than 0 when reconnects are enabled".to_string(),
            });
        }

        errors
    }

    fn validate_forward_config(config: &ForwardConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if config.user_agent.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "forward.user_agent".to_string(),
                message: "User agent cannot be empty".to_string(),
            });
        } else if HeaderValue::from_str(&config.user_agent).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "forward.user_agent".to_string(),
                message: "User agent is not a valid header value".to_string(),
            });
        }

        if config.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "forward.timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        errors
    }

    fn validate_logging_config(config: &LoggingConfig) -> ValidationResult<()> {
        if config.level.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: "Log level cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
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
