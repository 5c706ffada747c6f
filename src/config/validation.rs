//! Configuration validation.
//!
//! Returns all validation errors, not just the first.

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;
use crate::net::prefix::Prefix;

/// A single semantic problem in a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A listener prefix could not be parsed.
    InvalidPrefix { prefix: String, reason: String },
    /// An `https` prefix is configured without `[listener.tls]`.
    TlsRequired { prefix: String },
    /// TLS paths are present but empty.
    EmptyTlsPath,
    /// `observability.metrics_address` is not a socket address.
    InvalidMetricsAddress(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidPrefix { prefix, reason } => {
                write!(f, "invalid prefix '{}': {}", prefix, reason)
            }
            ValidationError::TlsRequired { prefix } => {
                write!(f, "prefix '{}' needs [listener.tls]", prefix)
            }
            ValidationError::EmptyTlsPath => write!(f, "TLS cert_path and key_path must be set"),
            ValidationError::InvalidMetricsAddress(addr) => {
                write!(f, "invalid metrics address '{}'", addr)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for raw in &config.listener.prefixes {
        match Prefix::parse(raw) {
            Ok(prefix) if prefix.is_secure() && config.listener.tls.is_none() => {
                errors.push(ValidationError::TlsRequired { prefix: raw.clone() });
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidPrefix {
                prefix: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath);
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
