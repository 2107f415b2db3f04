//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect duplicate module declarations
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

const WITH_DEFAULTS_MODES: [&str; 4] = ["report-all", "report-all-tagged", "trim", "explicit"];

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("lifecycle.restart_backoff_max_ms ({max}) is below restart_backoff_base_ms ({base})")]
    BackoffRange { base: u64, max: u64 },

    #[error("store.modules: module {0:?} declared more than once")]
    DuplicateModule(String),

    #[error("store.modules: module name must not be empty")]
    EmptyModuleName,

    #[error("with_defaults: unknown mode {0:?}")]
    UnknownWithDefaultsMode(String),

    #[error("observability.log_level: unknown level {0:?}")]
    UnknownLogLevel(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.hello_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "listener.hello_timeout_secs" });
    }
    if config.listener.max_message_bytes == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_message_bytes" });
    }

    let polling = &config.polling;
    for (field, value) in [
        ("polling.accept_timeout_ms", polling.accept_timeout_ms),
        ("polling.poll_timeout_ms", polling.poll_timeout_ms),
        ("polling.idle_backoff_ms", polling.idle_backoff_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let lifecycle = &config.lifecycle;
    if lifecycle.restart_backoff_base_ms == 0 {
        errors.push(ValidationError::Zero { field: "lifecycle.restart_backoff_base_ms" });
    }
    if lifecycle.restart_backoff_max_ms < lifecycle.restart_backoff_base_ms {
        errors.push(ValidationError::BackoffRange {
            base: lifecycle.restart_backoff_base_ms,
            max: lifecycle.restart_backoff_max_ms,
        });
    }
    if lifecycle.max_consecutive_failures == 0 {
        errors.push(ValidationError::Zero { field: "lifecycle.max_consecutive_failures" });
    }

    let mut seen = HashSet::new();
    for module in &config.store.modules {
        if module.name.is_empty() {
            errors.push(ValidationError::EmptyModuleName);
        } else if !seen.insert(module.name.as_str()) {
            errors.push(ValidationError::DuplicateModule(module.name.clone()));
        }
    }

    let with_defaults = &config.with_defaults;
    for mode in std::iter::once(&with_defaults.basic_mode).chain(&with_defaults.also_supported) {
        if !WITH_DEFAULTS_MODES.contains(&mode.as_str()) {
            errors.push(ValidationError::UnknownWithDefaultsMode(mode.clone()));
        }
    }

    let observability = &config.observability;
    if observability.log_level.parse::<tracing::Level>().is_err() {
        errors.push(ValidationError::UnknownLogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SchemaInfo;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.polling.poll_timeout_ms = 0;
        config.lifecycle.restart_backoff_max_ms = 10;
        config.with_defaults.basic_mode = "sometimes".into();
        let module = SchemaInfo { name: "acme-system".into(), revision: None, rpcs: Vec::new() };
        config.store.modules = vec![module.clone(), module];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::Zero { field: "polling.poll_timeout_ms" }));
        assert!(errors.contains(&ValidationError::DuplicateModule("acme-system".into())));
        assert!(errors.contains(&ValidationError::BackoffRange { base: 100, max: 10 }));
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(validate_config(&config).unwrap_err().len(), 1);
    }
}
