//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Addresses and URLs parse
//! - Value ranges (timeouts > 0, poll interval below its deadline)
//! - Approval ceiling is a positive integer
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use alloy::primitives::{Address, U256};

use crate::config::schema::ClientConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a deserialized configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.network.chain_id == 0 {
        errors.push(ValidationError::new("network.chain_id", "must be non-zero"));
    }
    if config.network.rpc_urls.is_empty() {
        errors.push(ValidationError::new(
            "network.rpc_urls",
            "at least one RPC url must be advertised to the wallet",
        ));
    }
    for url in config
        .network
        .rpc_urls
        .iter()
        .chain(&config.network.block_explorer_urls)
    {
        if url.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                "network",
                format!("invalid url '{}'", url),
            ));
        }
    }

    if config.rpc.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::new(
            "rpc.rpc_url",
            format!("invalid url '{}'", config.rpc.rpc_url),
        ));
    }
    if config.rpc.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("rpc.rpc_timeout_secs", "must be > 0"));
    }
    if config.rpc.chain_poll_interval_ms == 0 {
        errors.push(ValidationError::new("rpc.chain_poll_interval_ms", "must be > 0"));
    }

    let addresses = [
        ("contracts.sale_address", &config.contracts.sale_address),
        ("contracts.stablecoin_address", &config.contracts.stablecoin_address),
        ("contracts.token_address", &config.contracts.token_address),
    ];
    for (field, value) in addresses {
        match value.parse::<Address>() {
            Ok(address) if address == Address::ZERO => {
                errors.push(ValidationError::new(field, "must not be the zero address"));
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(
                field,
                format!("invalid address '{}': {}", value, e),
            )),
        }
    }

    match U256::from_str_radix(&config.purchase.approval_ceiling, 10) {
        Ok(ceiling) if ceiling.is_zero() => {
            errors.push(ValidationError::new("purchase.approval_ceiling", "must be > 0"));
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::new(
            "purchase.approval_ceiling",
            format!("'{}' is not a decimal integer", config.purchase.approval_ceiling),
        )),
    }

    let purchase = &config.purchase;
    if purchase.confirmation_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "purchase.confirmation_timeout_secs",
            "must be > 0",
        ));
    }
    if purchase.receipt_poll_interval_ms == 0
        || purchase.receipt_poll_interval_ms >= purchase.confirmation_timeout_secs * 1000
    {
        errors.push(ValidationError::new(
            "purchase.receipt_poll_interval_ms",
            "must be > 0 and below the confirmation timeout",
        ));
    }

    let fiat = &config.fiat;
    if fiat.settlement_timeout_secs == 0 {
        errors.push(ValidationError::new("fiat.settlement_timeout_secs", "must be > 0"));
    }
    if fiat.poll_base_ms == 0 || fiat.poll_base_ms > fiat.poll_max_ms {
        errors.push(ValidationError::new(
            "fiat.poll_base_ms",
            "must be > 0 and not above fiat.poll_max_ms",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
