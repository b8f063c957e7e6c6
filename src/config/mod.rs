//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed by value to the ledger client and purchase components
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; one deployment targets one chain and one sale
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Private keys are never part of the config file

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::ClientConfig;
pub use schema::ContractsConfig;
pub use schema::FiatConfig;
pub use schema::NetworkConfig;
pub use schema::ObservabilityConfig;
pub use schema::PurchaseConfig;
pub use schema::RpcConfig;
pub use validation::{validate_config, ValidationError};
