//! Registry crate for loading and validating Conduit provider catalogs.
//!
//! This crate owns the on-disk shape of the gateway: where the gateway
//! configuration and catalog live, how provider documents are read from
//! YAML/JSON files, and the structural checks a catalog must pass before the
//! engine compiles it.

pub mod catalog_io;
pub mod config;
pub mod validation;

pub use catalog_io::{catalog_from_value, load_catalog, parse_catalog_str};
pub use config::{GatewayConfig, default_config_path};
pub use validation::{ValidationError, validate_catalog, validate_provider};
