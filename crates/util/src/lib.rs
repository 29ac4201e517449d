//! Shared helpers for the Conduit gateway: masking, canonical JSON, crypto,
//! path templates, secret retrieval, response parsing and date handling.

pub mod canonical;
pub mod crypto;
pub mod date_handling;
pub mod masking;
pub mod path_processing;
pub mod path_template;
pub mod response;
pub mod retention;
pub mod secrets;
pub mod value;

pub use canonical::{canonical_body, canonical_json};
pub use masking::{DEFAULT_MASK_TOKEN, Masker, mask_for_diagnostics};
pub use path_processing::{expand_tilde, path_from_env_or};
pub use retention::{Retention, RetentionParseError};
pub use secrets::{KeychainSecretStore, SecretError, SecretStore, SecretsBackend, StaticSecretStore, resolve_reference};
pub use value::{has_meaningful_value, is_truthy, render_plain};
