use std::path::PathBuf;

use dirs_next::{config_dir, data_dir, home_dir};

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        Some(rest) => home().join(rest),
        None => PathBuf::from(trimmed),
    }
}

/// `<config_dir>/conduit`, falling back to the working directory.
pub fn conduit_config_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("conduit")
}

/// `<data_dir>/conduit`, falling back to the working directory.
pub fn conduit_data_dir() -> PathBuf {
    data_dir().unwrap_or_else(|| PathBuf::from(".")).join("conduit")
}

/// Resolves a path from an environment override or falls back to `default`.
/// Overrides are trimmed, tilde expanded, and ignored when blank.
pub fn path_from_env_or(var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    match std::env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => expand_tilde(&raw),
        _ => default(),
    }
}
