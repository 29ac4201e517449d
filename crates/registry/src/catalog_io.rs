//! Reading provider catalog documents from disk.
//!
//! A catalog location is either a single file holding `{ providers: [...] }`
//! or a directory whose `*.yaml`, `*.yml` and `*.json` files each hold either
//! a full catalog or one provider document. Directory entries are read in
//! file-name order so the resulting provider order is stable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use conduit_types::{CatalogDocument, ProviderDocument};
use serde_json::Value;
use tracing::debug;

use crate::config::is_json_path;

/// Loads every provider document found at `path`.
pub fn load_catalog(path: &Path) -> Result<CatalogDocument> {
    if path.is_dir() {
        return load_catalog_dir(path);
    }
    if !path.exists() {
        bail!("catalog not found at {}", path.display());
    }
    let content = fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
    parse_catalog_file(&content, path)
}

fn load_catalog_dir(dir: &Path) -> Result<CatalogDocument> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read catalog directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && is_catalog_file(path))
        .collect();
    files.sort();

    let mut catalog = CatalogDocument::default();
    for file in files {
        let content = fs::read_to_string(&file).with_context(|| format!("read catalog file {}", file.display()))?;
        let mut part = parse_catalog_file(&content, &file)?;
        debug!(file = %file.display(), providers = part.providers.len(), "loaded catalog file");
        catalog.providers.append(&mut part.providers);
    }
    Ok(catalog)
}

fn is_catalog_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml" | "json"))
}

fn parse_catalog_file(content: &str, path: &Path) -> Result<CatalogDocument> {
    let raw: Value = if is_json_path(path) {
        serde_json::from_str(content).with_context(|| format!("parse JSON catalog {}", path.display()))?
    } else {
        serde_yaml::from_str(content).with_context(|| format!("parse YAML catalog {}", path.display()))?
    };
    catalog_from_value(raw).with_context(|| format!("decode catalog {}", path.display()))
}

/// Accepts either a `{ providers: [...] }` document or a single provider document.
pub fn catalog_from_value(raw: Value) -> Result<CatalogDocument> {
    let (is_catalog, is_provider) = match &raw {
        Value::Object(map) => (map.contains_key("providers"), map.contains_key("slug")),
        Value::Null => return Ok(CatalogDocument::default()),
        _ => (false, false),
    };
    if is_catalog {
        return Ok(serde_json::from_value(raw)?);
    }
    if is_provider {
        let provider: ProviderDocument = serde_json::from_value(raw)?;
        return Ok(CatalogDocument {
            providers: vec![provider],
        });
    }
    bail!("expected a catalog with 'providers' or a single provider document with 'slug'")
}

/// Parses catalog text, sniffing JSON by its leading brace.
pub fn parse_catalog_str(content: &str) -> Result<CatalogDocument> {
    let trimmed = content.trim_start();
    let raw: Value = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(content).context("parse JSON catalog")?
    } else {
        serde_yaml::from_str(content).context("parse YAML catalog")?
    };
    catalog_from_value(raw)
}
