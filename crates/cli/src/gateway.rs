//! Wires configuration, catalog, secrets, transport and audit store together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use conduit_api::ReqwestTransport;
use conduit_audit::JsonlAuditStore;
use conduit_engine::{Catalog, CatalogStore, DispatchPipeline, PipelineOptions, ReplayEngine};
use conduit_registry::{GatewayConfig, default_config_path, load_catalog};
use tracing::debug;

pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    debug!(path = %path.display(), "loading gateway configuration");
    GatewayConfig::load_from_path(&path)
}

pub async fn open_audit(config: &GatewayConfig) -> Result<Arc<JsonlAuditStore>> {
    let dir = config.audit_dir();
    let store = JsonlAuditStore::open(dir.clone())
        .await
        .with_context(|| format!("open audit store at {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// Loads and compiles the catalog at `path`, or at the configured location.
pub fn compile_catalog(config: &GatewayConfig, path: Option<PathBuf>) -> Result<(PathBuf, Catalog)> {
    let path = path.unwrap_or_else(|| config.catalog_path());
    let document = load_catalog(&path)?;
    let catalog = Catalog::compile(&document).with_context(|| format!("compile catalog {}", path.display()))?;
    Ok((path, catalog))
}

/// Everything a dispatch or replay needs.
#[derive(Debug, Clone)]
pub struct Gateway {
    pub config: GatewayConfig,
    pub pipeline: DispatchPipeline,
}

impl Gateway {
    pub async fn open(config: GatewayConfig) -> Result<Self> {
        let (_, catalog) = compile_catalog(&config, None)?;
        let audit = open_audit(&config).await?;
        let transport = ReqwestTransport::new()?;
        let options = PipelineOptions {
            mask_token: config.mask_token.clone(),
            sensitive_fields: config.sensitive_fields.clone(),
        };
        let pipeline = DispatchPipeline::with_options(
            Arc::new(CatalogStore::new(catalog)),
            config.secrets_backend().store(),
            Arc::new(transport),
            audit,
            options,
        );
        Ok(Self { config, pipeline })
    }

    pub fn replay_engine(&self) -> ReplayEngine {
        ReplayEngine::new(self.pipeline.clone())
    }
}
