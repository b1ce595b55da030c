use async_trait::async_trait;
use bgv_fhe::BgvEngine;
use observability::metrics::METRICS;
use observability::metrics_names::{OP_ENGINE_LOAD, TAG_ENGINE_SOURCE};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::ProvisioningError;

/// The handle shared by every user of a loaded engine.
pub type EngineHandle = Arc<BgvEngine>;

/// Performs one asynchronous instantiation of the engine.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn instantiate(&self) -> Result<BgvEngine, ProvisioningError>;

    /// Short label used in logs and metric tags.
    fn source_name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSource {
    /// Generate the modulus tables at startup.
    Builtin,
    /// Read the modulus tables from an engine asset file.
    Asset(PathBuf),
}

#[derive(Debug, Clone)]
pub struct BgvEngineLoader {
    source: EngineSource,
}

impl BgvEngineLoader {
    pub fn new(source: EngineSource) -> Self {
        Self { source }
    }

    pub fn builtin() -> Self {
        Self::new(EngineSource::Builtin)
    }
}

async fn run_blocking<F>(f: F) -> Result<BgvEngine, ProvisioningError>
where
    F: FnOnce() -> Result<BgvEngine, bgv_fhe::BgvError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProvisioningError::EngineLoad(format!("engine instantiation task failed: {e}")))?
        .map_err(|e| ProvisioningError::EngineLoad(e.to_string()))
}

#[async_trait]
impl EngineLoader for BgvEngineLoader {
    async fn instantiate(&self) -> Result<BgvEngine, ProvisioningError> {
        match &self.source {
            EngineSource::Builtin => run_blocking(BgvEngine::builtin).await,
            EngineSource::Asset(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    ProvisioningError::EngineLoad(format!(
                        "failed to read engine asset {}: {e}",
                        path.display()
                    ))
                })?;
                tracing::debug!(
                    "Read {} bytes of engine asset from {}",
                    bytes.len(),
                    path.display()
                );
                run_blocking(move || BgvEngine::from_bytes(&bytes)).await
            }
        }
    }

    fn source_name(&self) -> &'static str {
        match self.source {
            EngineSource::Builtin => "builtin",
            EngineSource::Asset(_) => "asset",
        }
    }
}

/// Loads the engine at most once and hands out clones of the same handle.
///
/// Concurrent callers of [`EngineRegistry::ensure_loaded`] wait for the
/// instantiation already in flight. A failed instantiation leaves the
/// registry empty, so a later call starts a new one.
pub struct EngineRegistry {
    loader: Box<dyn EngineLoader>,
    engine: OnceCell<EngineHandle>,
}

impl EngineRegistry {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            engine: OnceCell::new(),
        }
    }

    pub async fn ensure_loaded(&self) -> Result<EngineHandle, ProvisioningError> {
        self.engine
            .get_or_try_init(|| self.load())
            .await
            .cloned()
    }

    /// The engine, if it has been loaded.
    pub fn get(&self) -> Option<EngineHandle> {
        self.engine.get().cloned()
    }

    async fn load(&self) -> Result<EngineHandle, ProvisioningError> {
        let source = self.loader.source_name();
        tracing::info!("Loading BGV engine ({source})");
        let _timer = METRICS
            .time_operation(OP_ENGINE_LOAD)
            .and_then(|b| b.tag(TAG_ENGINE_SOURCE, source))
            .map(|b| b.start())
            .map_err(|e| tracing::warn!("Failed to start timer: {e}"))
            .ok();
        let _ = METRICS
            .increment_request_counter(OP_ENGINE_LOAD)
            .map_err(|e| tracing::warn!("Failed to increment request counter: {e}"));

        match self.loader.instantiate().await {
            Ok(engine) => {
                tracing::info!(
                    "BGV engine loaded with {} moduli",
                    engine.tables().primes.len()
                );
                Ok(Arc::new(engine))
            }
            Err(e) => {
                tracing::error!("Failed to load BGV engine: {e}");
                if let Err(e) = METRICS.increment_error_counter(OP_ENGINE_LOAD, e.metric_tag()) {
                    tracing::warn!("Failed to increment error counter: {e}");
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("source", &self.loader.source_name())
            .field("loaded", &self.engine.initialized())
            .finish()
    }
}
