//! Source-type keyed registry selecting the harvester for a job.
//!
//! Adding a source type is a new [`Harvester`] implementation plus one
//! [`HarvesterRegistry::register`] call; callers only ever go through
//! [`HarvesterRegistry::dispatch`].

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::HarvesterConfig;
use crate::harvest::sources::{ApiHarvester, FileHarvester, WebHarvester};
use crate::harvest::traits::{HarvestError, Harvester};
use crate::model::{ConfigMap, HarvestedData, SourceType};

#[derive(Clone, Default)]
pub struct HarvesterRegistry {
    harvesters: HashMap<SourceType, Arc<dyn Harvester>>,
}

impl std::fmt::Debug for HarvesterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvesterRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}

impl HarvesterRegistry {
    /// An empty registry; every dispatch fails until something is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in file, API and web harvesters.
    pub fn with_defaults(config: &HarvesterConfig) -> Result<Self, HarvestError> {
        let registry = Self::new()
            .with(Arc::new(FileHarvester::new(config.schema_sample_size)))
            .with(Arc::new(ApiHarvester::new(config)?))
            .with(Arc::new(WebHarvester::new(config)?));
        info!(source_types = ?registry.source_types(), "Harvester registry initialized");
        Ok(registry)
    }

    /// Registers `harvester` under its own source type, returning the one it replaced.
    pub fn register(&mut self, harvester: Arc<dyn Harvester>) -> Option<Arc<dyn Harvester>> {
        self.harvesters.insert(harvester.source_type(), harvester)
    }

    pub fn with(mut self, harvester: Arc<dyn Harvester>) -> Self {
        self.register(harvester);
        self
    }

    pub fn supports(&self, source_type: SourceType) -> bool {
        self.harvesters.contains_key(&source_type)
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        SourceType::ALL
            .into_iter()
            .filter(|t| self.supports(*t))
            .collect()
    }

    /// Resolves the type tag and harvests. An unrecognized tag fails before
    /// any I/O happens.
    pub async fn dispatch(
        &self,
        source_type: &str,
        config: &ConfigMap,
    ) -> Result<HarvestedData, HarvestError> {
        let source_type: SourceType = source_type.parse()?;
        self.dispatch_typed(source_type, config).await
    }

    pub async fn dispatch_typed(
        &self,
        source_type: SourceType,
        config: &ConfigMap,
    ) -> Result<HarvestedData, HarvestError> {
        let harvester = self
            .harvesters
            .get(&source_type)
            .ok_or(HarvestError::NotRegistered(source_type))?;
        debug!(%source_type, "Dispatching harvest");
        harvester.harvest(config).await
    }
}
