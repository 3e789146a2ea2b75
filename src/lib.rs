pub mod catalog;
pub mod config;
pub mod executor;
pub mod harvest;
pub mod integration;
pub mod job;
pub mod memory;
pub mod model;
pub mod notify;
pub mod service;
pub mod traits;
pub mod use_cases;

// Re-export common types for convenience
pub use catalog::{CatalogError, DataSource, SourceCatalog};
pub use config::{init_tracing, ConfigError, HarvesterConfig};
pub use executor::*;
pub use harvest::{HarvestError, Harvester, HarvesterRegistry};
pub use integration::{
    DataIntegration, IntegrationJob, IntegrationService, IntegrationStatus, RunPolicy, RunStatus,
};
pub use job::{HarvestJob, JobStatus};
pub use model::*;
pub use notify::{BroadcastNotifier, JobNotification, TracingNotifier};
pub use service::HarvestService;
pub use traits::*;
pub use use_cases::*;
