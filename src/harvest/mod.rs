//! Harvest module - one fetch-and-normalize contract over heterogeneous sources.
//!
//! - **Traits**: [`Harvester`] implemented once per [`SourceType`](crate::SourceType)
//! - **Registry**: [`HarvesterRegistry`] dispatches a job's config to its variant
//! - **Schema**: best-effort column inference shared by all variants
//! - **Sources**: the file, API and web variants

pub mod registry;
pub mod schema;
pub mod sources;
pub mod traits;

pub use registry::HarvesterRegistry;
pub use schema::{infer_columns, DEFAULT_SAMPLE_SIZE};
pub use sources::{ApiHarvester, ExtractType, FileHarvester, FileType, WebHarvester};
pub use traits::{HarvestError, Harvester};
