//! Recurring integrations: stored harvest configurations bound to a dataset,
//! with a tracked run history.
//!
//! ```text
//! PENDING --start--> RUNNING --complete--> COMPLETED
//! PENDING | RUNNING --fail-->   FAILED
//! PENDING | RUNNING --cancel--> CANCELLED
//! ```

pub mod model;
pub mod run;
pub mod service;

pub use model::{
    DataIntegration, HarvestSpec, IntegrationStatus, IntegrationUpdate, NewIntegration,
    ProcessingConfig,
};
pub use run::{IntegrationJob, RecordCounters, RunEvent, RunResult, RunStatus};
pub use service::{IntegrationService, RunPolicy};
