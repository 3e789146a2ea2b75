//! Request-level entry points. Each use case validates its input and then
//! hands off to [`HarvestService`].

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::catalog::{DataSource, SourceCatalog};
use crate::job::HarvestJob;
use crate::model::{ConfigMap, SourceType, UnknownSourceType};
use crate::service::HarvestService;
use crate::traits::JobError;

// ============================================================================
// Create / process / status
// ============================================================================

pub struct CreateHarvestJobUseCase {
    service: Arc<HarvestService>,
    catalog: Arc<SourceCatalog>,
}

impl CreateHarvestJobUseCase {
    pub fn new(service: Arc<HarvestService>, catalog: Arc<SourceCatalog>) -> Self {
        Self { service, catalog }
    }

    /// Creates a PENDING job. With `source_id` the config is first checked
    /// against that catalog descriptor.
    #[instrument(skip(self, config))]
    pub async fn execute(
        &self,
        source_type: &str,
        config: ConfigMap,
        source_id: Option<&str>,
        job_id: Option<String>,
    ) -> Result<HarvestJob, JobError> {
        let parsed: SourceType = source_type
            .parse()
            .map_err(|e: UnknownSourceType| JobError::InvalidInput(e.to_string()))?;
        if let Some(source_id) = source_id {
            self.catalog
                .validate_config(source_id, parsed, &config)
                .map_err(|e| JobError::InvalidInput(e.to_string()))?;
            debug!(source_id, "Config matches catalog descriptor");
        }
        self.service.create(source_type, config, job_id).await
    }
}

pub struct ProcessHarvestJobUseCase {
    service: Arc<HarvestService>,
}

impl ProcessHarvestJobUseCase {
    pub fn new(service: Arc<HarvestService>) -> Self {
        Self { service }
    }

    /// Harvest failures come back as a FAILED job, not as `Err`.
    pub async fn execute(&self, job_id: &str) -> Result<HarvestJob, JobError> {
        self.service.process(job_id).await
    }
}

pub struct GetJobStatusUseCase {
    service: Arc<HarvestService>,
}

impl GetJobStatusUseCase {
    pub fn new(service: Arc<HarvestService>) -> Self {
        Self { service }
    }

    pub async fn execute(&self, job_id: &str) -> Result<HarvestJob, JobError> {
        self.service.get_status(job_id).await
    }
}

pub struct GetAvailableSourcesUseCase {
    catalog: Arc<SourceCatalog>,
}

impl GetAvailableSourcesUseCase {
    pub fn new(catalog: Arc<SourceCatalog>) -> Self {
        Self { catalog }
    }

    pub fn execute(&self, source_type: Option<SourceType>) -> Vec<DataSource> {
        match source_type {
            Some(source_type) => self
                .catalog
                .get_by_type(source_type)
                .into_iter()
                .cloned()
                .collect(),
            None => self.catalog.get_all().to_vec(),
        }
    }
}

// ============================================================================
// Upload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub filename: String,
    pub path: String,
    /// As supplied by the caller, before lowercasing
    #[serde(rename = "type")]
    pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub job_id: String,
    pub file_info: FileInfo,
    pub config: ConfigMap,
}

/// Turns a file already written by the upload handler into a file job.
pub struct UploadFileUseCase {
    service: Arc<HarvestService>,
    upload_dir: PathBuf,
}

impl UploadFileUseCase {
    const SUPPORTED: [&'static str; 2] = ["csv", "json"];

    pub fn new(service: Arc<HarvestService>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Creates the upload directory if it does not exist yet.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await
    }

    /// Where the upload handler should place `file_name`. Only the final
    /// path component is kept.
    pub fn destination(&self, file_name: &str) -> Option<PathBuf> {
        Path::new(file_name)
            .file_name()
            .map(|name| self.upload_dir.join(name))
    }

    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        file_path: &str,
        file_name: &str,
        file_type: &str,
        job_id: Option<String>,
    ) -> Result<UploadOutcome, JobError> {
        let normalized = file_type.to_ascii_lowercase();
        if !Self::SUPPORTED.contains(&normalized.as_str()) {
            return Err(JobError::InvalidInput(format!(
                "unsupported file type '{file_type}' (expected csv or json)"
            )));
        }

        let mut config = ConfigMap::new();
        config.insert("file_path".into(), file_path.into());
        config.insert("file_type".into(), normalized.into());
        config.insert("file_name".into(), file_name.into());

        let job = self
            .service
            .create(SourceType::File.as_str(), config.clone(), job_id)
            .await?;
        Ok(UploadOutcome {
            job_id: job.job_id().to_string(),
            file_info: FileInfo {
                filename: file_name.to_string(),
                path: file_path.to_string(),
                file_type: file_type.to_string(),
            },
            config,
        })
    }
}
