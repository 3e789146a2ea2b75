//! Stored, reusable harvest configuration bound to a destination dataset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::model::{ConfigMap, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Active,
    Inactive,
    /// Set only by a failed run; cleared only by an explicit activate/deactivate
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Active => "active",
            IntegrationStatus::Inactive => "inactive",
            IntegrationStatus::Error => "error",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which source to harvest and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSpec {
    pub source_type: SourceType,
    #[serde(default)]
    pub config: ConfigMap,
}

impl HarvestSpec {
    pub fn new(source_type: SourceType, config: ConfigMap) -> Self {
        Self {
            source_type,
            config,
        }
    }
}

/// Post-harvest processing applied before rows reach the dataset store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Source key -> dataset column. Unmapped keys pass through unchanged.
    #[serde(default)]
    pub column_mapping: HashMap<String, String>,

    /// Options for downstream processors, carried through untouched
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Input for creating an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIntegration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub dataset_id: String,
    pub harvest_config: HarvestSpec,
    #[serde(default)]
    pub processing_config: Option<ProcessingConfig>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub dataset_id: Option<String>,
    pub harvest_config: Option<HarvestSpec>,
    pub processing_config: Option<ProcessingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataIntegration {
    id: String,
    name: String,
    description: String,
    dataset_id: String,
    harvest_config: HarvestSpec,
    processing_config: Option<ProcessingConfig>,
    status: IntegrationStatus,
    last_run: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<String>,
}

impl DataIntegration {
    pub fn new(new: NewIntegration, created_by: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            dataset_id: new.dataset_id,
            harvest_config: new.harvest_config,
            processing_config: new.processing_config,
            status: if new.is_active {
                IntegrationStatus::Active
            } else {
                IntegrationStatus::Inactive
            },
            last_run: None,
            created_at: now,
            updated_at: now,
            created_by,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn harvest_config(&self) -> &HarvestSpec {
        &self.harvest_config
    }

    pub fn processing_config(&self) -> Option<&ProcessingConfig> {
        self.processing_config.as_ref()
    }

    pub fn status(&self) -> IntegrationStatus {
        self.status
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.status == IntegrationStatus::Active
    }

    pub fn apply_update(&mut self, update: IntegrationUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(dataset_id) = update.dataset_id {
            self.dataset_id = dataset_id;
        }
        if let Some(harvest_config) = update.harvest_config {
            self.harvest_config = harvest_config;
        }
        if let Some(processing_config) = update.processing_config {
            self.processing_config = Some(processing_config);
        }
        self.touch();
    }

    pub fn activate(&mut self) {
        self.status = IntegrationStatus::Active;
        self.touch();
    }

    pub fn deactivate(&mut self) {
        self.status = IntegrationStatus::Inactive;
        self.touch();
    }

    pub(crate) fn mark_error(&mut self) {
        self.status = IntegrationStatus::Error;
        self.touch();
    }

    pub(crate) fn record_run(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
