//! Built-in catalog of harvestable source descriptors.
//!
//! A descriptor names a source flavour (CSV file, REST API, ...) and the
//! config fields it understands, so a job request can be checked against it
//! before the job is created.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::harvest::traits::kind_of;
use crate::model::{ConfigMap, SourceType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown data source '{0}'")]
    UnknownSource(String),

    #[error("data source '{source_id}' harvests {expected} sources, not {actual}")]
    TypeMismatch {
        source_id: String,
        expected: SourceType,
        actual: SourceType,
    },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}, got {actual}")]
    WrongKind {
        field: String,
        expected: FieldKind,
        actual: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Boolean,
    Object,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldKind::String, Value::String(_))
                | (FieldKind::Boolean, Value::Bool(_))
                | (FieldKind::Object, Value::Object(_))
        )
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> ConfigField {
    ConfigField {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> ConfigField {
    ConfigField {
        name,
        kind,
        required: false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSource {
    pub source_id: &'static str,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub description: &'static str,
    pub config_schema: Vec<ConfigField>,
}

impl DataSource {
    /// Checks `config` against this descriptor. Unknown keys are allowed and
    /// a null optional field counts as absent.
    pub fn validate(&self, config: &ConfigMap) -> Result<(), CatalogError> {
        for field in &self.config_schema {
            match config.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(CatalogError::MissingField(field.name.to_string()));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.accepts(value) => {
                    return Err(CatalogError::WrongKind {
                        field: field.name.to_string(),
                        expected: field.kind,
                        actual: kind_of(value),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// The descriptors shipped with the harvester.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    sources: Vec<DataSource>,
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self {
            sources: vec![
                DataSource {
                    source_id: "csv-file",
                    name: "CSV File",
                    source_type: SourceType::File,
                    description: "Import data from CSV files",
                    config_schema: vec![
                        required("file_path", FieldKind::String),
                        optional("delimiter", FieldKind::String),
                        optional("has_header", FieldKind::Boolean),
                    ],
                },
                DataSource {
                    source_id: "json-file",
                    name: "JSON File",
                    source_type: SourceType::File,
                    description: "Import data from JSON files",
                    config_schema: vec![
                        required("file_path", FieldKind::String),
                        optional("root_path", FieldKind::String),
                    ],
                },
                DataSource {
                    source_id: "rest-api",
                    name: "REST API",
                    source_type: SourceType::Api,
                    description: "Harvest data from REST APIs",
                    config_schema: vec![
                        required("url", FieldKind::String),
                        optional("method", FieldKind::String),
                        optional("headers", FieldKind::Object),
                        optional("params", FieldKind::Object),
                        optional("data", FieldKind::Object),
                        optional("auth", FieldKind::Object),
                        optional("root_path", FieldKind::String),
                    ],
                },
                DataSource {
                    source_id: "web-scraper",
                    name: "Web Scraper",
                    source_type: SourceType::Web,
                    description: "Harvest data from websites",
                    config_schema: vec![
                        required("url", FieldKind::String),
                        optional("extract_type", FieldKind::String),
                        optional("selectors", FieldKind::Object),
                        optional("headers", FieldKind::Object),
                    ],
                },
            ],
        }
    }

    pub fn get_all(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn get_by_type(&self, source_type: SourceType) -> Vec<&DataSource> {
        self.sources
            .iter()
            .filter(|s| s.source_type == source_type)
            .collect()
    }

    pub fn get(&self, source_id: &str) -> Result<&DataSource, CatalogError> {
        self.sources
            .iter()
            .find(|s| s.source_id == source_id)
            .ok_or_else(|| CatalogError::UnknownSource(source_id.to_string()))
    }

    /// Validates a job request against descriptor `source_id`, which must
    /// also harvest `source_type`.
    pub fn validate_config(
        &self,
        source_id: &str,
        source_type: SourceType,
        config: &ConfigMap,
    ) -> Result<(), CatalogError> {
        let source = self.get(source_id)?;
        if source.source_type != source_type {
            return Err(CatalogError::TypeMismatch {
                source_id: source_id.to_string(),
                expected: source.source_type,
                actual: source_type,
            });
        }
        source.validate(config)
    }
}
