use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// One flat harvested record. Key order follows the order keys were observed.
pub type Row = serde_json::Map<String, Value>;

/// Opaque, source-specific harvest configuration.
pub type ConfigMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Api,
    Web,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::File, SourceType::Api, SourceType::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::File => "file",
            SourceType::Api => "api",
            SourceType::Web => "web",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown source type '{0}' (expected one of: file, api, web)")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SourceType::File),
            "api" => Ok(SourceType::Api),
            "web" => Ok(SourceType::Web),
            other => Err(UnknownSourceType(other.to_string())),
        }
    }
}

/// Best-effort type tag for a harvested column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

impl ColumnType {
    /// Tag for a single observed value; `None` for JSON null.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(_) => Some(ColumnType::Number),
            Value::String(_) | Value::Array(_) | Value::Object(_) => Some(ColumnType::String),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl DataColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Normalized output of one harvest attempt.
///
/// `columns` describe the union schema of `rows`; see
/// [`crate::harvest::schema::infer_columns`] for how they are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestedData {
    pub source_type: SourceType,
    /// File path, URL or other label of the origin
    pub source_identifier: String,
    pub rows: Vec<Row>,
    pub columns: Vec<DataColumn>,
    pub metadata: serde_json::Map<String, Value>,
    pub harvested_at: DateTime<Utc>,
}

impl HarvestedData {
    pub fn new(
        source_type: SourceType,
        source_identifier: impl Into<String>,
        rows: Vec<Row>,
        columns: Vec<DataColumn>,
    ) -> Self {
        Self {
            source_type,
            source_identifier: source_identifier.into(),
            rows,
            columns,
            metadata: serde_json::Map::new(),
            harvested_at: Utc::now(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// Summary recorded on a completed job. The normalized rows are shared, not
/// copied, when the job is cloned in and out of a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub row_count: usize,
    pub column_count: usize,
    pub data: Arc<HarvestedData>,
}

impl From<HarvestedData> for JobResult {
    fn from(data: HarvestedData) -> Self {
        Self {
            row_count: data.row_count(),
            column_count: data.column_count(),
            data: Arc::new(data),
        }
    }
}
