//! Local file harvester: CSV and JSON.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, instrument};

use crate::harvest::schema::{extract_records, infer_columns, infer_columns_seeded};
use crate::harvest::traits::{optional_bool, optional_str, required_str, HarvestError, Harvester};
use crate::model::{ConfigMap, DataColumn, HarvestedData, Row, SourceType};

/// Encodings the file harvester understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Delimited text
    Csv,
    /// Structured records
    Json,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
        }
    }

    fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    /// Case-insensitive: `"CSV"` and `"csv"` are the same type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "json" => Ok(FileType::Json),
            _ => Err(format!("unsupported file type '{s}' (expected csv or json)")),
        }
    }
}

/// Validated file harvest options.
#[derive(Debug, Clone)]
struct FileOptions {
    path: PathBuf,
    file_type: FileType,
    delimiter: u8,
    has_header: bool,
    root_path: Option<String>,
}

impl FileOptions {
    fn from_config(config: &ConfigMap) -> Result<Self, HarvestError> {
        let path = PathBuf::from(required_str(config, "file_path")?);

        let file_type = match optional_str(config, "file_type")? {
            Some(raw) => raw.parse::<FileType>().map_err(HarvestError::config)?,
            None => FileType::from_extension(&path).ok_or_else(|| {
                HarvestError::config(format!(
                    "'file_type' is required when '{}' has no csv/json extension",
                    path.display()
                ))
            })?,
        };

        if let Some(encoding) = optional_str(config, "encoding")? {
            let normalized = encoding.to_ascii_lowercase().replace('_', "-");
            if normalized != "utf-8" && normalized != "utf8" {
                return Err(HarvestError::config(format!(
                    "unsupported encoding '{encoding}' (only utf-8 is supported)"
                )));
            }
        }

        let delimiter = match optional_str(config, "delimiter")? {
            None => b',',
            Some(raw) if raw.len() == 1 && raw.is_ascii() => raw.as_bytes()[0],
            Some("\\t") => b'\t',
            Some(raw) => {
                return Err(HarvestError::config(format!(
                    "'delimiter' must be a single ASCII character, got '{raw}'"
                )))
            }
        };

        Ok(Self {
            path,
            file_type,
            delimiter,
            has_header: optional_bool(config, "has_header")?.unwrap_or(true),
            root_path: optional_str(config, "root_path")?.map(str::to_string),
        })
    }
}

/// Harvests CSV and JSON files from the local filesystem.
#[derive(Debug, Clone)]
pub struct FileHarvester {
    sample_size: usize,
}

impl FileHarvester {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }
}

impl Default for FileHarvester {
    fn default() -> Self {
        Self::new(crate::harvest::schema::DEFAULT_SAMPLE_SIZE)
    }
}

#[async_trait]
impl Harvester for FileHarvester {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    #[instrument(skip(self, config))]
    async fn harvest(&self, config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
        let options = FileOptions::from_config(config)?;

        let file_meta = tokio::fs::metadata(&options.path).await.map_err(|e| {
            HarvestError::config(format!(
                "file '{}' is not readable: {e}",
                options.path.display()
            ))
        })?;
        if !file_meta.is_file() {
            return Err(HarvestError::config(format!(
                "'{}' is not a regular file",
                options.path.display()
            )));
        }

        let bytes = tokio::fs::read(&options.path).await.map_err(|e| {
            HarvestError::ExternalSource(format!("failed to read '{}': {e}", options.path.display()))
        })?;

        let sample_size = self.sample_size;
        let parse_options = options.clone();
        let (rows, columns) = tokio::task::spawn_blocking(move || {
            parse_file(&bytes, &parse_options, sample_size)
        })
        .await
        .map_err(|e| HarvestError::Parse(format!("parser task failed: {e}")))??;

        debug!(
            path = %options.path.display(),
            rows = rows.len(),
            columns = columns.len(),
            "File parsed"
        );

        let file_name = options
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut data = HarvestedData::new(
            SourceType::File,
            options.path.display().to_string(),
            rows,
            columns,
        );
        data.add_metadata("file_name", file_name);
        data.add_metadata("file_size", file_meta.len());
        data.add_metadata("file_type", options.file_type.as_str());
        match options.file_type {
            FileType::Csv => {
                data.add_metadata("delimiter", (options.delimiter as char).to_string());
                data.add_metadata("has_header", options.has_header);
            }
            FileType::Json => {
                data.add_metadata(
                    "root_path",
                    options.root_path.clone().map(Value::String).unwrap_or(Value::Null),
                );
            }
        }
        Ok(data)
    }
}

fn parse_file(
    bytes: &[u8],
    options: &FileOptions,
    sample_size: usize,
) -> Result<(Vec<Row>, Vec<DataColumn>), HarvestError> {
    match options.file_type {
        FileType::Csv => {
            let (header, rows) = parse_csv(bytes, options.delimiter, options.has_header)?;
            let columns = infer_columns_seeded(header, &rows, sample_size);
            Ok((rows, columns))
        }
        FileType::Json => {
            let document: Value = serde_json::from_slice(bytes)
                .map_err(|e| HarvestError::Parse(format!("invalid JSON: {e}")))?;
            let rows = extract_records(&document, options.root_path.as_deref())?;
            let columns = infer_columns(&rows, sample_size);
            Ok((rows, columns))
        }
    }
}

/// Reads CSV into rows of strings. Without a header, keys are `column_<i>`.
/// Cells beyond the header width are dropped.
fn parse_csv(
    bytes: &[u8],
    delimiter: u8,
    has_header: bool,
) -> Result<(Vec<String>, Vec<Row>), HarvestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_header)
        .flexible(true)
        .from_reader(bytes);

    let header: Vec<String> = if has_header {
        reader
            .headers()
            .map_err(|e| HarvestError::Parse(format!("invalid CSV header: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| HarvestError::Parse(format!("invalid CSV record {}: {e}", line + 1)))?;
        let mut row = Row::new();
        for (i, field) in record.iter().enumerate() {
            let key = if has_header {
                match header.get(i) {
                    Some(name) => name.clone(),
                    None => continue,
                }
            } else {
                format!("column_{i}")
            };
            row.insert(key, Value::String(field.to_string()));
        }
        rows.push(row);
    }
    Ok((header, rows))
}
