//! Core contract and error types for the harvest dispatch.
//!
//! - Source abstraction via [`Harvester`]
//! - Standardized error handling via [`HarvestError`]
//! - Typed accessors for the opaque [`ConfigMap`] each variant receives

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::{ConfigMap, HarvestedData, SourceType, UnknownSourceType};

// ============================================================================
// Harvester Trait
// ============================================================================

/// One fetch-and-normalize capability for a single source type.
///
/// Implementations validate the config keys they need before doing any I/O
/// and report missing or malformed keys as
/// [`HarvestError::InvalidConfiguration`].
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one registry instance serves every
/// job concurrently.
#[async_trait]
pub trait Harvester: Send + Sync {
    /// The source type this harvester is registered under.
    fn source_type(&self) -> SourceType;

    /// Fetches from the source described by `config` and normalizes the
    /// result into rows and columns.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::InvalidConfiguration`] for missing/malformed keys
    /// - [`HarvestError::ExternalSource`] when the fetch itself fails
    /// - [`HarvestError::Parse`] / [`HarvestError::Extraction`] when the
    ///   fetched payload cannot be turned into rows
    async fn harvest(&self, config: &ConfigMap) -> Result<HarvestedData, HarvestError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by the harvest dispatch and its source variants.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Required config key is absent or has the wrong shape
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No variant exists for the requested source type
    #[error("invalid configuration: {0}")]
    UnknownSourceType(#[from] UnknownSourceType),

    /// The source type is known but nothing is registered for it
    #[error("invalid configuration: no harvester registered for source type '{0}'")]
    NotRegistered(SourceType),

    /// The underlying fetch failed (unreadable file, HTTP failure, ...)
    #[error("external source failure: {0}")]
    ExternalSource(String),

    /// Payload could not be decoded (bad CSV/JSON)
    #[error("failed to parse source data: {0}")]
    Parse(String),

    /// Payload was decoded but the requested records were not found in it
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    pub fn config(message: impl Into<String>) -> Self {
        HarvestError::InvalidConfiguration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarvestError::InvalidConfiguration(_)
                | HarvestError::UnknownSourceType(_)
                | HarvestError::NotRegistered(_)
        )
    }
}

// ============================================================================
// Config Accessors
// ============================================================================

pub(crate) fn required_str<'a>(config: &'a ConfigMap, key: &str) -> Result<&'a str, HarvestError> {
    match config.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(HarvestError::config(format!("'{key}' must not be empty"))),
        Some(other) => Err(HarvestError::config(format!(
            "'{key}' must be a string, got {}",
            kind_of(other)
        ))),
        None => Err(HarvestError::config(format!("'{key}' is required"))),
    }
}

pub(crate) fn optional_str<'a>(
    config: &'a ConfigMap,
    key: &str,
) -> Result<Option<&'a str>, HarvestError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(HarvestError::config(format!(
            "'{key}' must be a string, got {}",
            kind_of(other)
        ))),
    }
}

pub(crate) fn optional_bool(config: &ConfigMap, key: &str) -> Result<Option<bool>, HarvestError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(HarvestError::config(format!(
            "'{key}' must be a boolean, got {}",
            kind_of(other)
        ))),
    }
}

pub(crate) fn optional_object<'a>(
    config: &'a ConfigMap,
    key: &str,
) -> Result<Option<&'a ConfigMap>, HarvestError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(HarvestError::config(format!(
            "'{key}' must be an object, got {}",
            kind_of(other)
        ))),
    }
}

/// Flattens an object of scalars into string pairs (headers, query params).
pub(crate) fn string_pairs(
    config: &ConfigMap,
    key: &str,
) -> Result<Vec<(String, String)>, HarvestError> {
    let Some(map) = optional_object(config, key)? else {
        return Ok(Vec::new());
    };
    map.iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name.clone(), s.clone())),
            Value::Number(n) => Ok((name.clone(), n.to_string())),
            Value::Bool(b) => Ok((name.clone(), b.to_string())),
            other => Err(HarvestError::config(format!(
                "'{key}.{name}' must be a scalar, got {}",
                kind_of(other)
            ))),
        })
        .collect()
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================
