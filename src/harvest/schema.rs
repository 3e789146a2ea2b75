//! Row normalization and column inference shared by every source variant.
//!
//! Column types are a best-effort heuristic: each column takes the tag of the
//! first non-null value observed for its key. They are not authoritative and
//! downstream consumers should not treat them as a declared schema.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::harvest::traits::HarvestError;
use crate::model::{ColumnType, DataColumn, Row};

/// Default number of rows inspected for column typing.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// Infers the ordered union of keys across `rows`.
///
/// Every key in every row yields a column, in first-seen order. Types come
/// from the first `sample_size` rows; a key first seen after the sample is
/// typed by its own first non-null value. Columns with only nulls default to
/// [`ColumnType::String`].
pub fn infer_columns(rows: &[Row], sample_size: usize) -> Vec<DataColumn> {
    infer_columns_seeded(std::iter::empty::<String>(), rows, sample_size)
}

/// Like [`infer_columns`] but starts from known names (e.g. a CSV header) so
/// that declared columns survive even when no row carries them.
pub fn infer_columns_seeded<I, S>(seed: I, rows: &[Row], sample_size: usize) -> Vec<DataColumn>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let sample_size = sample_size.max(1);
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, Option<ColumnType>> = HashMap::new();
    let mut late_keys: HashSet<String> = HashSet::new();

    for name in seed {
        let name = name.into();
        if !types.contains_key(&name) {
            types.insert(name.clone(), None);
            order.push(name);
        }
    }

    for (index, row) in rows.iter().enumerate() {
        let in_sample = index < sample_size;
        for (key, value) in row {
            if !types.contains_key(key) {
                types.insert(key.clone(), None);
                order.push(key.clone());
                if !in_sample {
                    late_keys.insert(key.clone());
                }
            }
            if !in_sample && !late_keys.contains(key) {
                continue;
            }
            if let Some(slot) = types.get_mut(key) {
                if slot.is_none() {
                    *slot = ColumnType::of(value);
                }
            }
        }
    }

    order
        .into_iter()
        .map(|name| {
            let column_type = types
                .remove(&name)
                .flatten()
                .unwrap_or(ColumnType::String);
            DataColumn { name, column_type }
        })
        .collect()
}

/// Walks a dot-separated path (`"data.items"`) into a JSON document.
pub fn resolve_root_path<'a>(value: &'a Value, root_path: &str) -> Result<&'a Value, HarvestError> {
    let mut current = value;
    for part in root_path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| {
            HarvestError::Extraction(format!("root path '{root_path}' not found in document"))
        })?;
    }
    Ok(current)
}

/// Turns a JSON document into flat records: an object is one record, an array
/// contributes each of its object elements. Anything else yields no records.
pub fn records_from_value(value: &Value) -> Vec<Row> {
    match value {
        Value::Object(map) => vec![map.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolves `root_path` (if any) and extracts the records found there.
pub fn extract_records(document: &Value, root_path: Option<&str>) -> Result<Vec<Row>, HarvestError> {
    let target = match root_path {
        Some(path) => resolve_root_path(document, path)?,
        None => document,
    };
    Ok(records_from_value(target))
}
