//! HTML page harvester using CSS selectors.
//!
//! Static HTML only: pages are fetched with a plain GET, no script execution.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::{debug, instrument};

use super::{http_client, parse_url};
use crate::config::HarvesterConfig;
use crate::harvest::schema::{infer_columns, infer_columns_seeded};
use crate::harvest::traits::{
    kind_of, optional_object, optional_str, required_str, string_pairs, HarvestError, Harvester,
};
use crate::model::{ConfigMap, DataColumn, HarvestedData, Row, SourceType};

const DEFAULT_TABLE_SELECTOR: &str = "table";
const DEFAULT_LIST_SELECTOR: &str = "ul li, ol li";

/// Extraction strategy applied to a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractType {
    /// First table matched by `selectors.table`; header cells name the columns
    Table,
    /// Every element matched by `selectors.list` becomes a row
    List,
    /// Each named selector is a column; the i-th matches form row i
    Custom,
}

impl ExtractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractType::Table => "table",
            ExtractType::List => "list",
            ExtractType::Custom => "custom",
        }
    }
}

impl FromStr for ExtractType {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(ExtractType::Table),
            "list" => Ok(ExtractType::List),
            "custom" => Ok(ExtractType::Custom),
            _ => Err(HarvestError::config(format!(
                "unsupported extract_type '{s}' (expected table, list or custom)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct WebOptions {
    url: reqwest::Url,
    extract_type: ExtractType,
    /// Named selectors in config order
    selectors: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

impl WebOptions {
    fn from_config(config: &ConfigMap) -> Result<Self, HarvestError> {
        let url = parse_url(required_str(config, "url")?)?;
        let extract_type = match optional_str(config, "extract_type")? {
            Some(raw) => raw.parse()?,
            None => ExtractType::Custom,
        };

        let mut selectors = Vec::new();
        if let Some(map) = optional_object(config, "selectors")? {
            for (name, value) in map {
                let Value::String(selector) = value else {
                    return Err(HarvestError::config(format!(
                        "'selectors.{name}' must be a string, got {}",
                        kind_of(value)
                    )));
                };
                parse_selector(selector)?;
                selectors.push((name.clone(), selector.clone()));
            }
        }

        if extract_type == ExtractType::Custom && selectors.is_empty() {
            return Err(HarvestError::config(
                "custom extraction requires a non-empty 'selectors' map",
            ));
        }

        Ok(Self {
            url,
            extract_type,
            selectors,
            headers: string_pairs(config, "headers")?,
        })
    }

    fn selector(&self, name: &str) -> Option<&str> {
        self.selectors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_str())
    }
}

fn parse_selector(raw: &str) -> Result<Selector, HarvestError> {
    Selector::parse(raw).map_err(|e| HarvestError::config(format!("invalid CSS selector '{raw}': {e}")))
}

/// Rows extracted from one page plus what the extraction observed.
#[derive(Debug)]
struct PageExtraction {
    rows: Vec<Row>,
    declared_columns: Vec<String>,
    title: Option<String>,
    details: serde_json::Map<String, Value>,
}

/// Harvests tabular data out of HTML pages.
#[derive(Debug, Clone)]
pub struct WebHarvester {
    client: reqwest::Client,
    sample_size: usize,
}

impl WebHarvester {
    pub fn new(config: &HarvesterConfig) -> Result<Self, HarvestError> {
        Ok(Self::with_client(http_client(config)?, config.schema_sample_size))
    }

    pub fn with_client(client: reqwest::Client, sample_size: usize) -> Self {
        Self {
            client,
            sample_size,
        }
    }

    async fn fetch_html(&self, options: &WebOptions) -> Result<String, HarvestError> {
        let mut builder = self.client.get(options.url.clone());
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            HarvestError::ExternalSource(format!("request to {} failed: {e}", options.url))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::ExternalSource(format!(
                "GET {} returned HTTP {status}",
                options.url
            )));
        }
        response
            .text()
            .await
            .map_err(|e| HarvestError::ExternalSource(format!("failed to read page body: {e}")))
    }
}

#[async_trait]
impl Harvester for WebHarvester {
    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    #[instrument(skip(self, config))]
    async fn harvest(&self, config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
        let options = WebOptions::from_config(config)?;
        let html = self.fetch_html(&options).await?;

        let page = extract_page(&html, &options)?;
        let columns: Vec<DataColumn> = if page.declared_columns.is_empty() {
            infer_columns(&page.rows, self.sample_size)
        } else {
            infer_columns_seeded(page.declared_columns, &page.rows, self.sample_size)
        };
        debug!(url = %options.url, rows = page.rows.len(), "Page extracted");

        let mut data = HarvestedData::new(SourceType::Web, options.url.as_str(), page.rows, columns)
            .with_metadata(page.details);
        data.add_metadata("url", options.url.as_str());
        data.add_metadata("extract_type", options.extract_type.as_str());
        data.add_metadata("title", page.title.map(Value::String).unwrap_or(Value::Null));
        Ok(data)
    }
}

// ============================================================================
// Extraction
// ============================================================================
//
// `Html` is not `Send`; everything below is synchronous so the parsed document
// never lives across an await point.

fn extract_page(html: &str, options: &WebOptions) -> Result<PageExtraction, HarvestError> {
    let document = Html::parse_document(html);
    let title = parse_selector("title")?;
    let title = document
        .select(&title)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    let mut page = match options.extract_type {
        ExtractType::Table => extract_table(&document, options)?,
        ExtractType::List => extract_list(&document, options)?,
        ExtractType::Custom => extract_custom(&document, options)?,
    };
    page.title = title;
    Ok(page)
}

fn extract_table(document: &Html, options: &WebOptions) -> Result<PageExtraction, HarvestError> {
    let raw = options.selector("table").unwrap_or(DEFAULT_TABLE_SELECTOR);
    let table_selector = parse_selector(raw)?;
    let tables: Vec<ElementRef> = document.select(&table_selector).collect();
    let table = tables.first().ok_or_else(|| {
        HarvestError::Extraction(format!("no tables found with selector '{raw}'"))
    })?;

    let table_rows = own_rows(*table);
    let header_row = table_rows
        .iter()
        .find(|(in_head, _)| *in_head)
        .or_else(|| table_rows.first())
        .map(|(_, row)| *row)
        .ok_or_else(|| HarvestError::Extraction("table has no rows".to_string()))?;
    let headers = own_cells(header_row);
    if headers.is_empty() {
        return Err(HarvestError::Extraction("table header has no cells".to_string()));
    }

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    let body = table_rows
        .iter()
        .filter(|(in_head, row)| !in_head && row.id() != header_row.id());
    for (_, row) in body {
        let values = own_cells(*row);
        if values.len() != headers.len() {
            skipped += 1;
            continue;
        }
        rows.push(
            headers
                .iter()
                .cloned()
                .zip(values.into_iter().map(Value::String))
                .collect::<Row>(),
        );
    }

    let mut details = serde_json::Map::new();
    details.insert("tables_found".into(), json!(tables.len()));
    details.insert("rows_skipped".into(), json!(skipped));
    Ok(PageExtraction {
        rows,
        declared_columns: headers,
        title: None,
        details,
    })
}

/// Rows of `table` itself, flagged when they sit in its `thead`. Rows of
/// tables nested inside cells are not included.
fn own_rows(table: ElementRef<'_>) -> Vec<(bool, ElementRef<'_>)> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push((false, child)),
            group @ ("thead" | "tbody" | "tfoot") => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|row| row.value().name() == "tr")
                    .map(|row| (group == "thead", row)),
            ),
            _ => {}
        }
    }
    rows
}

fn own_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "th" | "td"))
        .map(element_text)
        .collect()
}

fn extract_list(document: &Html, options: &WebOptions) -> Result<PageExtraction, HarvestError> {
    let raw = options.selector("list").unwrap_or(DEFAULT_LIST_SELECTOR);
    let selector = parse_selector(raw)?;

    let rows: Vec<Row> = document
        .select(&selector)
        .enumerate()
        .map(|(i, item)| {
            let mut row = Row::new();
            row.insert("index".into(), json!(i + 1));
            row.insert("text".into(), Value::String(element_text(item)));
            row.insert("html".into(), Value::String(item.html()));
            row
        })
        .collect();
    if rows.is_empty() {
        return Err(HarvestError::Extraction(format!(
            "no list items found with selector '{raw}'"
        )));
    }

    let mut details = serde_json::Map::new();
    details.insert("items_found".into(), json!(rows.len()));
    Ok(PageExtraction {
        rows,
        declared_columns: vec!["index".into(), "text".into(), "html".into()],
        title: None,
        details,
    })
}

fn extract_custom(document: &Html, options: &WebOptions) -> Result<PageExtraction, HarvestError> {
    let mut matches: Vec<(String, Vec<String>)> = Vec::with_capacity(options.selectors.len());
    for (field, raw) in &options.selectors {
        let selector = parse_selector(raw)?;
        let texts: Vec<String> = document.select(&selector).map(element_text).collect();
        matches.push((field.clone(), texts));
    }

    let row_count = matches.iter().map(|(_, texts)| texts.len()).max().unwrap_or(0);
    let rows = (0..row_count)
        .map(|i| {
            matches
                .iter()
                .map(|(field, texts)| {
                    let text = texts.get(i).cloned().unwrap_or_default();
                    (field.clone(), Value::String(text))
                })
                .collect::<Row>()
        })
        .collect();

    let mut details = serde_json::Map::new();
    details.insert(
        "selectors_used".into(),
        json!(options.selectors.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>()),
    );
    Ok(PageExtraction {
        rows,
        declared_columns: options.selectors.iter().map(|(n, _)| n.clone()).collect(),
        title: None,
        details,
    })
}

/// Whitespace-normalized text content of an element.
fn element_text(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
