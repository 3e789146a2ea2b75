//! Source-specific implementations of the [`Harvester`](crate::harvest::Harvester) trait.
//!
//! - `file` - delimited text (CSV) and structured records (JSON) on local disk
//! - `api` - JSON over HTTP
//! - `web` - HTML pages scraped with CSS selectors

pub mod api;
pub mod file;
pub mod web;

pub use api::ApiHarvester;
pub use file::{FileHarvester, FileType};
pub use web::{ExtractType, WebHarvester};

use crate::config::HarvesterConfig;
use crate::harvest::traits::HarvestError;

/// Shared HTTP client for the network-backed variants.
pub(crate) fn http_client(config: &HarvesterConfig) -> Result<reqwest::Client, HarvestError> {
    reqwest::Client::builder()
        .timeout(config.http_timeout)
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| HarvestError::ExternalSource(format!("failed to create HTTP client: {e}")))
}

/// Parses and checks an http(s) URL from config.
pub(crate) fn parse_url(raw: &str) -> Result<reqwest::Url, HarvestError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| HarvestError::config(format!("'url' is not a valid URL ({raw}): {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(HarvestError::config(format!(
            "'url' must use http or https, got '{other}'"
        ))),
    }
}
