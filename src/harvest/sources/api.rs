//! JSON-over-HTTP harvester.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{http_client, parse_url};
use crate::config::HarvesterConfig;
use crate::harvest::schema::{extract_records, infer_columns};
use crate::harvest::traits::{
    optional_object, optional_str, required_str, string_pairs, HarvestError, Harvester,
};
use crate::model::{ConfigMap, HarvestedData, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiMethod {
    Get,
    Post,
}

impl ApiMethod {
    fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ApiAuth {
    Basic { username: String, password: String },
    Bearer(String),
}

impl ApiAuth {
    fn from_config(config: &ConfigMap) -> Result<Option<Self>, HarvestError> {
        let Some(auth) = optional_object(config, "auth")? else {
            return Ok(None);
        };
        if let Some(token) = optional_str(auth, "token")? {
            return Ok(Some(ApiAuth::Bearer(token.to_string())));
        }
        match (optional_str(auth, "username")?, optional_str(auth, "password")?) {
            (Some(username), Some(password)) => Ok(Some(ApiAuth::Basic {
                username: username.to_string(),
                password: password.to_string(),
            })),
            _ => Err(HarvestError::config(
                "'auth' requires either 'token' or both 'username' and 'password'",
            )),
        }
    }
}

/// Validated API request description.
#[derive(Debug, Clone)]
struct ApiRequest {
    url: reqwest::Url,
    method: ApiMethod,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    body: Option<Value>,
    auth: Option<ApiAuth>,
    root_path: Option<String>,
}

impl ApiRequest {
    fn from_config(config: &ConfigMap) -> Result<Self, HarvestError> {
        let url = parse_url(required_str(config, "url")?)?;

        let method = match optional_str(config, "method")?.map(str::to_ascii_uppercase) {
            None => ApiMethod::Get,
            Some(m) if m == "GET" => ApiMethod::Get,
            Some(m) if m == "POST" => ApiMethod::Post,
            Some(m) => {
                return Err(HarvestError::config(format!(
                    "unsupported HTTP method '{m}' (expected GET or POST)"
                )))
            }
        };

        let body = match config.get("data") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        };

        Ok(Self {
            url,
            method,
            headers: string_pairs(config, "headers")?,
            params: string_pairs(config, "params")?,
            body,
            auth: ApiAuth::from_config(config)?,
            root_path: optional_str(config, "root_path")?.map(str::to_string),
        })
    }
}

/// Harvests JSON records from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ApiHarvester {
    client: reqwest::Client,
    sample_size: usize,
}

impl ApiHarvester {
    pub fn new(config: &HarvesterConfig) -> Result<Self, HarvestError> {
        Ok(Self::with_client(http_client(config)?, config.schema_sample_size))
    }

    pub fn with_client(client: reqwest::Client, sample_size: usize) -> Self {
        Self {
            client,
            sample_size,
        }
    }

    async fn fetch(&self, request: &ApiRequest) -> Result<(u16, Value), HarvestError> {
        let mut builder = match request.method {
            ApiMethod::Get => self.client.get(request.url.clone()),
            ApiMethod::Post => self.client.post(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let (ApiMethod::Post, Some(body)) = (request.method, &request.body) {
            builder = builder.json(body);
        }
        builder = match &request.auth {
            Some(ApiAuth::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(ApiAuth::Bearer(token)) => builder.bearer_auth(token),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            HarvestError::ExternalSource(format!("request to {} failed: {e}", request.url))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::ExternalSource(format!(
                "{} {} returned HTTP {status}",
                request.method.as_str(),
                request.url
            )));
        }

        let document = response
            .json::<Value>()
            .await
            .map_err(|e| HarvestError::Parse(format!("response is not valid JSON: {e}")))?;
        Ok((status.as_u16(), document))
    }
}

#[async_trait]
impl Harvester for ApiHarvester {
    fn source_type(&self) -> SourceType {
        SourceType::Api
    }

    #[instrument(skip(self, config))]
    async fn harvest(&self, config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
        let request = ApiRequest::from_config(config)?;
        let (status, document) = self.fetch(&request).await?;

        let rows = extract_records(&document, request.root_path.as_deref())?;
        let columns = infer_columns(&rows, self.sample_size);
        debug!(url = %request.url, status, rows = rows.len(), "API response normalized");

        let mut data = HarvestedData::new(SourceType::Api, request.url.as_str(), rows, columns);
        data.add_metadata("api_url", request.url.as_str());
        data.add_metadata("method", request.method.as_str());
        data.add_metadata("status", status);
        data.add_metadata(
            "root_path",
            request.root_path.map(Value::String).unwrap_or(Value::Null),
        );
        Ok(data)
    }
}
