//! GraphQL over HTTP (reqwest)

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GraphQlRequest, Transport};
use crate::core::{Error, Result};

pub(crate) const API_KEY_HEADER: &str = "x-api-key";

pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// `api_key` is sent as the `x-api-key` header on every request.
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).map_err(|e| Error::Config(format!("api key header: {}", e)))?;
            headers.insert(API_KEY_HEADER, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client, endpoint: endpoint.to_string() })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: GraphQlRequest) -> Result<Value> {
        debug!("GraphQL {} -> {}", request.operation, self.endpoint);
        let resp = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = resp.status();
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) if !status.is_success() => {
                return Err(Error::TransportRejected(format!("{} failed with HTTP {}: {}", request.operation, status, e)));
            }
            Err(e) => return Err(e.into()),
        };
        extract_data(request.operation, body)
    }
}

/// Pull `data` out of a GraphQL response body; an `errors` array wins.
pub(crate) fn extract_data(operation: &str, mut body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array).filter(|e| !e.is_empty()) {
        let messages: Vec<String> = errors
            .iter()
            .map(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string())
            })
            .collect();
        warn!("GraphQL {} rejected: {:?}", operation, messages);
        return Err(Error::TransportRejected(messages.join("; ")));
    }
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(Error::Decode(format!("{}: response has no data", operation))),
    }
}
