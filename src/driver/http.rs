//! Plain HTTP requests for basic tests.
//!
//! A request never fails from the caller's point of view: transport errors
//! are captured in the returned [`CapturedResponse`] so assertions can look
//! at them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::traits::Credentials;
use crate::utils::config::RunnerConfig;

/// Request parameters of a basic `navigate` step
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: Map<String, Value>,

    /// Query string parameters
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Body, sent as-is when a string and as JSON otherwise
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub auth: Option<Credentials>,

    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub max_redirects: Option<usize>,
}

/// A response or a transport failure, as seen by `expect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub data: Value,

    /// Milliseconds between sending the request and reading the body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportError>,
}

impl CapturedResponse {
    /// A request that could not even be built from its config
    pub fn invalid_request(url: &str, message: String) -> Self {
        Self {
            url: url.to_string(),
            error: Some(TransportError {
                code: "EINVALIDREQUEST".to_string(),
                message,
            }),
            ..Default::default()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportError {
    pub code: String,
    pub message: String,
}

impl TransportError {
    fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = match err.downcast_ref::<reqwest::Error>() {
            Some(e) if e.is_timeout() => "ETIMEDOUT",
            Some(e) if e.is_connect() => "ECONNREFUSED",
            Some(e) if e.is_redirect() => "ETOOMANYREDIRECTS",
            Some(e) if e.is_builder() => "EINVALIDREQUEST",
            Some(_) => "ENETWORK",
            None => "EINVALIDREQUEST",
        };
        Self {
            code: code.to_string(),
            message: format!("{:#}", err),
        }
    }
}

/// Send one request
pub async fn send(request: &HttpRequestConfig, defaults: &RunnerConfig) -> CapturedResponse {
    let started = Instant::now();
    match perform(request, defaults).await {
        Ok(response) => response,
        Err(err) => {
            log::debug!("HTTP request to {} failed: {:#}", request.url, err);
            CapturedResponse {
                url: request.url.clone(),
                duration: Some(started.elapsed().as_millis() as u64),
                error: Some(TransportError::from_anyhow(&err)),
                ..Default::default()
            }
        }
    }
}

async fn perform(request: &HttpRequestConfig, defaults: &RunnerConfig) -> Result<CapturedResponse> {
    let max_redirects = request.max_redirects.unwrap_or(defaults.max_redirects);
    let redirect = if max_redirects == 0 {
        reqwest::redirect::Policy::none()
    } else {
        reqwest::redirect::Policy::limited(max_redirects)
    };

    let client = reqwest::Client::builder()
        .redirect(redirect)
        .timeout(Duration::from_millis(
            request.timeout.unwrap_or(defaults.default_timeout_ms),
        ))
        .build()
        .context("Failed to build HTTP client")?;

    let method = request
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_uppercase()
        .parse::<reqwest::Method>()
        .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {:?}", request.method))?;

    let mut req = client.request(method, &request.url);

    for (name, value) in &request.headers {
        req = req.header(name.as_str(), plain_string(value));
    }

    if !request.params.is_empty() {
        let query: Vec<(String, String)> = request
            .params
            .iter()
            .map(|(k, v)| (k.clone(), plain_string(v)))
            .collect();
        req = req.query(&query);
    }

    if let Some(auth) = &request.auth {
        req = req.basic_auth(&auth.username, Some(&auth.password));
    }

    match &request.data {
        Some(Value::String(body)) => req = req.body(body.clone()),
        Some(Value::Null) | None => {}
        Some(body) => req = req.json(body),
    }

    let started = Instant::now();
    let res = req.send().await?;

    let status = res.status();
    let url = res.url().to_string();
    let mut headers = BTreeMap::new();
    for (name, value) in res.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let body = res.text().await?;
    let data = serde_json::from_str(&body).unwrap_or(Value::String(body));

    Ok(CapturedResponse {
        url,
        status: Some(status.as_u16()),
        status_text: Some(status.canonical_reason().unwrap_or_default().to_string()),
        headers,
        data,
        duration: Some(started.elapsed().as_millis() as u64),
        error: None,
    })
}

/// Strings without their JSON quotes, everything else as JSON text
fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
