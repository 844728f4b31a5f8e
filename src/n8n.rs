//! n8n REST API boundary
//!
//! Responses from the workflow engine are validated into a small set of known
//! shapes before anything else looks at them. Unknown shapes are an error at
//! the boundary rather than a missing field deep inside a check.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";
pub const WEBHOOK_NODE_TYPE: &str = "n8n-nodes-base.webhook";
pub const HTTP_REQUEST_NODE_TYPE: &str = "n8n-nodes-base.httpRequest";

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("request failed with status code {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unrecognized response shape: {0}")]
    Shape(String),
    #[error("status {status} with unreadable body: {message}")]
    Body { status: u16, message: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport(err) => err.status().map(|s| s.as_u16()),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Shape(_) => None,
            ApiError::Body { status, .. } => Some(*status),
        }
    }
}

/// A workflow as returned by the list or detail endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<Value>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

impl Node {
    pub fn is_webhook(&self) -> bool {
        self.kind == WEBHOOK_NODE_TYPE
    }

    pub fn webhook_path(&self) -> Option<&str> {
        self.parameters
            .get("path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    fn query_parameters(&self) -> impl Iterator<Item = &Value> {
        self.parameters
            .pointer("/queryParameters/parameters")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    /// HTTP request nodes that call the YouTube Data API or pass a `key` param.
    pub fn is_youtube_request(&self) -> bool {
        if self.kind != HTTP_REQUEST_NODE_TYPE {
            return false;
        }
        let url_hit = self
            .parameters
            .get("url")
            .and_then(Value::as_str)
            .is_some_and(|u| u.contains("googleapis.com/youtube"));
        url_hit || self.query_parameters().any(|p| param_name(p) == Some("key"))
    }

    /// A literal `key` query parameter (not an `{{ expression }}`).
    pub fn hardcoded_api_key(&self) -> bool {
        self.query_parameters()
            .filter(|p| param_name(p) == Some("key"))
            .filter_map(|p| p.get("value").and_then(Value::as_str))
            .any(|v| !v.is_empty() && !v.starts_with("{{"))
    }

    pub fn is_ai(&self) -> bool {
        self.kind.contains("openAi") || self.kind.contains("langchain") || self.credentials.is_some()
    }
}

fn param_name(param: &Value) -> Option<&str> {
    param.get("name").and_then(Value::as_str)
}

impl Workflow {
    pub fn webhook_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_webhook())
    }

    /// Named like a video compilation workflow, or triggered by a compile webhook.
    pub fn is_video_compilation(&self) -> bool {
        let name = self.name.to_lowercase();
        name.contains("video")
            || name.contains("compilation")
            || self
                .webhook_nodes()
                .any(|n| n.webhook_path().is_some_and(|p| p.contains("compile")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(default)]
    pub code: Option<Value>,
}

/// Every response shape the doctor knows how to interpret.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    WorkflowList(Vec<Workflow>),
    WorkflowDetail(Box<Workflow>),
    Error(ErrorEnvelope),
}

impl ApiResponse {
    pub fn from_value(value: Value) -> Result<Self, ApiError> {
        let shape_err = |e: serde_json::Error| ApiError::Shape(e.to_string());
        match value {
            Value::Array(_) => Ok(ApiResponse::WorkflowList(
                serde_json::from_value(value).map_err(shape_err)?,
            )),
            Value::Object(_) => {
                match value.get("data") {
                    Some(data @ Value::Array(_)) => {
                        return Ok(ApiResponse::WorkflowList(
                            serde_json::from_value(data.clone()).map_err(shape_err)?,
                        ));
                    }
                    Some(data @ Value::Object(_)) => {
                        return Ok(ApiResponse::WorkflowDetail(Box::new(
                            serde_json::from_value(data.clone()).map_err(shape_err)?,
                        )));
                    }
                    _ => {}
                }
                let has = |key: &str| value.get(key).is_some();
                let is_detail = has("id") && (has("nodes") || has("name"));
                let is_error = has("message");
                if is_detail {
                    return Ok(ApiResponse::WorkflowDetail(Box::new(
                        serde_json::from_value(value).map_err(shape_err)?,
                    )));
                }
                if is_error {
                    return Ok(ApiResponse::Error(
                        serde_json::from_value(value).map_err(shape_err)?,
                    ));
                }
                let keys: Vec<String> = value
                    .as_object()
                    .map(|map| map.keys().cloned().collect())
                    .unwrap_or_default();
                Err(ApiError::Shape(format!("object with keys [{}]", keys.join(", "))))
            }
            other => Err(ApiError::Shape(format!("unexpected JSON value: {}", other))),
        }
    }

    pub fn workflow_count(&self) -> usize {
        match self {
            ApiResponse::WorkflowList(list) => list.len(),
            ApiResponse::WorkflowDetail(_) => 1,
            ApiResponse::Error(_) => 0,
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Authenticated client for the workflow engine's REST API.
#[derive(Clone)]
pub struct N8nClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl N8nClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        }
    }

    /// GET an absolute URL with the API key header and classify the body.
    pub async fn get(&self, url: &str) -> Result<(u16, ApiResponse), ApiError> {
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let status = status.as_u16();
        let body = response.text().await?;
        let unreadable = |message: String| ApiError::Body { status, message };
        let value: Value = serde_json::from_str(&body).map_err(|e| unreadable(e.to_string()))?;
        let shape = ApiResponse::from_value(value).map_err(|e| unreadable(e.to_string()))?;
        Ok((status, shape))
    }

    pub async fn list_workflows(&self, endpoint: &str) -> Result<Vec<Workflow>, ApiError> {
        match self.get(&format!("{}{}", self.base_url, endpoint)).await? {
            (_, ApiResponse::WorkflowList(list)) => Ok(list),
            (_, ApiResponse::WorkflowDetail(single)) => Ok(vec![*single]),
            (_, ApiResponse::Error(env)) => Err(ApiError::Shape(env.message)),
        }
    }

    pub async fn workflow_detail(&self, endpoint: &str, id: &str) -> Result<Workflow, ApiError> {
        let url = format!("{}{}/{}", self.base_url, endpoint, id);
        match self.get(&url).await? {
            (_, ApiResponse::WorkflowDetail(detail)) => Ok(*detail),
            (_, ApiResponse::Error(env)) => Err(ApiError::Shape(env.message)),
            (_, ApiResponse::WorkflowList(_)) => {
                Err(ApiError::Shape("expected a single workflow, got a list".to_string()))
            }
        }
    }
}

/// Pull a readable message out of an error body, falling back to raw text.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Ok(ApiResponse::Error(env)) = ApiResponse::from_value(value) {
            return env.message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    crate::util::truncate(trimmed, MAX_ERROR_BODY_LEN)
}
