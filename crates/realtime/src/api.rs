//! REST client for the clinical job and order endpoints.
//!
//! [`ClinicalApi`] is the seam the gateway and order service depend on;
//! [`HttpApi`] implements it with [`reqwest`]. Success bodies are wrapped
//! as `{"data": ...}` and error bodies as `{"error": ..., "code": ...}`.

use medflow_core::job::JobKind;
use medflow_core::order::{HistoryEntry, OrderCommand, OrderSnapshot};
use medflow_core::types::{DbId, JobId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    /// Kind-specific input (patient id, study ids, order id, ...).
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Response of `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response of `GET /jobs/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Success envelope.
#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// Error envelope.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never got a response (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        /// Machine-readable code from the error body, e.g. `FORBIDDEN`.
        code: Option<String>,
        message: String,
    },

    /// A 2xx body could not be decoded.
    #[error("Unexpected response body: {0}")]
    Decode(String),

    /// The configured API URL cannot take a request path.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for a failed job's `error` field.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClinicalApi
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait ClinicalApi: Send + Sync {
    async fn submit(&self, request: &JobRequest) -> Result<SubmitResponse, ApiError>;

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, ApiError>;

    async fn get_order(&self, order_id: DbId) -> Result<OrderSnapshot, ApiError>;

    /// Run a transition on the server. Returns the updated order.
    async fn transition_order(
        &self,
        order_id: DbId,
        command: &OrderCommand,
    ) -> Result<OrderSnapshot, ApiError>;

    async fn order_history(&self, order_id: DbId) -> Result<Vec<HistoryEntry>, ApiError>;
}

// ---------------------------------------------------------------------------
// HttpApi
// ---------------------------------------------------------------------------

/// [`ClinicalApi`] over HTTP with bearer authentication.
pub struct HttpApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl HttpApi {
    /// * `api_url` - base URL, e.g. `https://host/api`. A trailing slash is
    ///   ignored.
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, token)
    }

    /// Reuse an existing [`reqwest::Client`] (timeouts, pooling).
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            token,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ApiError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.api_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an [`ApiError::Api`]
    /// built from the error envelope (falling back to the raw body).
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => (parsed.code, parsed.error),
            Err(_) => (None, body),
        };
        Err(ApiError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// Unwrap the `{"data": ...}` envelope of a successful response.
    async fn parse_data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice::<DataResponse<T>>(&bytes)
            .map(|envelope| envelope.data)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ClinicalApi for HttpApi {
    async fn submit(&self, request: &JobRequest) -> Result<SubmitResponse, ApiError> {
        let response = self
            .authorized(self.client.post(self.url(&["jobs"])?))
            .json(request)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, ApiError> {
        let response = self
            .authorized(self.client.get(self.url(&["jobs", job_id.as_str()])?))
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn get_order(&self, order_id: DbId) -> Result<OrderSnapshot, ApiError> {
        let response = self
            .authorized(self.client.get(self.url(&["orders", &order_id.to_string()])?))
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn transition_order(
        &self,
        order_id: DbId,
        command: &OrderCommand,
    ) -> Result<OrderSnapshot, ApiError> {
        let url = self.url(&["orders", &order_id.to_string(), command.endpoint()])?;
        let response = self
            .authorized(self.client.post(url))
            .json(command)
            .send()
            .await?;
        Self::parse_data(response).await
    }

    async fn order_history(&self, order_id: DbId) -> Result<Vec<HistoryEntry>, ApiError> {
        let response = self
            .authorized(self.client.get(self.url(&["orders", &order_id.to_string(), "history"])?))
            .send()
            .await?;
        Self::parse_data(response).await
    }
}
