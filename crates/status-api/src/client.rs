use std::sync::Arc;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

use crate::endpoint::Configuration;
use crate::health::Diagnostics;

/// Underlying cause of a transport failure.
pub type TransportCause = Arc<dyn std::error::Error + Send + Sync>;

/// Why a fetch attempt failed.
///
/// Every variant is terminal for the attempt; nothing here is retried.
/// Values are `Clone` so a query cache can store and fan them out.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[source] TransportCause),
    #[error("API returned {status}{}", describe_body(.body))]
    HttpStatus { status: u16, body: Option<String> },
    #[error("malformed response body: {0}")]
    MalformedResponse(#[source] Arc<serde_json::Error>),
    #[error("response failed validation: {0}")]
    Validation(Diagnostics),
}

impl FetchError {
    pub fn transport<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Arc::new(cause))
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Validation(_) => "validation",
        }
    }
}

fn describe_body(body: &Option<String>) -> String {
    match body {
        Some(body) => format!(": {body}"),
        None => String::new(),
    }
}

/// HTTP client bound to the resolved API base URL.
///
/// Wraps [`reqwest::Client`]. Relative paths are joined under the base
/// URL's path, so `health` against `https://example.com/api` targets
/// `https://example.com/api/health`.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Url,
}

impl HttpClient {
    pub fn new(config: &Configuration) -> Result<Self, FetchError> {
        let base = format!("{}/", config.api_base_url().trim_end_matches('/'));
        let base_url = Url::parse(&base).map_err(FetchError::transport)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("status-api/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::transport)?;

        Ok(Self { inner, base_url })
    }

    /// GET `{base_url}/{path}` and parse the body as JSON.
    ///
    /// Non-2xx responses become [`FetchError::HttpStatus`] and bodies that
    /// are not JSON become [`FetchError::MalformedResponse`]. The returned
    /// value is untrusted; callers validate its shape.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, FetchError> {
        let url = self.url(path)?;
        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(FetchError::transport)?;
        Self::handle_response(resp).await
    }

    /// Resolve `path` against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(FetchError::transport)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn handle_response(resp: reqwest::Response) -> Result<serde_json::Value, FetchError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.ok().filter(|b| !b.is_empty());
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await.map_err(FetchError::transport)?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::MalformedResponse(Arc::new(e)))
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}
