use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::endpoint::Configuration;

/// Path of the health endpoint, relative to the API base URL.
pub const HEALTH_PATH: &str = "health";

/// Uniform health-check interface.
///
/// Implemented by anything that can report backend status. Consumers such
/// as the query cache only depend on this trait, which keeps them testable
/// without a network.
pub trait HealthCheck: Send + Sync {
    /// Fetch and validate the current status. Performs exactly one request.
    fn fetch_health(
        &self,
    ) -> impl std::future::Future<Output = Result<HealthResponse, FetchError>> + Send;
}

/// Validated payload of `GET {api_base_url}/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Outcome of checking an untrusted value against an expected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validated<T> {
    Valid(T),
    Invalid(Diagnostics),
}

impl<T> Validated<T> {
    pub fn into_result(self) -> Result<T, Diagnostics> {
        match self {
            Self::Valid(value) => Ok(value),
            Self::Invalid(diagnostics) => Err(diagnostics),
        }
    }
}

/// Constraint a field failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Required,
    Type(&'static str),
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("is required"),
            Self::Type(expected) => write!(f, "must be {expected}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field path; `$` is the document root.
    pub field: String,
    pub constraint: Constraint,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.constraint)
    }
}

/// All violations found in one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Violation>);

impl Diagnostics {
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, field: &str, constraint: Constraint) {
        self.0.push(Violation {
            field: field.to_string(),
            constraint,
        });
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Check a parsed body against the [`HealthResponse`] shape.
///
/// Unknown fields are ignored. Nothing is partially trusted: any violation
/// rejects the whole payload.
pub fn validate_health(value: &Value) -> Validated<HealthResponse> {
    let mut diagnostics = Diagnostics::default();

    let Some(object) = value.as_object() else {
        diagnostics.push("$", Constraint::Type("an object"));
        return Validated::Invalid(diagnostics);
    };

    let status = match object.get("status") {
        None => {
            diagnostics.push("status", Constraint::Required);
            None
        }
        Some(Value::String(status)) => Some(status.clone()),
        Some(_) => {
            diagnostics.push("status", Constraint::Type("a string"));
            None
        }
    };

    match status {
        Some(status) if diagnostics.is_empty() => Validated::Valid(HealthResponse { status }),
        _ => Validated::Invalid(diagnostics),
    }
}

/// Client for the backend health endpoint.
///
/// Holds no cache of its own: every call goes to the network.
#[derive(Debug, Clone)]
pub struct HealthClient {
    http: HttpClient,
}

impl HealthClient {
    pub fn new(config: &Configuration) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }

    /// Like [`HealthCheck::fetch_health`], but gives up after `deadline`.
    ///
    /// Expiry is reported as [`FetchError::Transport`]. The abandoned
    /// request is dropped, not awaited.
    pub async fn fetch_health_within(&self, deadline: Duration) -> Result<HealthResponse, FetchError> {
        tokio::time::timeout(deadline, self.fetch_health())
            .await
            .map_err(FetchError::transport)?
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }
}

impl HealthCheck for HealthClient {
    async fn fetch_health(&self) -> Result<HealthResponse, FetchError> {
        let body = self.http.get_json(HEALTH_PATH).await.inspect_err(|e| {
            warn!(kind = e.kind(), error = %e, "health request failed");
        })?;

        match validate_health(&body) {
            Validated::Valid(health) => {
                debug!(status = %health.status, "health response validated");
                Ok(health)
            }
            Validated::Invalid(diagnostics) => {
                warn!(%diagnostics, "health response failed validation");
                Err(FetchError::Validation(diagnostics))
            }
        }
    }
}
