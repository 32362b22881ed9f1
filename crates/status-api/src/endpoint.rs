use std::sync::OnceLock;

use serde::Serialize;
use tracing::info;

/// Base URL used when no override is given and there is no browsing context.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Environment variable holding an explicit API base URL override.
pub const API_BASE_URL_ENV: &str = "STATUS_API_BASE_URL";

/// Where the pipeline is running.
///
/// Passed to the [`Resolver`] explicitly instead of being probed from
/// process globals, so resolution stays deterministic under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeContext {
    /// No browsing context (CLI, server-side render, test harness).
    Headless,
    /// Embedded in a page served from `origin` (e.g. `https://example.com`).
    Browser { origin: String },
}

/// Immutable client configuration, resolved once per process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    api_base_url: String,
}

impl Configuration {
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }
}

/// Apply the resolution rule. First match wins:
///
/// 1. a non-empty `override_url`, returned verbatim
/// 2. [`DEFAULT_API_BASE_URL`] for [`RuntimeContext::Headless`]
/// 3. the page origin joined with `/api`
pub fn resolve_configuration(override_url: Option<&str>, context: &RuntimeContext) -> Configuration {
    let api_base_url = match override_url.filter(|url| !url.is_empty()) {
        Some(url) => url.to_string(),
        None => match context {
            RuntimeContext::Headless => DEFAULT_API_BASE_URL.to_string(),
            RuntimeContext::Browser { origin } => {
                format!("{}/api", origin.trim_end_matches('/'))
            }
        },
    };
    Configuration { api_base_url }
}

/// Owns the process-wide [`Configuration`] and computes it at most once.
#[derive(Debug)]
pub struct Resolver {
    override_url: Option<String>,
    context: RuntimeContext,
    resolved: OnceLock<Configuration>,
}

impl Resolver {
    pub fn new(override_url: Option<String>, context: RuntimeContext) -> Self {
        Self {
            override_url,
            context,
            resolved: OnceLock::new(),
        }
    }

    /// Build a resolver whose override comes from [`API_BASE_URL_ENV`].
    pub fn from_env(context: RuntimeContext) -> Self {
        Self::new(std::env::var(API_BASE_URL_ENV).ok(), context)
    }

    /// Return the resolved configuration, computing it on first use.
    pub fn resolve(&self) -> &Configuration {
        self.resolved.get_or_init(|| {
            let config = resolve_configuration(self.override_url.as_deref(), &self.context);
            info!(
                api_base_url = %config.api_base_url,
                context = ?self.context,
                "resolved API configuration"
            );
            config
        })
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }
}
