pub mod client;
pub mod endpoint;
pub mod health;

pub use client::{FetchError, HttpClient};
pub use endpoint::{
    API_BASE_URL_ENV, Configuration, DEFAULT_API_BASE_URL, Resolver, RuntimeContext,
    resolve_configuration,
};
pub use health::{
    Constraint, Diagnostics, HealthCheck, HealthClient, HealthResponse, Validated, Violation,
    validate_health,
};
