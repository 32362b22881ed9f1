use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install JSON logging on stderr; stdout carries rendered status only.
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("status_probe=info,status_query=info,status_api=info")
        }))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}
