use status_api::{FetchError, HealthResponse};
use status_query::RenderState;

pub const TITLE: &str = "Service status";
pub const LOADING: &str = "Checking service health…";
pub const UNREACHABLE: &str = "Unable to reach the API service.";

pub type HealthView = RenderState<HealthResponse, FetchError>;

/// Text lines for one render of the health query.
///
/// Error details stay out of the rendered text; they are logged with their
/// kind instead.
pub fn render(view: &HealthView) -> Vec<String> {
    let mut lines = Vec::new();
    if view.is_loading {
        lines.push(LOADING.to_string());
    }
    if view.error.is_some() {
        lines.push(UNREACHABLE.to_string());
    }
    if let Some(health) = &view.data {
        lines.push(format!("API status: {}", health.status));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use status_api::{Constraint, Diagnostics, Validated, validate_health};

    fn diagnostics() -> Diagnostics {
        match validate_health(&serde_json::json!({})) {
            Validated::Invalid(diagnostics) => diagnostics,
            Validated::Valid(_) => unreachable!(),
        }
    }

    #[test]
    fn loading_shows_checking_message() {
        let view = HealthView {
            is_loading: true,
            error: None,
            data: None,
        };
        assert_eq!(render(&view), vec![LOADING]);
    }

    #[test]
    fn error_shows_generic_message() {
        let diagnostics = diagnostics();
        assert_eq!(diagnostics.violations()[0].constraint, Constraint::Required);
        let view = HealthView {
            is_loading: false,
            error: Some(FetchError::Validation(diagnostics)),
            data: None,
        };
        assert_eq!(render(&view), vec![UNREACHABLE]);
    }

    #[test]
    fn success_shows_status() {
        let view = HealthView {
            is_loading: false,
            error: None,
            data: Some(HealthResponse {
                status: "ok".into(),
            }),
        };
        assert_eq!(render(&view), vec!["API status: ok"]);
    }

    #[test]
    fn refresh_shows_stale_status_and_progress() {
        let view = HealthView {
            is_loading: true,
            error: None,
            data: Some(HealthResponse {
                status: "ok".into(),
            }),
        };
        assert_eq!(render(&view), vec![LOADING, "API status: ok"]);
    }
}
