use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use status_api::{Configuration, FetchError, HealthCheck, HealthClient, HealthResponse};
use status_query::{QueryClient, QueryOptions, RenderState, Subscription};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::metrics;
use crate::view;

/// Cache key of the health query.
pub const HEALTH_KEY: &str = "health";

type HealthFuture = Pin<Box<dyn Future<Output = Result<HealthResponse, FetchError>> + Send>>;

/// Wires the health client into a query cache for the CLI.
pub struct Probe {
    health: HealthClient,
    queries: QueryClient<HealthResponse, FetchError>,
    timeout: Option<Duration>,
}

impl Probe {
    pub fn new(
        config: &Configuration,
        options: QueryOptions,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            health: HealthClient::new(config)?,
            queries: QueryClient::new(options),
            timeout,
        })
    }

    /// Call `sink` with the rendered lines on every state transition.
    pub fn subscribe_view<S>(&self, sink: S) -> Subscription
    where
        S: Fn(Vec<String>) + Send + Sync + 'static,
    {
        self.queries.subscribe(HEALTH_KEY, move |state| {
            sink(view::render(&RenderState::from(state)));
        })
    }

    /// Fetch once, sharing any request already in flight.
    ///
    /// Subscribed views have received the final render when this returns.
    pub async fn check(&self) -> Result<HealthResponse, FetchError> {
        self.queries.fetch(HEALTH_KEY, self.operation()).await
    }

    /// Refetch every `interval`. Never returns; run it under a `select!`.
    pub async fn watch(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        self.queries.get_or_start(HEALTH_KEY, self.operation());
        loop {
            ticker.tick().await;
            self.queries.refetch(HEALTH_KEY, self.operation());
        }
    }

    #[cfg(test)]
    pub fn queries(&self) -> &QueryClient<HealthResponse, FetchError> {
        &self.queries
    }

    fn operation(&self) -> impl FnOnce() -> HealthFuture {
        let health = self.health.clone();
        let timeout = self.timeout;
        move || {
            Box::pin(async move {
                let started = Instant::now();
                let result = match timeout {
                    Some(deadline) => health.fetch_health_within(deadline).await,
                    None => health.fetch_health().await,
                };
                let label = match &result {
                    Ok(health) => {
                        info!(status = %health.status, "health check succeeded");
                        "success"
                    }
                    Err(e) => {
                        warn!(kind = e.kind(), error = %e, "health check failed");
                        e.kind()
                    }
                };
                metrics::record_fetch(label, started.elapsed().as_secs_f64());
                result
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use status_api::{RuntimeContext, resolve_configuration};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn probe_for(server: &MockServer, options: QueryOptions) -> Probe {
        let config = resolve_configuration(Some(&server.uri()), &RuntimeContext::Headless);
        Probe::new(&config, options, Some(Duration::from_secs(5))).unwrap()
    }

    #[tokio::test]
    async fn check_renders_loading_then_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let probe = probe_for(&server, QueryOptions::default());
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rendered);
        let _sub = probe.subscribe_view(move |lines| sink.lock().unwrap().push(lines));

        let health = probe.check().await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(
            *rendered.lock().unwrap(),
            vec![
                vec![view::LOADING.to_string()],
                vec!["API status: ok".to_string()],
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn final_render_precedes_dropping_the_view() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&server)
            .await;

        for _ in 0..25 {
            let probe = probe_for(&server, QueryOptions::default());
            let rendered = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&rendered);
            let view = probe.subscribe_view(move |lines| sink.lock().unwrap().push(lines));

            probe.check().await.unwrap();
            drop(view);

            assert_eq!(
                rendered.lock().unwrap().last(),
                Some(&vec!["API status: ok".to_string()])
            );
        }
    }

    #[tokio::test]
    async fn failed_check_renders_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let probe = probe_for(&server, QueryOptions::default());
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&rendered);
        let _view = probe.subscribe_view(move |lines| sink.lock().unwrap().push(lines));

        probe.check().await.unwrap_err();
        assert_eq!(
            rendered.lock().unwrap().last(),
            Some(&vec![view::UNREACHABLE.to_string()])
        );
    }

    #[tokio::test]
    async fn check_failure_is_counted_by_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let before = metrics::FETCH_TOTAL
            .with_label_values(&["http_status"])
            .get();
        let probe = probe_for(&server, QueryOptions::default());
        let err = probe.check().await.unwrap_err();
        assert_eq!(err.kind(), "http_status");
        assert!(
            metrics::FETCH_TOTAL
                .with_label_values(&["http_status"])
                .get()
                > before
        );
        assert!(metrics::encode().unwrap().contains("status_probe_fetch_total"));
    }

    #[tokio::test]
    async fn watch_refetches_with_stale_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&server)
            .await;

        let probe = probe_for(
            &server,
            QueryOptions {
                stale_while_revalidate: true,
            },
        );
        tokio::select! {
            _ = probe.watch(Duration::from_millis(20)) => unreachable!("watch never returns"),
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }

        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 2, "expected refetches, got {}", requests.len());
        assert_eq!(
            probe.queries().render(HEALTH_KEY).data.map(|h| h.status),
            Some("ok".to_string())
        );
    }
}
