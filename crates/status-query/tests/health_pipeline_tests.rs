use status_api::{
    FetchError, HealthCheck, HealthClient, HealthResponse, RuntimeContext, resolve_configuration,
};
use status_query::{QueryClient, QueryState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HEALTH_KEY: &str = "health";

fn health_client(server: &MockServer) -> HealthClient {
    let config = resolve_configuration(Some(&server.uri()), &RuntimeContext::Headless);
    HealthClient::new(&config).unwrap()
}

fn fetch_health(
    client: &HealthClient,
) -> impl FnOnce() -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<HealthResponse, FetchError>> + Send>,
> {
    let client = client.clone();
    move || Box::pin(async move { client.fetch_health().await })
}

#[tokio::test]
async fn concurrent_requests_hit_the_network_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": "ok"}))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let health = health_client(&server);
    let queries: QueryClient<HealthResponse, FetchError> = QueryClient::default();

    let (first, second) = tokio::join!(
        queries.fetch(HEALTH_KEY, fetch_health(&health)),
        queries.fetch(HEALTH_KEY, fetch_health(&health)),
    );

    assert_eq!(first.unwrap().status, "ok");
    assert_eq!(second.unwrap().status, "ok");
}

#[tokio::test]
async fn http_failure_is_stored_with_its_kind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let health = health_client(&server);
    let queries: QueryClient<HealthResponse, FetchError> = QueryClient::default();
    let err = queries
        .fetch(HEALTH_KEY, fetch_health(&health))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));

    let render = queries.render(HEALTH_KEY);
    assert!(!render.is_loading);
    assert!(render.data.is_none());
    assert_eq!(render.error.map(|e| e.kind()), Some("http_status"));
}

#[tokio::test]
async fn refetch_recovers_after_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
        )
        .mount(&server)
        .await;

    let health = health_client(&server);
    let queries: QueryClient<HealthResponse, FetchError> = QueryClient::default();
    assert!(queries.fetch(HEALTH_KEY, fetch_health(&health)).await.is_err());

    queries.refetch(HEALTH_KEY, fetch_health(&health));
    let health = queries
        .fetch(HEALTH_KEY, fetch_health(&health))
        .await
        .unwrap();
    assert_eq!(health.status, "ok");
    assert!(matches!(
        queries.get_state(HEALTH_KEY),
        QueryState::Success { ref data, refreshing: false } if data.status == "ok"
    ));
}
