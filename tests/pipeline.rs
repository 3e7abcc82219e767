//! End-to-end tests of the admission pipeline over a real socket.

use reqwest::StatusCode;

mod common;

#[tokio::test]
async fn test_rate_limit_rejects_after_burst() {
    let mut config = common::relaxed_config();
    config.rate_limit.burst_size = 3;
    config.rate_limit.requests_per_second = 0.01;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    for _ in 0..3 {
        let res = client.get(gateway.url("/version")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = client.get(gateway.url("/version")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.text().await.unwrap(), "Too Many Requests");

    gateway.stop().await;
}

#[tokio::test]
async fn test_panic_is_contained() {
    let gateway = common::start_gateway(common::relaxed_config()).await;
    let client = common::client();

    let res = client.get(gateway.url("/panic")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = res.text().await.unwrap();
    assert_eq!(body, "Internal Server Error");
    assert!(!body.contains("deliberate"));

    // Same process, next request served normally.
    let res = client.get(gateway.url("/healthz")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn test_breaker_opens_on_server_errors() {
    let mut config = common::relaxed_config();
    config.circuit_breaker.trip_consecutive_failures = 1;
    config.circuit_breaker.trip_failure_ratio = 1.0;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    // Downstream 5xx passes through unchanged while closed.
    for _ in 0..2 {
        let res = client.get(gateway.url("/status/502")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    let res = client.get(gateway.url("/version")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "circuit breaker is open");

    gateway.stop().await;
}

#[tokio::test]
async fn test_client_errors_do_not_trip_breaker() {
    let gateway = common::start_gateway(common::relaxed_config()).await;
    let client = common::client();

    for _ in 0..10 {
        let res = client.get(gateway.url("/status/404")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
    let res = client.get(gateway.url("/version")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn test_trace_context_and_request_id_headers() {
    let gateway = common::start_gateway(common::relaxed_config()).await;
    let client = common::client();
    let trace_id = "4bf92f3577b34da6a3ce929d0e0e4736";

    let res = client
        .post(gateway.url("/echo"))
        .header("traceparent", format!("00-{}-00f067aa0ba902b7-01", trace_id))
        .header("x-request-id", "integration-1")
        .body("ping")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-request-id"], "integration-1");
    assert!(res.headers().contains_key("x-api-version"));

    let traceparent = res.headers()["traceparent"].to_str().unwrap().to_string();
    let parts: Vec<&str> = traceparent.split('-').collect();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[1], trace_id);
    assert_ne!(parts[2], "00f067aa0ba902b7");

    assert_eq!(res.text().await.unwrap(), "ping");

    gateway.stop().await;
}

#[tokio::test]
async fn test_readiness_toggle_with_breaker_enabled() {
    let mut config = common::relaxed_config();
    config.circuit_breaker.trip_failure_ratio = 0.5;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    let res = client.post(gateway.url("/readyz/disable")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    for _ in 0..5 {
        let res = client.get(gateway.url("/readyz")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.text().await.unwrap(), "");
    }

    // Liveness is unaffected.
    let res = client.get(gateway.url("/healthz")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.post(gateway.url("/readyz/enable")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let res = client.get(gateway.url("/readyz")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The exercise endpoints never saw a failure.
    let res = client.get(gateway.url("/version")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn test_hung_handler_opens_breaker() {
    let mut config = common::relaxed_config();
    config.timeouts.request_secs = 1;
    config.circuit_breaker.trip_consecutive_failures = 1;
    let gateway = common::start_gateway(config).await;
    let client = common::client();

    for _ in 0..2 {
        let res = client.get(gateway.url("/delay/2")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    let res = client.get(gateway.url("/version")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "circuit breaker is open");

    gateway.stop().await;
}
