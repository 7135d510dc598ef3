mod common;

use std::sync::Arc;
use std::time::Duration;

use bazaar_client::{
    FetchClient, FetchConfig, FetchOptions, Method, ResponseBody, TokenRefreshCoordinator,
};
use common::{MockAuth, MockTransport, RecordingClock, Reply};
use futures_util::future::join_all;
use serde_json::json;

fn client(
    transport: &Arc<MockTransport>,
    auth: &Arc<MockAuth>,
    clock: &Arc<RecordingClock>,
) -> FetchClient {
    let refresh = Arc::new(TokenRefreshCoordinator::new(auth.clone()));
    FetchClient::new(transport.clone(), auth.clone(), refresh, FetchConfig::default())
        .with_clock(clock.clone())
}

#[tokio::test(start_paused = true)]
async fn network_failure_is_returned_not_raised() {
    let transport = MockTransport::new();
    transport.route("/api/orders", [Reply::NetworkError]);
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock).get("/api/orders").await;

    assert!(!resp.success);
    assert_eq!(resp.status, 0);
    assert!(resp.error.is_some());
    // one retry after 1s
    assert_eq!(transport.calls(), 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
}

#[tokio::test(start_paused = true)]
async fn network_retries_back_off_exponentially() {
    let transport = MockTransport::new();
    transport.route(
        "/api/orders",
        [Reply::NetworkError, Reply::NetworkError, Reply::ok(json!({"id": 3}))],
    );
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock)
        .request("/api/orders", FetchOptions::new(Method::GET).max_retries(3))
        .await;

    assert!(resp.success);
    assert_eq!(resp.json::<serde_json::Value>(), Some(json!({"id": 3})));
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn unparseable_json_degrades_to_no_data() {
    let transport = MockTransport::new();
    transport.route(
        "/api/listings",
        [Reply::Body {
            status: 200,
            content_type: "application/json",
            body: b"{not json".to_vec(),
        }],
    );
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock).get("/api/listings").await;

    assert!(resp.success);
    assert_eq!(resp.status, 200);
    assert_eq!(resp.data, None);
    assert_eq!(resp.error, None);
}

#[tokio::test(start_paused = true)]
async fn text_bodies_are_kept_as_text() {
    let transport = MockTransport::new();
    transport.route(
        "/health",
        [Reply::Body {
            status: 200,
            content_type: "text/plain",
            body: b"ok".to_vec(),
        }],
    );
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock).get("/health").await;

    assert_eq!(resp.data, Some(ResponseBody::Text("ok".to_string())));
}

#[tokio::test(start_paused = true)]
async fn writes_get_json_content_type_and_credentials() {
    let transport = MockTransport::new();
    transport.route("/api/listings", [Reply::Json(201, json!({"id": "l9"}))]);
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock)
        .post("/api/listings", &json!({"title": "Genesis #1"}))
        .await;

    assert!(resp.success);
    assert_eq!(resp.status, 201);
    let sent = transport.last_request().unwrap();
    assert_eq!(sent.method, Method::POST);
    assert!(sent
        .headers
        .contains(&("Content-Type".to_string(), "application/json".to_string())));
    assert!(sent
        .headers
        .contains(&("Authorization".to_string(), "Bearer stale".to_string())));
}

#[tokio::test(start_paused = true)]
async fn caller_content_type_is_respected() {
    let transport = MockTransport::new();
    transport.route("/api/uploads", [Reply::ok(json!({}))]);
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    client(&transport, &auth, &clock)
        .request(
            "/api/uploads",
            FetchOptions::new(Method::PUT)
                .header("content-type", "image/png")
                .body(vec![0x89, 0x50]),
        )
        .await;

    let sent = transport.last_request().unwrap();
    let content_types: Vec<_> = sent
        .headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .collect();
    assert_eq!(content_types.len(), 1);
    assert_eq!(content_types[0].1, "image/png");
}

#[tokio::test(start_paused = true)]
async fn error_message_comes_from_the_body() {
    let transport = MockTransport::new();
    transport.route("/api/bids", [Reply::Json(422, json!({"message": "Bid below reserve"}))]);
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock)
        .post("/api/bids", &json!({"amount": 1}))
        .await;

    assert!(!resp.success);
    assert_eq!(resp.status, 422);
    assert_eq!(resp.error.as_deref(), Some("Bid below reserve"));
    assert_eq!(auth.refresh_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_401s_trigger_a_single_refresh() {
    let transport = MockTransport::new();
    transport.require_bearer("fresh");
    transport.route("/api/orders", [Reply::ok(json!({"orders": []}))]);
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();
    let fetch = client(&transport, &auth, &clock);

    let responses = join_all((0..5).map(|_| fetch.get("/api/orders"))).await;

    assert_eq!(auth.refresh_count(), 1);
    for resp in &responses {
        assert!(resp.success, "request failed: {:?}", resp.error);
        assert_eq!(resp.json::<serde_json::Value>(), Some(json!({"orders": []})));
    }
    assert_eq!(transport.calls(), 10);
    assert!(!fetch.coordinator().is_refreshing());
    assert_eq!(fetch.coordinator().queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_ends_the_session_once() {
    let transport = MockTransport::new();
    transport.require_bearer("fresh");
    transport.route("/api/orders", [Reply::ok(json!({}))]);
    let auth = MockAuth::failing("stale");
    let clock = RecordingClock::new();
    let fetch = client(&transport, &auth, &clock);

    let responses = join_all((0..3).map(|_| fetch.get("/api/orders"))).await;

    assert_eq!(auth.refresh_count(), 1);
    assert_eq!(auth.logout_count(), 1);
    for resp in &responses {
        assert!(!resp.success);
        assert_eq!(
            resp.error.as_deref(),
            Some("Authentication failed. Please log in again.")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn skip_auth_sends_no_credentials_and_never_refreshes() {
    let transport = MockTransport::new();
    transport.require_bearer("fresh");
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock)
        .request("/api/public", FetchOptions::new(Method::GET).skip_auth())
        .await;

    assert_eq!(resp.status, 401);
    assert!(!resp.success);
    assert_eq!(auth.refresh_count(), 0);
    let sent = transport.last_request().unwrap();
    assert!(!sent.has_header("authorization"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_request_reports_failure() {
    let transport = MockTransport::with_delay(Duration::from_secs(60));
    transport.route("/api/slow", [Reply::ok(json!({}))]);
    let auth = MockAuth::new("stale");
    let clock = RecordingClock::new();

    let resp = client(&transport, &auth, &clock)
        .request(
            "/api/slow",
            FetchOptions::new(Method::GET)
                .timeout(Duration::from_secs(5))
                .max_retries(0),
        )
        .await;

    assert!(!resp.success);
    assert_eq!(resp.status, 0);
    assert_eq!(resp.error.as_deref(), Some("Request timed out. Please try again."));
}
