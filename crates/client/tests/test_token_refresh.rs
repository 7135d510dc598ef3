mod common;

use std::sync::Arc;

use bazaar_client::auth::RequestReplayer;
use bazaar_client::{FetchClient, FetchConfig, TokenRefreshCoordinator};
use common::{MockAuth, MockTransport, RecordingClock, RejectingReplayer, Reply};
use serde_json::json;

fn replayer() -> Arc<dyn RequestReplayer> {
    Arc::new(RejectingReplayer)
}

fn client_for(
    base_url: &str,
    transport: &Arc<MockTransport>,
    auth: &Arc<MockAuth>,
    coordinator: &Arc<TokenRefreshCoordinator>,
) -> FetchClient {
    let config = FetchConfig {
        base_url: base_url.to_string(),
        ..FetchConfig::default()
    };
    FetchClient::new(transport.clone(), auth.clone(), coordinator.clone(), config)
        .with_clock(RecordingClock::new())
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_join_one_refresh() {
    let auth = MockAuth::new("stale");
    let coordinator = TokenRefreshCoordinator::new(auth.clone());

    let (first, second) = tokio::join!(
        coordinator.ensure_fresh_token(replayer()),
        coordinator.ensure_fresh_token(replayer()),
    );

    assert!(first);
    assert!(second);
    assert_eq!(auth.refresh_count(), 1);
    assert_eq!(auth.token(), "fresh");
    assert!(!coordinator.is_refreshing());

    // a later caller starts a new refresh
    assert!(coordinator.ensure_fresh_token(replayer()).await);
    assert_eq!(auth.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_reports_false_and_logs_out() {
    let auth = MockAuth::failing("stale");
    let coordinator = TokenRefreshCoordinator::new(auth.clone());

    assert!(!coordinator.ensure_fresh_token(replayer()).await);
    assert!(!coordinator.is_refreshing());
    assert_eq!(auth.logout_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_refresh_releases_the_lock() {
    let auth = MockAuth::panicking("stale");
    let coordinator = TokenRefreshCoordinator::new(auth.clone());

    let (first, second) = tokio::join!(
        coordinator.ensure_fresh_token(replayer()),
        coordinator.ensure_fresh_token(replayer()),
    );
    assert!(!first);
    assert!(!second);
    assert!(!coordinator.is_refreshing());
    assert_eq!(coordinator.queued(), 0);
    assert_eq!(auth.refresh_count(), 1);
    assert_eq!(auth.logout_count(), 1);

    assert!(!coordinator.ensure_fresh_token(replayer()).await);
    assert_eq!(auth.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn request_after_a_panicked_refresh_can_refresh_again() {
    let transport = MockTransport::new();
    transport.require_bearer("fresh");
    let auth = MockAuth::panicking("stale");
    let coordinator = Arc::new(TokenRefreshCoordinator::new(auth.clone()));
    let fetch = client_for("", &transport, &auth, &coordinator);

    let first = fetch.get("/api/orders").await;
    assert!(!first.success);
    assert!(!coordinator.is_refreshing());

    let second = fetch.get("/api/orders").await;
    assert!(!second.success);
    assert_eq!(
        second.error.as_deref(),
        Some("Authentication failed. Please log in again.")
    );
    assert_eq!(auth.refresh_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn parked_requests_replay_against_their_own_host() {
    let transport = MockTransport::new();
    transport.require_bearer("fresh");
    transport.route("http://market.test/api/orders", [Reply::ok(json!({"host": "market"}))]);
    transport.route("http://social.test/api/orders", [Reply::ok(json!({"host": "social"}))]);
    let auth = MockAuth::new("stale");
    let coordinator = Arc::new(TokenRefreshCoordinator::new(auth.clone()));
    let market = client_for("http://market.test", &transport, &auth, &coordinator);
    let social = client_for("http://social.test", &transport, &auth, &coordinator);

    // market starts the refresh; social is parked and replayed by market
    let (from_market, from_social) =
        tokio::join!(market.get("/api/orders"), social.get("/api/orders"));

    assert_eq!(auth.refresh_count(), 1);
    assert_eq!(
        from_market.json::<serde_json::Value>(),
        Some(json!({"host": "market"}))
    );
    assert_eq!(
        from_social.json::<serde_json::Value>(),
        Some(json!({"host": "social"}))
    );
    assert_eq!(transport.calls_to("market.test"), 2);
    assert_eq!(transport.calls_to("social.test"), 2);
}
