//! bazaar-live - follow marketplace live updates from the terminal
//!
//! Connects to the live-update socket (falling back to polling) and logs every
//! feed, notification and community event until interrupted.

use std::sync::Arc;

use bazaar_client::auth::{AuthService, SessionAuth, TokenRefreshCoordinator};
use bazaar_client::logging::init_tracing;
use bazaar_client::{
    ClientConfig, ConnectionManager, FetchClient, LiveEvent, RequestManager, ReqwestTransport,
    WsConnection,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    init_tracing(&config)?;

    tracing::info!(api = %config.api_base_url, ws = %config.ws_url, "starting bazaar-live");

    let transport = Arc::new(ReqwestTransport::new());
    let auth = Arc::new(SessionAuth::new(transport.clone(), config.api_base_url.clone()));
    if !auth.is_authenticated() {
        tracing::warn!("no stored session, requests will be anonymous");
    }

    let refresh = Arc::new(TokenRefreshCoordinator::new(auth.clone()));
    let fetch = FetchClient::new(transport.clone(), auth.clone(), refresh, config.fetch.clone());
    let health = fetch.get("/api/health").await;
    if health.success {
        tracing::info!("API reachable");
    } else {
        tracing::warn!(
            status = health.status,
            error = health.error.as_deref().unwrap_or_default(),
            "API health check failed"
        );
    }

    let requests = RequestManager::new(transport, config.requests.clone());
    let socket = Arc::new(
        WsConnection::new(config.ws_url.clone(), config.reconnect.clone()).low_power(config.low_power),
    );
    let live = ConnectionManager::new(socket, requests, config.polling.clone());

    live.on(LiveEvent::ConnectionModeChanged, |data| {
        tracing::info!(%data, "connection mode changed");
    });
    for event in [
        LiveEvent::FeedUpdate,
        LiveEvent::Notification,
        LiveEvent::CommunityUpdate,
    ] {
        let name = event.clone();
        live.on(event, move |data| {
            tracing::info!(event = %name, %data, "update");
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    live.disconnect();

    Ok(())
}
