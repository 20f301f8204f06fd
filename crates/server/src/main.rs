use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    handler::Handler,
    middleware,
    routing::{get, patch, post},
    Router,
};
use server_api::{auth::JwtKeys, ApiContext};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod auth;
mod config;
mod error;
mod http;
mod ws;

use app_state::AppState;
use config::load_settings;

const MAX_BODY_BYTES: usize = 64 * 1024;
const LIMITER_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    let store_config = settings.store_config();
    let handles = storage::open_store(&store_config).await.map_err(|error| {
        error!(
            ?store_config,
            %error,
            "failed to open chat store; verify the database path and permissions"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext::new(handles, settings.chat_limits()),
        jwt: JwtKeys::new(&settings.jwt_secret),
    };
    spawn_limiter_purge(&state.api);
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind_addr '{}'", settings.bind_addr))?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Drops rate-limit windows of idle senders.
fn spawn_limiter_purge(api: &ApiContext) {
    let limiters = [api.socket_limiter.clone(), api.http_limiter.clone()];
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            for limiter in &limiters {
                limiter.purge_expired().await;
            }
        }
    });
}

fn build_router(state: Arc<AppState>) -> Router {
    let send_limit = middleware::from_fn_with_state(state.clone(), http::http_send_limit);

    let authenticated = Router::new()
        .route("/events/:event_id/chats", get(http::list_event_chats))
        .route(
            "/events/:event_id/chats/direct/:participant_id",
            post(http::create_direct_chat),
        )
        .route("/events/:event_id/join", post(http::join_event))
        .route("/events/:event_id/leave", post(http::leave_event))
        .route(
            "/chats/:chat_id/messages",
            get(http::list_messages).post(http::post_message.layer(send_limit)),
        )
        .route("/chats/:chat_id/block/:target_id", post(http::block_user))
        .route("/chats/:chat_id/report/:target_id", post(http::report_user))
        .route("/notifications", get(http::list_notifications))
        .route(
            "/notifications/:notification_id/read",
            patch(http::mark_notification_read),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_user,
        ));

    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/ws", get(ws::ws_handler))
        .merge(authenticated)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
