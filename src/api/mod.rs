use crate::config::Config;
use crate::services::messaging_service::MessagingService;
use crate::services::rate_limit_service::RateLimitService;
use crate::storage::DbPool;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod gateway;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod rate_limit;
pub mod threads;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub pool: DbPool,
    pub messaging: MessagingService,
    pub rate_limit: RateLimitService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

/// Configures and returns the application router.
///
/// # Panics
/// Panics if the rate limiter configuration cannot be constructed.
#[must_use]
pub fn app_router(state: AppState) -> Router {
    let interval_ns = 1_000_000_000 / state.config.rate_limit.per_second.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_nanosecond(u64::from(interval_ns))
            .burst_size(state.config.rate_limit.burst)
            .key_extractor(state.rate_limit.extractor.clone())
            .finish()
            .expect("Failed to build rate limiter config"),
    );

    let api_routes = Router::new()
        .route("/threads", post(threads::create_thread))
        .route("/threads", get(threads::list_threads))
        .route("/threads/{threadId}", get(threads::get_thread))
        .route("/threads/{threadId}", delete(threads::delete_thread))
        .route("/threads/{threadId}/messages", get(threads::thread_messages))
        .route("/threads/{threadId}/read", post(threads::mark_thread_read))
        .route("/threads/{threadId}/archive", post(threads::archive_thread))
        .route("/threads/{threadId}/unarchive", post(threads::unarchive_thread))
        .route("/messages", post(messages::send_message))
        .route("/messages/{messageId}/read", post(messages::mark_message_read))
        .route("/messages/{messageId}/reactions", post(messages::add_reaction))
        .route("/messages/{messageId}", delete(messages::delete_message))
        .route("/unread", get(messages::unread_count))
        .layer(GovernorLayer::new(governor_conf))
        .layer(from_fn_with_state(state.clone(), rate_limit::log_rate_limit_events));

    Router::new()
        .nest("/v1", api_routes)
        .route("/v1/gateway", get(gateway::websocket_handler))
        .route("/healthz", get(health::healthz))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
