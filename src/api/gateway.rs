use crate::api::AppState;
use crate::api::rate_limit::FixedWindow;
use crate::domain::event::{ClientEvent, ServerEvent, validate_event_shape};
use crate::domain::message::NewMessage;
use crate::error::{AppError, AuthFailure};
use crate::services::auth::{Identity, Role, bearer_from_sources, require_role, verify_bearer};
use crate::services::notifier::Room;
use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use opentelemetry::{KeyValue, global, metrics::Counter};
use serde::Deserialize;
use std::time::Duration;
use tokio_stream::{StreamMap, wrappers::BroadcastStream, wrappers::errors::BroadcastStreamRecvError};
use tracing::{Instrument, warn};
use uuid::Uuid;

/// Roles allowed to hold a gateway connection.
const GATEWAY_ROLES: &[Role] = &[Role::Buyer, Role::Seller, Role::Admin];

type WsSink = SplitSink<WebSocket, WsMessage>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Upgrades a connection to the real-time gateway. A credential presented at
/// the handshake (query parameter or Authorization header) is verified before
/// upgrading; a connection without one gets a bounded window to send an
/// `auth` event in-band.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let header_token =
        headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(ToString::to_string);

    let handshake_identity = match bearer_from_sources(None, params.token.as_deref(), header_token.as_deref()) {
        Ok(token) => match verify_bearer(&token, &state.config.auth.jwt_secret) {
            Ok(identity) => Some(identity),
            Err(failure) => {
                warn!(%failure, "WebSocket handshake rejected");
                return AppError::Authentication(failure).into_response();
            }
        },
        Err(AuthFailure::MissingCredential) => None,
        Err(failure) => return AppError::Authentication(failure).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, handshake_identity))
}

/// One loop turn: either an inbound client frame, an outbound room event,
/// or a lifecycle signal.
enum Step {
    Inbound(String),
    Outbound(Room, Result<ServerEvent, BroadcastStreamRecvError>),
    Shutdown,
    Closed,
    Ignore,
}

async fn handle_socket(socket: WebSocket, state: AppState, handshake_identity: Option<Identity>) {
    let span = tracing::info_span!(
        "websocket_session",
        otel.kind = "server",
        ws.session_id = %Uuid::new_v4(),
        user_id = tracing::field::Empty
    );

    async move {
        let (mut ws_sink, mut ws_stream) = socket.split();

        let identity = match handshake_identity {
            Some(identity) => identity,
            None => match await_inband_auth(&mut ws_sink, &mut ws_stream, &state).await {
                Some(identity) => identity,
                None => return,
            },
        };
        tracing::Span::current().record("user_id", tracing::field::display(identity.id));

        if let Err(failure) = require_role(&identity, GATEWAY_ROLES) {
            let _ = send_error(&mut ws_sink, &AppError::Authentication(failure)).await;
            let _ = ws_sink.close().await;
            return;
        }

        let meter = global::meter("tradeline-messaging");
        let active_connections = meter
            .i64_up_down_counter("tradeline_ws_active_connections")
            .with_description("Number of active WebSocket connections")
            .build();
        let events_total = meter
            .u64_counter("tradeline_ws_events_total")
            .with_description("Inbound socket events accepted, by type")
            .build();
        let throttled_total = meter
            .u64_counter("tradeline_ws_events_throttled_total")
            .with_description("Inbound socket events rejected by the per-connection window")
            .build();

        active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let notifier = state.messaging.notifier().clone();
        let mut rooms: StreamMap<Room, BroadcastStream<ServerEvent>> = StreamMap::new();
        let user_room = Room::User(identity.id);
        rooms.insert(user_room, BroadcastStream::new(notifier.subscribe(user_room)));

        let _ = send_event(&mut ws_sink, &ServerEvent::AuthSuccess { user_id: identity.id }).await;

        let mut limiter = FixedWindow::new(
            state.config.rate_limit.socket_events_per_window,
            Duration::from_secs(state.config.rate_limit.socket_window_secs),
        );
        let mut shutdown_rx = state.shutdown_rx.clone();

        loop {
            let step = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() { Step::Shutdown } else { Step::Ignore }
                }

                msg = ws_stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => Step::Inbound(text.to_string()),
                    Some(Ok(WsMessage::Close(_))) | None => Step::Closed,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        Step::Closed
                    }
                    _ => Step::Ignore,
                },

                Some((room, event)) = rooms.next() => Step::Outbound(room, event),
            };

            match step {
                Step::Shutdown => {
                    tracing::info!("Shutdown signal received, closing WebSocket");
                    let _ = ws_sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "Server shutting down".into(),
                        })))
                        .await;
                    break;
                }
                Step::Closed => break,
                Step::Ignore => {}
                Step::Inbound(text) => {
                    if limiter.try_admit() {
                        handle_client_frame(&text, &state, &identity, &mut ws_sink, &mut rooms, &events_total)
                            .await;
                    } else {
                        throttled_total.add(1, &[]);
                        if send_error(&mut ws_sink, &AppError::RateLimited).await.is_err() {
                            break;
                        }
                    }
                }
                Step::Outbound(room, result) => match result {
                    Ok(event) => {
                        if should_forward(&event, identity.id)
                            && send_event(&mut ws_sink, &event).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        // At-most-once delivery: lagged events are gone; the
                        // client re-syncs through the list/read path.
                        warn!(?room, skipped, "Room subscriber lagged, events dropped");
                    }
                },
            }
        }

        let _ = ws_sink.close().await;
        active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
    .instrument(span)
    .await;
}

/// Waits for the first frame to be a valid `auth` event, bounded by the
/// configured deadline.
async fn await_inband_auth(ws_sink: &mut WsSink, ws_stream: &mut WsStream, state: &AppState) -> Option<Identity> {
    let deadline = Duration::from_secs(state.config.auth.socket_auth_timeout_secs);

    let frame = match tokio::time::timeout(deadline, ws_stream.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => text,
        Ok(_) => {
            let _ = send_error(ws_sink, &AppError::Authentication(AuthFailure::MissingCredential)).await;
            let _ = ws_sink.close().await;
            return None;
        }
        Err(_) => {
            tracing::debug!("Socket authentication deadline elapsed");
            let _ = send_error(ws_sink, &AppError::Authentication(AuthFailure::MissingCredential)).await;
            let _ = ws_sink.close().await;
            return None;
        }
    };

    let token = match serde_json::from_str::<ClientEvent>(frame.as_str()) {
        Ok(ClientEvent::Auth { token }) => token,
        _ => {
            let _ = send_error(ws_sink, &AppError::Authentication(AuthFailure::MissingCredential)).await;
            let _ = ws_sink.close().await;
            return None;
        }
    };

    match verify_bearer(&token, &state.config.auth.jwt_secret) {
        Ok(identity) => Some(identity),
        Err(failure) => {
            let _ = send_error(ws_sink, &AppError::Authentication(failure)).await;
            let _ = ws_sink.close().await;
            None
        }
    }
}

async fn handle_client_frame(
    text: &str,
    state: &AppState,
    identity: &Identity,
    ws_sink: &mut WsSink,
    rooms: &mut StreamMap<Room, BroadcastStream<ServerEvent>>,
    events_total: &Counter<u64>,
) {
    let Ok(raw) = serde_json::from_str::<serde_json::Value>(text) else {
        let _ = send_error(ws_sink, &AppError::Validation("payload is not valid JSON".to_string())).await;
        return;
    };

    if let Err(reason) = validate_event_shape(&raw) {
        let _ = send_error(ws_sink, &AppError::Validation(reason)).await;
        return;
    }

    let event = match serde_json::from_value::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            let _ = send_error(ws_sink, &AppError::Validation(format!("malformed event: {e}"))).await;
            return;
        }
    };

    events_total.add(1, &[KeyValue::new("event", event_label(&event))]);
    let notifier = state.messaging.notifier();

    match event {
        ClientEvent::Auth { token } => {
            // Re-authentication refreshes an expiring credential; switching
            // identity mid-connection is not allowed.
            match verify_bearer(&token, &state.config.auth.jwt_secret) {
                Ok(refreshed) if refreshed.id == identity.id => {
                    let _ = send_event(ws_sink, &ServerEvent::AuthSuccess { user_id: identity.id }).await;
                }
                Ok(_) => {
                    let _ = send_error(ws_sink, &AppError::Authentication(AuthFailure::Invalid)).await;
                }
                Err(failure) => {
                    let _ = send_error(ws_sink, &AppError::Authentication(failure)).await;
                }
            }
        }
        ClientEvent::Join { thread_id } => match state.messaging.get_thread(thread_id, identity.id).await {
            Ok(_) => {
                let room = Room::Thread(thread_id);
                rooms.insert(room, BroadcastStream::new(notifier.subscribe(room)));
            }
            Err(e) => {
                let _ = send_error(ws_sink, &e).await;
            }
        },
        ClientEvent::Leave { thread_id } => {
            let _ = rooms.remove(&Room::Thread(thread_id));
        }
        ClientEvent::MessageSend { thread_id, content, is_draft } => {
            // Sockets bypass the HTTP middleware; scrub transport noise here.
            // Escaping itself happens once, in the shared send pipeline.
            let content = scrub_control_chars(&content);
            let data = NewMessage { thread_id, sender_id: identity.id, content, is_draft };

            match state.messaging.send_message(data, identity.tier).await {
                Ok(message) => {
                    // Delivery confirmation for the sending connection; the
                    // recipients were notified by the service fan-out.
                    let _ = send_event(ws_sink, &ServerEvent::MessageReceived { message }).await;
                }
                Err(e) => {
                    let _ = send_error(ws_sink, &e).await;
                }
            }
        }
        ClientEvent::TypingStart { thread_id } => {
            relay_typing(state, identity, ws_sink, thread_id, true).await;
        }
        ClientEvent::TypingStop { thread_id } => {
            relay_typing(state, identity, ws_sink, thread_id, false).await;
        }
    }
}

/// Ephemeral typing relay. Membership is checked, nothing persists.
async fn relay_typing(state: &AppState, identity: &Identity, ws_sink: &mut WsSink, thread_id: Uuid, started: bool) {
    if let Err(e) = state.messaging.get_thread(thread_id, identity.id).await {
        let _ = send_error(ws_sink, &e).await;
        return;
    }

    let event = if started {
        ServerEvent::TypingStarted { thread_id, user_id: identity.id }
    } else {
        ServerEvent::TypingStopped { thread_id, user_id: identity.id }
    };
    state.messaging.notifier().notify(Room::Thread(thread_id), event);
}

/// A connection never receives its own typing echoes.
fn should_forward(event: &ServerEvent, self_id: Uuid) -> bool {
    match event {
        ServerEvent::TypingStarted { user_id, .. } | ServerEvent::TypingStopped { user_id, .. } => {
            *user_id != self_id
        }
        _ => true,
    }
}

fn scrub_control_chars(content: &str) -> String {
    content.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect()
}

const fn event_label(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Auth { .. } => "auth",
        ClientEvent::Join { .. } => "join",
        ClientEvent::Leave { .. } => "leave",
        ClientEvent::MessageSend { .. } => "message:send",
        ClientEvent::TypingStart { .. } => "typing:start",
        ClientEvent::TypingStop { .. } => "typing:stop",
    }
}

async fn send_event(ws_sink: &mut WsSink, event: &ServerEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => ws_sink.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            Ok(())
        }
    }
}

async fn send_error(ws_sink: &mut WsSink, error: &AppError) -> Result<(), axum::Error> {
    send_event(ws_sink, &ServerEvent::Error { code: error.code().to_string(), message: error.public_message() })
        .await
}
