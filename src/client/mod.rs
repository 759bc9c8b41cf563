//! Client-side transport for the real-time gateway: connects, authenticates,
//! and reconnects under failure with bounded exponential backoff. Higher
//! level code subscribes to named events through the listener registry and
//! never touches the socket directly.

use crate::domain::event::ClientEvent;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Deterministic exponential backoff: `base * 2^(attempt - 1)`.
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2_u32.saturating_pow(attempt.saturating_sub(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Sleep this long, then attempt again.
    Delay(Duration),
    /// Stop retrying; surface the degraded-mode notice if not already shown.
    GiveUp { notify: bool },
}

/// Pure reconnection state machine. One instance tracks one outage: the
/// consecutive-failure counter and whether the user has been told about
/// degraded mode.
#[derive(Debug)]
pub struct RetryPolicy {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
    notified: bool,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts, attempts: 0, notified: false }
    }

    /// Records a failed connection attempt and decides what happens next.
    pub fn on_failure(&mut self) -> RetryAction {
        self.attempts += 1;
        if self.attempts > self.max_attempts {
            let notify = !self.notified;
            self.notified = true;
            RetryAction::GiveUp { notify }
        } else {
            RetryAction::Delay(backoff_delay(self.base, self.attempts))
        }
    }

    /// A live connection resets the counter and the notice flag.
    pub const fn on_success(&mut self) {
        self.attempts = 0;
        self.notified = false;
    }

    /// External trigger (page reload, manual retry button): attempts reset,
    /// but the notice flag holds until a connection actually succeeds so one
    /// outage produces one notice.
    pub const fn on_manual_retry(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway URL, e.g. `ws://host:3000/v1/gateway`.
    pub url: String,
    pub base_backoff: Duration,
    pub max_attempts: u32,
}

impl ClientConfig {
    #[must_use]
    pub const fn new(url: String) -> Self {
        Self { url, base_backoff: DEFAULT_BASE_BACKOFF, max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

type ListenerMap = HashMap<String, Vec<mpsc::UnboundedSender<serde_json::Value>>>;

/// Reconnecting gateway client.
#[derive(Debug)]
pub struct ReconnectingClient {
    config: ClientConfig,
    token: Mutex<String>,
    listeners: Arc<std::sync::Mutex<ListenerMap>>,
    notices: Arc<std::sync::Mutex<Vec<mpsc::UnboundedSender<String>>>>,
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<ClientEvent>>,
    retry_tx: mpsc::UnboundedSender<()>,
    retry_rx: Mutex<mpsc::UnboundedReceiver<()>>,
}

impl ReconnectingClient {
    #[must_use]
    pub fn new(config: ClientConfig, token: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            config,
            token: Mutex::new(token),
            listeners: Arc::new(std::sync::Mutex::new(HashMap::new())),
            notices: Arc::new(std::sync::Mutex::new(Vec::new())),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            retry_tx,
            retry_rx: Mutex::new(retry_rx),
        }
    }

    /// Subscribes to a named server event (`message:received`, `typing:started`,
    /// ...). Dropping the receiver unsubscribes.
    pub fn on(&self, event: &str) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.entry(event.to_string()).or_default().push(tx);
        }
        rx
    }

    /// Removes every listener for the named event.
    pub fn off(&self, event: &str) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(event);
        }
    }

    /// One-line user-facing notices ("falling back to degraded mode").
    pub fn notices(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(tx);
        }
        rx
    }

    /// Queues an event for the gateway; delivered once a connection is live.
    pub fn send(&self, event: ClientEvent) {
        let _ = self.outbound_tx.send(event);
    }

    /// Replaces the session credential used for (re-)authentication.
    pub async fn set_token(&self, token: String) {
        *self.token.lock().await = token;
    }

    /// External trigger to resume after degraded mode.
    pub fn retry_now(&self) {
        let _ = self.retry_tx.send(());
    }

    /// Drives the connection until the task is dropped. Never returns under
    /// normal operation.
    pub async fn run(&self) {
        let mut policy = RetryPolicy::new(self.config.base_backoff, self.config.max_attempts);

        loop {
            match self.connect_and_drive(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Gateway connection closed, scheduling reconnect");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Gateway connection failed");
                }
            }

            match policy.on_failure() {
                RetryAction::Delay(delay) => {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off before reconnect");
                    tokio::time::sleep(delay).await;
                }
                RetryAction::GiveUp { notify } => {
                    if notify {
                        self.emit_notice("Connection lost, falling back to degraded mode");
                    }
                    // Retries stop until something external pokes us.
                    let mut retry_rx = self.retry_rx.lock().await;
                    if retry_rx.recv().await.is_none() {
                        return;
                    }
                    drop(retry_rx);
                    policy.on_manual_retry();
                }
            }
        }
    }

    async fn connect_and_drive(&self, policy: &mut RetryPolicy) -> anyhow::Result<()> {
        let (ws, _) = connect_async(self.config.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();

        // Re-authenticate with the current session identity on every connect.
        let token = self.token.lock().await.clone();
        let auth = serde_json::to_string(&ClientEvent::Auth { token })?;
        sink.send(WsMessage::Text(auth.into())).await?;

        policy.on_success();
        tracing::info!("Gateway connected");

        let mut outbound_rx = self.outbound_rx.lock().await;

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                },
                event = outbound_rx.recv() => {
                    if let Some(event) = event {
                        let json = serde_json::to_string(&event)?;
                        sink.send(WsMessage::Text(json.into())).await?;
                    }
                }
            }
        }
    }

    /// Routes an inbound frame to the listeners registered for its type,
    /// pruning listeners whose receivers are gone.
    fn dispatch(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            tracing::debug!("Dropping non-JSON gateway frame");
            return;
        };
        let Some(event_type) = value.get("type").and_then(serde_json::Value::as_str).map(ToString::to_string)
        else {
            return;
        };

        if let Ok(mut listeners) = self.listeners.lock()
            && let Some(subscribers) = listeners.get_mut(&event_type)
        {
            subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    fn emit_notice(&self, notice: &str) {
        tracing::warn!("{notice}");
        if let Ok(mut notices) = self.notices.lock() {
            notices.retain(|tx| tx.send(notice.to_string()).is_ok());
        }
    }
}
