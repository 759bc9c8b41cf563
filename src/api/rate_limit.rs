use crate::api::AppState;
use axum::extract::State;
use axum::middleware::Next;
use axum::response::Response;
use std::time::{Duration, Instant};

/// Fixed-window event counter for one socket connection. State lives in the
/// connection task's memory; a clustered deployment needs a shared counter
/// with the same window semantics instead.
#[derive(Debug)]
pub struct FixedWindow {
    max_events: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl FixedWindow {
    #[must_use]
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self { max_events, window, window_start: Instant::now(), count: 0 }
    }

    /// Admits an event, rolling the window over when it has elapsed.
    pub fn try_admit(&mut self) -> bool {
        self.try_admit_at(Instant::now())
    }

    pub(crate) fn try_admit_at(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }

        if self.count < self.max_events {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

/// Response-side middleware recording HTTP rate-limit decisions.
pub async fn log_rate_limit_events(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    let retry_after =
        response.headers().get("x-ratelimit-after").and_then(|v| v.to_str().ok()).map(ToString::to_string);
    state.rate_limit.log_decision(response.status(), retry_after);

    response
}
