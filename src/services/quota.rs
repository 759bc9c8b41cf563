use crate::domain::tier::TierLimits;
use crate::error::{AppError, Result};
use crate::storage::{MessageStore, ThreadStore};
use opentelemetry::{
    KeyValue, global,
    metrics::Counter,
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    fail_open_total: Counter<u64>,
    denied_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("tradeline-messaging");
        Self {
            fail_open_total: meter
                .u64_counter("tradeline_quota_fail_open_total")
                .with_description("Quota checks allowed because the underlying store failed")
                .build(),
            denied_total: meter
                .u64_counter("tradeline_quota_denied_total")
                .with_description("Actions denied by daily quota")
                .build(),
        }
    }
}

/// Daily message/thread quota checks against the caller's tier limits.
///
/// Policy: on a storage failure the check fails OPEN. Blocking users because
/// the database hiccuped is worse than a temporary quota bypass, so the error
/// is logged and counted, and the action is allowed. Quotas are therefore
/// best-effort, not billing-grade enforcement.
#[derive(Clone, Debug)]
pub struct QuotaLedger {
    threads: Arc<dyn ThreadStore>,
    messages: Arc<dyn MessageStore>,
    metrics: Metrics,
}

impl QuotaLedger {
    #[must_use]
    pub fn new(threads: Arc<dyn ThreadStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { threads, messages, metrics: Metrics::new() }
    }

    /// # Errors
    /// Returns `AppError::LimitExceeded` when the user is over their daily
    /// message allowance. Storage failures do not propagate (fail-open).
    pub async fn check_message_limit(&self, user_id: Uuid, limits: &TierLimits) -> Result<()> {
        if limits.messages_per_day == crate::domain::tier::UNLIMITED {
            return Ok(());
        }

        match self.messages.count_sent_since(user_id, start_of_today()).await {
            Ok(sent_today) => {
                if limits.allows_messages(sent_today) {
                    Ok(())
                } else {
                    self.metrics.denied_total.add(1, &[KeyValue::new("kind", "message")]);
                    Err(AppError::LimitExceeded(format!(
                        "daily message limit of {} reached",
                        limits.messages_per_day
                    )))
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, %user_id, "Message quota check failed, allowing (fail-open)");
                self.metrics.fail_open_total.add(1, &[KeyValue::new("kind", "message")]);
                Ok(())
            }
        }
    }

    /// # Errors
    /// Returns `AppError::LimitExceeded` when the user is over their daily
    /// thread allowance. Storage failures do not propagate (fail-open).
    pub async fn check_thread_limit(&self, user_id: Uuid, limits: &TierLimits) -> Result<()> {
        if limits.threads_per_day == crate::domain::tier::UNLIMITED {
            return Ok(());
        }

        match self.threads.count_created_since(user_id, start_of_today()).await {
            Ok(created_today) => {
                if limits.allows_threads(created_today) {
                    Ok(())
                } else {
                    self.metrics.denied_total.add(1, &[KeyValue::new("kind", "thread")]);
                    Err(AppError::LimitExceeded(format!(
                        "daily thread limit of {} reached",
                        limits.threads_per_day
                    )))
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, %user_id, "Thread quota check failed, allowing (fail-open)");
                self.metrics.fail_open_total.add(1, &[KeyValue::new("kind", "thread")]);
                Ok(())
            }
        }
    }
}

/// UTC day boundary used for all daily quotas.
#[must_use]
pub fn start_of_today() -> OffsetDateTime {
    OffsetDateTime::now_utc().replace_time(time::Time::MIDNIGHT)
}
