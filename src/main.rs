#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;
use tradeline_messaging::api::{AppState, app_router};
use tradeline_messaging::config::Config;
use tradeline_messaging::domain::tier::TierTable;
use tradeline_messaging::services::messaging_service::MessagingService;
use tradeline_messaging::services::moderation::{EscapingSanitizer, PermissiveSpamChecker, SpamOptions};
use tradeline_messaging::services::notifier::Notifier;
use tradeline_messaging::services::rate_limit_service::RateLimitService;
use tradeline_messaging::{storage, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    telemetry::init_telemetry(&config.telemetry)?;

    let boot_span = tracing::info_span!("boot_server");
    let (listener, router, shutdown_tx, shutdown_rx, gc_task) = async {
        let pool = storage::init_pool(&config.database_url).await?;
        tradeline_messaging::run_migrations(&pool).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tradeline_messaging::spawn_signal_handler(shutdown_tx.clone());

        let threads = Arc::new(storage::thread_repo::PgThreadStore::new(pool.clone()));
        let messages = Arc::new(storage::message_repo::PgMessageStore::new(pool.clone()));
        let notifier = Notifier::new(config.websocket.room_channel_capacity);

        let messaging = MessagingService::new(
            threads,
            messages,
            Arc::new(EscapingSanitizer),
            Arc::new(PermissiveSpamChecker),
            notifier.clone(),
            TierTable::default(),
            SpamOptions::default(),
            config.messaging.max_participants,
            config.messaging.page_limit,
        );

        let gc_task = spawn_room_gc(
            notifier,
            Duration::from_secs(config.websocket.room_gc_interval_secs),
            shutdown_rx.clone(),
        );

        let state = AppState {
            config: config.clone(),
            pool,
            messaging,
            rate_limit: RateLimitService::new(config.server.trusted_proxies.clone()),
            shutdown_rx: shutdown_rx.clone(),
        };
        let router = app_router(state);

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        tracing::info!(address = %addr, "listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;

        Ok::<_, anyhow::Error>((listener, router, shutdown_tx, shutdown_rx, gc_task))
    }
    .instrument(boot_span)
    .await?;

    let mut serve_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = serve_rx.wait_for(|&s| s).await;
        });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "Server error");
    }

    let _ = shutdown_tx.send(true);
    tokio::select! {
        _ = gc_task => {
            tracing::info!("Background tasks finished.");
        }
        () = tokio::time::sleep(Duration::from_secs(config.server.shutdown_timeout_secs)) => {
            tracing::warn!("Timeout waiting for background tasks to finish.");
        }
    }

    Ok(())
}

/// Periodically reclaims room channels with no live subscribers.
fn spawn_room_gc(
    notifier: Notifier,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => notifier.perform_gc(),
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
