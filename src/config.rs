use clap::{Args, Parser, ValueEnum};
use ipnetwork::IpNetwork;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "TRADELINE_DATABASE_URL")]
    pub database_url: String,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    #[command(flatten)]
    pub messaging: MessagingConfig,

    #[command(flatten)]
    pub websocket: WsConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "TRADELINE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "TRADELINE_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Seconds to wait for background tasks during shutdown
    #[arg(long, env = "TRADELINE_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Comma-separated list of CIDRs to trust for X-Forwarded-For IP extraction
    #[arg(
        long,
        env = "TRADELINE_TRUSTED_PROXIES",
        default_value = "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16,127.0.0.1/32",
        value_delimiter = ','
    )]
    pub trusted_proxies: Vec<IpNetwork>,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret key for JWT signing
    #[arg(long, env = "TRADELINE_JWT_SECRET")]
    pub jwt_secret: String,

    /// Seconds a socket may stay connected before presenting a credential
    #[arg(long, env = "TRADELINE_SOCKET_AUTH_TIMEOUT_SECS", default_value_t = 10)]
    pub socket_auth_timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct RateLimitConfig {
    /// Requests per second allowed per client IP on the HTTP surface
    #[arg(long, env = "TRADELINE_RATE_LIMIT_PER_SECOND", default_value_t = 10)]
    pub per_second: u32,

    /// Burst allowance per client IP on the HTTP surface
    #[arg(long, env = "TRADELINE_RATE_LIMIT_BURST", default_value_t = 20)]
    pub burst: u32,

    /// Events allowed per socket connection within one window
    #[arg(long, env = "TRADELINE_SOCKET_EVENTS_PER_WINDOW", default_value_t = 100)]
    pub socket_events_per_window: u32,

    /// Length of the socket fixed window in seconds
    #[arg(long, env = "TRADELINE_SOCKET_WINDOW_SECS", default_value_t = 60)]
    pub socket_window_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct MessagingConfig {
    /// Maximum participants allowed in a single thread
    #[arg(long, env = "TRADELINE_MAX_PARTICIPANTS", default_value_t = 8)]
    pub max_participants: usize,

    /// Default page size when listing thread messages
    #[arg(long, env = "TRADELINE_MESSAGE_PAGE_LIMIT", default_value_t = 50)]
    pub page_limit: i64,
}

#[derive(Clone, Debug, Args)]
pub struct WsConfig {
    /// Size of the outbound message buffer per connection
    #[arg(long, env = "TRADELINE_WS_OUTBOUND_BUFFER_SIZE", default_value_t = 32)]
    pub outbound_buffer_size: usize,

    /// Capacity of each room's broadcast channel
    #[arg(long, env = "TRADELINE_WS_ROOM_CAPACITY", default_value_t = 16)]
    pub room_channel_capacity: usize,

    /// How often to reclaim rooms with no live subscribers
    #[arg(long, env = "TRADELINE_WS_ROOM_GC_INTERVAL_SECS", default_value_t = 60)]
    pub room_gc_interval_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP endpoint for traces and metrics; telemetry export is disabled when unset
    #[arg(long, env = "TRADELINE_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "TRADELINE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}
