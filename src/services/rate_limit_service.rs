use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use ipnetwork::IpNetwork;
use opentelemetry::metrics::Counter;
use opentelemetry::{KeyValue, global};
use std::net::{IpAddr, SocketAddr};
use tower_governor::GovernorError;
use tower_governor::key_extractor::KeyExtractor;
use tracing::warn;

/// Governor key for the HTTP surface: one bucket per client IP.
///
/// `X-Forwarded-For` is only honored when the TCP peer is inside a trusted
/// proxy range, and the chain is walked right to left so clients cannot
/// smuggle an address of their choosing into the key.
#[derive(Clone, Debug)]
pub struct ClientIpKey {
    trusted_proxies: Vec<IpNetwork>,
}

impl ClientIpKey {
    #[must_use]
    pub const fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { trusted_proxies }
    }

    fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(ip))
    }

    /// Rightmost forwarded hop outside the trusted ranges, or the peer
    /// itself when the peer is untrusted or the header is unusable.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap, peer: IpAddr) -> IpAddr {
        if !self.is_trusted(peer) {
            return peer;
        }

        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|chain| {
                chain.rsplit(',').filter_map(|hop| hop.trim().parse::<IpAddr>().ok()).find(|ip| !self.is_trusted(*ip))
            })
            .unwrap_or(peer)
    }
}

impl KeyExtractor for ClientIpKey {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .ok_or(GovernorError::UnableToExtractKey)?;

        Ok(self.resolve(req.headers(), peer))
    }
}

/// IP-keyed rate limiting for the HTTP surface. The per-connection socket
/// limiter lives in the gateway; this covers everything in front of it.
#[derive(Clone, Debug)]
pub struct RateLimitService {
    pub extractor: ClientIpKey,
    decisions_total: Counter<u64>,
}

impl RateLimitService {
    #[must_use]
    pub fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        let decisions_total = global::meter("tradeline-messaging")
            .u64_counter("tradeline_http_rate_limit_decisions_total")
            .with_description("HTTP rate limit decisions (allowed/throttled)")
            .build();

        Self { extractor: ClientIpKey::new(trusted_proxies), decisions_total }
    }

    /// Records one per-request governor outcome. Throttled responses carry a
    /// `retry-after` value worth surfacing in the log line.
    pub fn log_decision(&self, status: StatusCode, retry_after: Option<String>) {
        let throttled = status == StatusCode::TOO_MANY_REQUESTS;
        if throttled && let Some(after) = retry_after {
            warn!("Rate limit exceeded (retry allowed after {after}s)");
        }

        let label = if throttled { "throttled" } else { "allowed" };
        self.decisions_total.add(1, &[KeyValue::new("status", label)]);
    }
}
