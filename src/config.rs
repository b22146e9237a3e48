//! Hub configuration loaded from environment variables.
//!
//! 12-factor style: every setting comes from the environment (or a `.env`
//! file via `dotenvy`) and falls back to a default when unset or invalid.
//! Only `LISTEN_ADDR` is strict.

use std::net::SocketAddr;
use std::time::Duration;

/// Which broker implementation bridges hub instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    /// In-process broker; no cross-process fan-out.
    Memory,
    /// Redis PUBLISH/SUBSCRIBE.
    Redis,
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level hub configuration.
///
/// Loaded once at startup via [`HubConfig::from_env`]; the
/// [`Default`] impl holds the same defaults and is what tests use.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Broker topic shared by every hub instance.
    pub topic: String,

    /// Capacity of the coordinator's inbound message queue.
    pub dispatch_capacity: usize,

    /// Capacity of each client's outbound queue. A client that falls this
    /// far behind is disconnected.
    pub client_send_buffer: usize,

    /// Largest inbound WebSocket message accepted, in bytes.
    pub ws_max_message_bytes: usize,

    /// Deadline for a single WebSocket write.
    pub ws_write_wait: Duration,

    /// How long the read side waits for any frame before declaring the
    /// peer dead.
    pub ws_pong_wait: Duration,

    /// Interval between server-initiated ping frames. Always shorter than
    /// `ws_pong_wait`.
    pub ws_ping_period: Duration,

    /// Interval between SSE `ping` events.
    pub sse_ping_interval: Duration,

    /// Deadline for one broker publish. A publish that takes longer is
    /// abandoned and the message stays local.
    pub broker_publish_timeout: Duration,

    /// Broker implementation.
    pub broker: BrokerKind,

    /// Redis connection URL, used when `broker` is [`BrokerKind::Redis`].
    pub redis_url: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            topic: "pulse:realtime".to_string(),
            dispatch_capacity: 256,
            client_send_buffer: 256,
            ws_max_message_bytes: 512,
            ws_write_wait: Duration::from_secs(10),
            ws_pong_wait: Duration::from_secs(60),
            ws_ping_period: Duration::from_secs(54),
            sse_ping_interval: Duration::from_secs(30),
            broker_publish_timeout: Duration::from_secs(5),
            broker: BrokerKind::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let topic = std::env::var("HUB_TOPIC")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(defaults.topic);

        let broker = match std::env::var("BROKER").ok().as_deref() {
            Some("redis") | Some("REDIS") => BrokerKind::Redis,
            _ => BrokerKind::Memory,
        };

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let config = Self {
            listen_addr,
            topic,
            dispatch_capacity: parse_env("HUB_DISPATCH_CAPACITY", defaults.dispatch_capacity),
            client_send_buffer: parse_env("CLIENT_SEND_BUFFER", defaults.client_send_buffer),
            ws_max_message_bytes: parse_env("WS_MAX_MESSAGE_BYTES", defaults.ws_max_message_bytes),
            ws_write_wait: parse_secs("WS_WRITE_WAIT_SECS", defaults.ws_write_wait),
            ws_pong_wait: parse_secs("WS_PONG_WAIT_SECS", defaults.ws_pong_wait),
            ws_ping_period: parse_secs("WS_PING_PERIOD_SECS", defaults.ws_ping_period),
            sse_ping_interval: parse_secs("SSE_PING_SECS", defaults.sse_ping_interval),
            broker_publish_timeout: parse_secs(
                "BROKER_PUBLISH_TIMEOUT_SECS",
                defaults.broker_publish_timeout,
            ),
            broker,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            log_format,
        };
        Ok(config.normalized())
    }

    /// Clamps settings that would break the keepalive protocol.
    ///
    /// The ping period is forced below the pong wait (to 9/10 of it) so a
    /// healthy peer always answers before its read deadline expires, and
    /// zero capacities and intervals are raised to usable minimums.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.dispatch_capacity = self.dispatch_capacity.max(1);
        self.client_send_buffer = self.client_send_buffer.max(1);
        self.ws_pong_wait = self.ws_pong_wait.max(Duration::from_millis(10));
        if self.ws_ping_period.is_zero() || self.ws_ping_period >= self.ws_pong_wait {
            self.ws_ping_period = self.ws_pong_wait * 9 / 10;
        }
        if self.sse_ping_interval.is_zero() {
            self.sse_ping_interval = Duration::from_secs(30);
        }
        if self.broker_publish_timeout.is_zero() {
            self.broker_publish_timeout = Duration::from_secs(5);
        }
        self
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding whole seconds.
fn parse_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_ping_inside_pong_wait() {
        let config = HubConfig::default().normalized();
        assert_eq!(config.ws_ping_period, Duration::from_secs(54));
        assert!(config.ws_ping_period < config.ws_pong_wait);
        assert_eq!(config.client_send_buffer, 256);
        assert_eq!(config.ws_max_message_bytes, 512);
    }

    #[test]
    fn ping_period_is_clamped_below_pong_wait() {
        let config = HubConfig {
            ws_pong_wait: Duration::from_secs(10),
            ws_ping_period: Duration::from_secs(30),
            ..HubConfig::default()
        }
        .normalized();
        assert_eq!(config.ws_ping_period, Duration::from_secs(9));
    }

    #[test]
    fn zero_buffers_are_raised() {
        let config = HubConfig {
            dispatch_capacity: 0,
            client_send_buffer: 0,
            ..HubConfig::default()
        }
        .normalized();
        assert_eq!(config.dispatch_capacity, 1);
        assert_eq!(config.client_send_buffer, 1);
    }

    #[test]
    fn zero_publish_timeout_falls_back_to_default() {
        let config = HubConfig {
            broker_publish_timeout: Duration::ZERO,
            ..HubConfig::default()
        }
        .normalized();
        assert_eq!(config.broker_publish_timeout, Duration::from_secs(5));
    }
}
