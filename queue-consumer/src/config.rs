use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

/// Fallback poll backoff, applied when the configured value is zero.
const DEFAULT_BACKOFF: Duration = Duration::from_millis(8000);

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "3320")]
    pub bind_port: u16,

    /// Base URL of the queue proxy, e.g. http://localhost:8082.
    #[envconfig(from = "QUEUE_PROXY_URL", default = "http://localhost:8082")]
    pub queue_proxy_url: String,

    /// Consumer group to create instances under.
    #[envconfig(from = "GROUP_NAME", default = "queue-consumer")]
    pub group_name: String,

    #[envconfig(from = "TOPIC", default = "events")]
    pub topic: String,

    /// Host header override for proxies reached through a routing tier.
    /// Unset means requests go to the proxy URL as-is.
    #[envconfig(from = "QUEUE_HOST")]
    pub queue_host: Option<String>,

    #[envconfig(from = "BACKOFF_PERIOD_MS", default = "8000")]
    pub backoff_period: EnvMsDuration,

    #[envconfig(from = "STREAM_COUNT", default = "1")]
    pub stream_count: usize,

    /// When enabled the proxy advances offsets as part of fetching and the
    /// consumer never commits explicitly.
    #[envconfig(from = "AUTO_COMMIT", default = "false")]
    pub auto_commit: bool,

    /// Passed through to the proxy on instance creation; the proxy rejects
    /// values outside its supported set.
    #[envconfig(from = "OFFSET_RESET", default = "latest")]
    pub offset_reset: String,

    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "30000")]
    pub request_timeout: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Validated runtime view of the polling knobs.
    pub fn stream_settings(&self) -> StreamSettings {
        let backoff = if self.backoff_period.0.is_zero() {
            DEFAULT_BACKOFF
        } else {
            self.backoff_period.0
        };
        StreamSettings {
            backoff,
            stream_count: self.stream_count.max(1),
            auto_commit: self.auto_commit,
        }
    }
}

/// Immutable per-supervisor settings, shared by every stream it runs.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Delay after an empty poll or a reset. Always non-zero.
    pub backoff: Duration,
    /// Number of independent poll loops. At least one.
    pub stream_count: usize,
    pub auto_commit: bool,
}

/// Millisecond duration parsed from an env var.
#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(backoff_ms: u64, stream_count: usize) -> Config {
        Config {
            bind_host: "::".to_string(),
            bind_port: 3320,
            queue_proxy_url: "http://localhost:8082".to_string(),
            group_name: "ingester".to_string(),
            topic: "events".to_string(),
            queue_host: None,
            backoff_period: EnvMsDuration(Duration::from_millis(backoff_ms)),
            stream_count,
            auto_commit: false,
            offset_reset: "latest".to_string(),
            request_timeout: EnvMsDuration(Duration::from_millis(30000)),
        }
    }

    #[test]
    fn zero_backoff_falls_back_to_the_default() {
        let settings = config_with(0, 1).stream_settings();
        assert_eq!(settings.backoff, Duration::from_millis(8000));

        let settings = config_with(500, 1).stream_settings();
        assert_eq!(settings.backoff, Duration::from_millis(500));
    }

    #[test]
    fn stream_count_has_a_floor_of_one() {
        assert_eq!(config_with(100, 0).stream_settings().stream_count, 1);
        assert_eq!(config_with(100, 5).stream_settings().stream_count, 5);
    }

    #[test]
    fn env_ms_duration_parses_milliseconds() {
        let parsed = "250".parse::<EnvMsDuration>().expect("should parse");
        assert_eq!(parsed.0, Duration::from_millis(250));

        assert!("not-a-number".parse::<EnvMsDuration>().is_err());
    }

    #[test]
    fn bind_joins_host_and_port() {
        assert_eq!(config_with(100, 1).bind(), ":::3320");
    }
}
