use std::time::Duration;

use crate::coalescer::FlushTick;
use crate::errors::StreamError;
use crate::registry::ActivePolicy;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_MODEL: &str = "qwen2.5:7b";

/// Messages sent upstream per chat request. Sized for small local inference
/// hardware.
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// Configuration for the dashboard API client and stream coordinator.
#[derive(Clone, Debug)]
pub struct DashboardConfig {
    /// Base URL of the dashboard API server.
    pub base_url: String,
    /// Connect timeout for streaming calls and total timeout for JSON calls.
    pub timeout: Duration,
    /// Model used when the caller does not name one.
    pub default_model: String,
    /// Maximum number of history messages sent with each chat request.
    pub context_window: usize,
    /// How often buffered stream text is delivered to targets.
    pub flush_tick: FlushTick,
    /// What happens when a second session starts on a busy target.
    pub active_policy: ActivePolicy,
    /// Interval between status poller rounds.
    pub poll_interval: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            default_model: DEFAULT_MODEL.to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            flush_tick: FlushTick::default(),
            active_policy: ActivePolicy::default(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl DashboardConfig {
    /// Creates a config pointing at the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from the process environment.
    ///
    /// Environment variables:
    /// - `DASHBOARD_API_URL`: API base URL.
    /// - `DASHBOARD_MODEL`: default chat/pull model.
    /// - `DASHBOARD_CONTEXT_WINDOW`: history messages sent upstream.
    /// - `DASHBOARD_FLUSH_MS`: flush tick in milliseconds (`0` flushes on the next scheduler turn).
    /// - `DASHBOARD_POLL_SECS`: status poll interval.
    /// - `DASHBOARD_ACTIVE_POLICY`: `reject` or `cancel-previous`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StreamError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("DASHBOARD_API_URL") {
            config.base_url = url.trim().to_string();
        }
        if let Some(model) = get("DASHBOARD_MODEL") {
            config.default_model = model.trim().to_string();
        }
        if let Some(raw) = get("DASHBOARD_CONTEXT_WINDOW") {
            config.context_window = parse_number("DASHBOARD_CONTEXT_WINDOW", &raw)?;
        }
        if let Some(raw) = get("DASHBOARD_FLUSH_MS") {
            let millis: u64 = parse_number("DASHBOARD_FLUSH_MS", &raw)?;
            config.flush_tick = FlushTick::from_millis(millis);
        }
        if let Some(raw) = get("DASHBOARD_POLL_SECS") {
            config.poll_interval = Duration::from_secs(parse_number("DASHBOARD_POLL_SECS", &raw)?);
        }
        if let Some(raw) = get("DASHBOARD_ACTIVE_POLICY") {
            config.active_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the default model.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Overrides the context window size.
    pub fn context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    /// Overrides the flush tick.
    pub fn flush_tick(mut self, tick: FlushTick) -> Self {
        self.flush_tick = tick;
        self
    }

    /// Overrides the busy-target policy.
    pub fn active_policy(mut self, policy: ActivePolicy) -> Self {
        self.active_policy = policy;
        self
    }

    /// Overrides the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks values that would make the coordinator unusable.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(StreamError::Config(format!(
                "base_url must start with http:// or https:// (got {:?})",
                self.base_url
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(StreamError::Config("default_model must not be empty".into()));
        }
        if self.context_window == 0 {
            return Err(StreamError::Config(
                "context_window must be greater than 0".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(StreamError::Config(
                "poll_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, StreamError> {
    raw.trim()
        .parse()
        .map_err(|_| StreamError::Config(format!("{key} must be a non-negative integer (got {raw:?})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = DashboardConfig::default();
        config.validate().expect("defaults");
        assert_eq!(config.context_window, 10);
        assert_eq!(config.flush_tick, FlushTick::Interval(Duration::from_millis(16)));
        assert_eq!(config.active_policy, ActivePolicy::CancelPrevious);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = DashboardConfig::from_lookup(lookup(&[
            ("DASHBOARD_API_URL", "https://box.lan"),
            ("DASHBOARD_MODEL", "deepseek-r1:14b"),
            ("DASHBOARD_CONTEXT_WINDOW", "4"),
            ("DASHBOARD_FLUSH_MS", "0"),
            ("DASHBOARD_POLL_SECS", "30"),
            ("DASHBOARD_ACTIVE_POLICY", "reject"),
        ]))
        .expect("config");
        assert_eq!(config.base_url, "https://box.lan");
        assert_eq!(config.default_model, "deepseek-r1:14b");
        assert_eq!(config.context_window, 4);
        assert_eq!(config.flush_tick, FlushTick::NextTurn);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.active_policy, ActivePolicy::Reject);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            DashboardConfig::from_lookup(lookup(&[("DASHBOARD_MODEL", "  ")])).expect("config");
        assert_eq!(config.default_model, DEFAULT_MODEL);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = DashboardConfig::from_lookup(lookup(&[("DASHBOARD_CONTEXT_WINDOW", "ten")]))
            .expect_err("non-numeric");
        assert!(matches!(err, StreamError::Config(msg) if msg.contains("DASHBOARD_CONTEXT_WINDOW")));

        let err = DashboardConfig::from_lookup(lookup(&[("DASHBOARD_CONTEXT_WINDOW", "0")]))
            .expect_err("zero window");
        assert!(matches!(err, StreamError::Config(msg) if msg.contains("context_window")));

        let err = DashboardConfig::from_lookup(lookup(&[("DASHBOARD_API_URL", "box.lan")]))
            .expect_err("scheme");
        assert!(matches!(err, StreamError::Config(msg) if msg.contains("base_url")));
    }
}
