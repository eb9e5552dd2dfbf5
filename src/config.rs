use std::path::PathBuf;
use std::time::Duration;

use crate::api::particle::DEFAULT_API_BASE;
use crate::stream::{AuthMode, Framing};
use crate::token::TokenStore;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub token: Option<String>,
    pub token_file: PathBuf,
    pub device_name: String,
    pub event_name: String,
    pub export_event: String,
    pub export_header: String,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub poll_secs: u64,
    pub stale_secs: u64,
    pub export_quiet_secs: u64,
    pub stream_auth: AuthMode,
    pub framing: Framing,
    pub http_timeout_secs: u64,
    pub runtime_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            token_file: TokenStore::default_path(),
            device_name: "grey_fox_1".to_string(),
            event_name: "status".to_string(),
            export_event: "logRow".to_string(),
            export_header: "idx,ts,battPct,battV,sigPct".to_string(),
            backoff_initial_ms: 1500,
            backoff_max_ms: 30_000,
            poll_secs: 60,
            stale_secs: 15,
            export_quiet_secs: 15,
            stream_auth: AuthMode::Header,
            framing: Framing::BlankLine,
            http_timeout_secs: 10,
            runtime_window_secs: 6 * 3600,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        let cfg = Self {
            api_base: std::env::var("PARTICLE_API").unwrap_or(d.api_base),
            token: std::env::var("PARTICLE_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            token_file: std::env::var("TOKEN_FILE").map(PathBuf::from).unwrap_or(d.token_file),
            device_name: std::env::var("DEVICE_NAME").unwrap_or(d.device_name),
            event_name: std::env::var("EVENT_NAME").unwrap_or(d.event_name),
            export_event: std::env::var("EXPORT_EVENT").unwrap_or(d.export_event),
            export_header: std::env::var("EXPORT_HEADER").unwrap_or(d.export_header),
            backoff_initial_ms: std::env::var("BACKOFF_INITIAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.backoff_initial_ms),
            backoff_max_ms: std::env::var("BACKOFF_MAX_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.backoff_max_ms),
            poll_secs: std::env::var("POLL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.poll_secs),
            stale_secs: std::env::var("STALE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.stale_secs),
            export_quiet_secs: std::env::var("EXPORT_QUIET_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.export_quiet_secs),
            stream_auth: std::env::var("STREAM_AUTH").ok().and_then(|v| AuthMode::parse(&v)).unwrap_or(d.stream_auth),
            framing: std::env::var("STREAM_FRAMING").ok().and_then(|v| Framing::parse(&v)).unwrap_or(d.framing),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.http_timeout_secs),
            runtime_window_secs: std::env::var("RUNTIME_WINDOW_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.runtime_window_secs),
        };
        cfg.normalized()
    }

    /// Clamp tunables into the ranges the client is designed for.
    pub fn normalized(mut self) -> Self {
        self.stale_secs = self.stale_secs.clamp(15, 20);
        self.export_quiet_secs = self.export_quiet_secs.clamp(8, 30);
        self.poll_secs = self.poll_secs.max(1);
        self.backoff_initial_ms = self.backoff_initial_ms.max(1);
        self.backoff_max_ms = self.backoff_max_ms.max(self.backoff_initial_ms);
        self.http_timeout_secs = self.http_timeout_secs.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn stale_window(&self) -> Duration {
        Duration::from_secs(self.stale_secs)
    }

    pub fn export_quiet(&self) -> Duration {
        Duration::from_secs(self.export_quiet_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn runtime_window(&self) -> Duration {
        Duration::from_secs(self.runtime_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.backoff_initial_ms, 1500);
        assert_eq!(cfg.backoff_max_ms, 30_000);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(60));
        assert_eq!(cfg.stale_window(), Duration::from_secs(15));
        assert_eq!(cfg.api_base, "https://api.particle.io/v1");
    }

    #[test]
    fn test_normalized_clamps_windows() {
        let cfg = Config {
            stale_secs: 90,
            export_quiet_secs: 1,
            backoff_initial_ms: 5000,
            backoff_max_ms: 10,
            ..Config::default()
        }
        .normalized();
        assert_eq!(cfg.stale_secs, 20);
        assert_eq!(cfg.export_quiet_secs, 8);
        assert_eq!(cfg.backoff_max_ms, 5000);
    }
}
