//! Long-lived server-sent-event subscription with reconnect and pause.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use url::Url;

use crate::api::particle::endpoint;

pub mod backoff;
pub mod client;
pub mod frame;

pub use backoff::Backoff;
pub use client::{EventStream, StreamHandle};
pub use frame::{Frame, FrameDecoder, Framing};

/// How the token travels on the stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `Authorization: Bearer` header.
    Header,
    /// `access_token` query parameter, for clients that cannot set headers.
    Query,
}

impl AuthMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" | "bearer" => Some(AuthMode::Header),
            "query" | "param" => Some(AuthMode::Query),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamTarget {
    pub name: String,
    url: Url,
    token: String,
    auth: AuthMode,
}

impl StreamTarget {
    pub fn new(name: &str, url: Url, token: &str, auth: AuthMode) -> Self {
        Self {
            name: name.to_string(),
            url,
            token: token.to_string(),
            auth,
        }
    }

    /// `GET <base>/devices/<id>/events/<event_name>`
    pub fn device_events(
        base: &Url,
        device_id: &str,
        event_name: &str,
        token: &str,
        auth: AuthMode,
    ) -> Result<Self> {
        let url = endpoint(base, &["devices", device_id, "events", event_name])?;
        Ok(Self::new(event_name, url, token, auth))
    }

    pub fn auth(&self) -> AuthMode {
        self.auth
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// URL actually requested; carries the token only in query mode.
    pub fn request_url(&self) -> Url {
        let mut url = self.url.clone();
        if self.auth == AuthMode::Query {
            url.query_pairs_mut().append_pair("access_token", &self.token);
        }
        url
    }
}

/// Desired state of a stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Run,
    /// Hold no connection until resumed.
    Pause,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Opened,
    Frame(Frame),
    Closed { reason: String },
    ReconnectScheduled { delay: Duration, attempt: u32 },
    Paused,
}

/// Epoch-millis timestamp of the last frame seen, shared between the stream
/// task and the polling fallback.
#[derive(Debug, Clone, Default)]
pub struct LastEvent(Arc<AtomicU64>);

impl LastEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, now_ms: u64) {
        self.0.fetch_max(now_ms, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// True when no frame arrived within `window` of `now_ms`.
    pub fn is_stale(&self, now_ms: u64, window: Duration) -> bool {
        match self.get() {
            None => true,
            Some(last) => now_ms.saturating_sub(last) > window.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_auth_adds_token() {
        let base = Url::parse("https://api.particle.io/v1").unwrap();
        let t = StreamTarget::device_events(&base, "e00f", "status", "tok", AuthMode::Query).unwrap();
        assert_eq!(
            t.request_url().as_str(),
            "https://api.particle.io/v1/devices/e00f/events/status?access_token=tok"
        );
        let t = StreamTarget::device_events(&base, "e00f", "status", "tok", AuthMode::Header).unwrap();
        assert_eq!(t.request_url().query(), None);
    }

    #[test]
    fn test_last_event_staleness() {
        let last = LastEvent::new();
        assert!(last.is_stale(1_000, Duration::from_secs(15)));
        last.touch(10_000);
        assert!(!last.is_stale(25_000, Duration::from_secs(15)));
        assert!(last.is_stale(25_001, Duration::from_secs(15)));
        // never moves backwards
        last.touch(5_000);
        assert_eq!(last.get(), Some(10_000));
    }

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!(AuthMode::parse("Query"), Some(AuthMode::Query));
        assert_eq!(AuthMode::parse("header"), Some(AuthMode::Header));
        assert_eq!(AuthMode::parse("cookie"), None);
    }
}
