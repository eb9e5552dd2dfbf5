use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod particle;
pub mod retry;

pub use particle::ParticleClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl Device {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => &self.id,
        }
    }

    pub fn label(&self) -> String {
        let badge = if self.online { "[online]" } else { "[offline]" };
        format!("{} {}", self.display_name(), badge)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariableReply {
    pub result: Value,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionReply {
    #[serde(default)]
    pub return_value: Option<i64>,
    #[serde(default)]
    pub connected: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP {status}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bad url: {0}")]
    Url(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => retry::is_retryable_http_error(*status),
            ApiError::Transport(e) => retry::is_retryable_network_error(e),
            ApiError::Url(_) => false,
        }
    }
}

/// Cloud operations the monitor needs.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>>;
    async fn get_variable(&self, device_id: &str, name: &str) -> Result<VariableReply>;
    async fn call_function(&self, device_id: &str, name: &str, arg: &str) -> Result<FunctionReply>;
}

pub const NO_DEVICES: &str = "No devices for this token.";

/// One line per device for the `devices` command, or the empty-list notice.
pub fn device_listing(devices: &[Device]) -> Vec<String> {
    if devices.is_empty() {
        return vec![NO_DEVICES.to_string()];
    }
    devices.iter().map(|d| format!("{}  {}", d.id, d.label())).collect()
}

/// Pick the device to monitor: the preferred name (case-insensitive) if
/// present, otherwise the first in the list.
pub fn select_device<'a>(devices: &'a [Device], preferred: &str) -> Option<&'a Device> {
    let preferred = preferred.to_lowercase();
    devices
        .iter()
        .find(|d| d.name.as_deref().unwrap_or("").to_lowercase() == preferred)
        .or_else(|| devices.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(id: &str, name: Option<&str>, online: bool) -> Device {
        Device {
            id: id.to_string(),
            name: name.map(|n| n.to_string()),
            online,
        }
    }

    #[test]
    fn test_select_prefers_named_device() {
        let list = vec![dev("a", Some("other"), true), dev("b", Some("Grey_Fox_1"), false)];
        assert_eq!(select_device(&list, "grey_fox_1").unwrap().id, "b");
    }

    #[test]
    fn test_select_falls_back_to_first() {
        let list = vec![dev("a", None, true), dev("b", Some("x"), false)];
        assert_eq!(select_device(&list, "grey_fox_1").unwrap().id, "a");
        assert!(select_device(&[], "grey_fox_1").is_none());
    }

    #[test]
    fn test_label_uses_id_when_unnamed() {
        assert_eq!(dev("abc", None, false).label(), "abc [offline]");
        assert_eq!(dev("abc", Some(""), true).label(), "abc [online]");
        assert_eq!(dev("abc", Some("fox"), true).label(), "fox [online]");
    }

    #[test]
    fn test_device_listing() {
        assert_eq!(device_listing(&[]), vec!["No devices for this token."]);
        let list = vec![dev("a", Some("fox"), true), dev("b", None, false)];
        assert_eq!(device_listing(&list), vec!["a  fox [online]", "b  b [offline]"]);
    }

    #[test]
    fn test_device_list_decodes() {
        let body = r#"[{"id":"e00f","name":"grey_fox_1","online":true,"platform_id":13}]"#;
        let list: Vec<Device> = serde_json::from_str(body).unwrap();
        assert_eq!(list[0].name.as_deref(), Some("grey_fox_1"));
        assert!(list[0].online);
    }

    #[test]
    fn test_status_error_retry_classification() {
        let e = ApiError::Status { status: 503, body: String::new() };
        assert!(e.is_retryable());
        assert_eq!(e.to_string(), "HTTP 503");
        let e = ApiError::Status { status: 401, body: String::new() };
        assert!(!e.is_retryable());
    }
}
