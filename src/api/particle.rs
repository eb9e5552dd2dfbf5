use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::logging::{log_api_call, v_str, ProfileScope};
use super::retry::{retry_async, RetryConfig};
use super::{ApiError, Device, DeviceApi, FunctionReply, VariableReply};

pub const DEFAULT_API_BASE: &str = "https://api.particle.io/v1";

/// REST client for the Particle Cloud device API.
pub struct ParticleClient {
    client: Client,
    base: Url,
    token: String,
    retry: RetryConfig,
}

impl ParticleClient {
    pub fn new(base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base: parse_base(base)?,
            token: token.to_string(),
            retry: RetryConfig::default(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        endpoint(&self.base, segments)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        let url = self.url(segments)?;
        let scope = ProfileScope::new("api.get");
        let resp = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        log_api_call("GET", url.path(), Some(status.as_u16()), scope.elapsed_ms());
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        Ok(resp.json().await?)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        form: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.url(segments)?;
        let function = segments.last().copied().unwrap_or_default();
        let scope = ProfileScope::with_context("api.post", &[("function", v_str(function))]);
        let resp = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .form(form)
            .send()
            .await?;
        let status = resp.status();
        log_api_call("POST", url.path(), Some(status.as_u16()), scope.elapsed_ms());
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl DeviceApi for ParticleClient {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        retry_async(&self.retry, "list_devices", || async move {
            Ok(self.get_json::<Vec<Device>>(&["devices"]).await?)
        })
        .await
    }

    async fn get_variable(&self, device_id: &str, name: &str) -> Result<VariableReply> {
        retry_async(&self.retry, name, || async move {
            Ok(self.get_json::<VariableReply>(&["devices", device_id, name]).await?)
        })
        .await
    }

    async fn call_function(&self, device_id: &str, name: &str, arg: &str) -> Result<FunctionReply> {
        // Functions have side effects on the device; a single attempt only.
        retry_async(&RetryConfig::none(), name, || async move {
            Ok(self
                .post_form::<FunctionReply>(&["devices", device_id, name], &[("arg", arg)])
                .await?)
        })
        .await
    }
}

pub fn parse_base(base: &str) -> Result<Url> {
    let url = Url::parse(base).with_context(|| format!("invalid api base {}", base))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("invalid api base {}", base);
    }
    Ok(url)
}

/// Append path segments to the API base, escaping each one.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Url(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
