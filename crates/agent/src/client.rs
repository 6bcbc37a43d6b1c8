//! HTTP client for the hub API.

use pwnhub_core::api::{DeviceRecord, HeartbeatRequest, RegisterRequest};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The hub has no record of this device.
    #[error("device is not registered with the hub")]
    UnknownDevice,

    #[error("hub returned {status}: {code}: {message}")]
    Api {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid hub URL: {0}")]
    InvalidUrl(String),
}

pub type HubResult<T> = std::result::Result<T, HubError>;

/// Error body returned by the hub.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Clone, Debug)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HubClient {
    pub fn new(base_url: &str, timeout: Duration) -> HubResult<Self> {
        // Relative joins only keep a path prefix when it ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url =
            Url::parse(&normalized).map_err(|e| HubError::InvalidUrl(format!("{base_url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> HubResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| HubError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> HubResult<T> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }
        Ok(response.json().await?)
    }

    /// Full registration. Fields left as `None` are reset on the hub.
    pub async fn register(&self, req: &RegisterRequest) -> HubResult<DeviceRecord> {
        let url = self.url("api/devices/register")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    /// Sparse update of an existing device.
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> HubResult<()> {
        let url = self.url("api/devices/heartbeat")?;
        match self.send_json::<StatusBody>(self.http.post(url).json(req)).await {
            Ok(body) => {
                tracing::trace!(status = %body.status, "Heartbeat acknowledged");
                Ok(())
            }
            Err(HubError::Api {
                status: StatusCode::NOT_FOUND,
                ..
            }) => Err(HubError::UnknownDevice),
            Err(e) => Err(e),
        }
    }

    /// Check the hub's `/health` endpoint.
    pub async fn health(&self) -> HubResult<()> {
        let url = self.url("health")?;
        let _: serde_json::Value = self.send_json(self.http.get(url)).await?;
        Ok(())
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> HubError {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => HubError::Api {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => HubError::Api {
            status,
            code: status
                .canonical_reason()
                .unwrap_or("unknown")
                .to_lowercase()
                .replace(' ', "_"),
            message: body,
        },
    }
}
