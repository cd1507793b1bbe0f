//! Raw HTTP I/O against the backend: completion/embeddings/models calls
//! plus the identity and device-code endpoints that implement the pool's
//! `UpstreamAuth` seam. No dialect logic lives here.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;
use wreq::Client;

use trigate_pool::{
    DeviceAuthorization, DevicePoll, ExchangedToken, Identity, UpstreamAuth, UpstreamAuthError,
};
use trigate_protocol::openai::chat::ChatCompletionRequestBody;
use trigate_protocol::openai::embeddings::EmbeddingsRequestBody;
use trigate_protocol::openai::models::{ListModelsResponse, ModelInfo};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("transport: {0}")]
    Transport(String),
    #[error("upstream status {status}: {message}")]
    Status { status: u16, message: String },
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    UpstreamFailure::Transport(err.to_string())
}

#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    /// Base URL for model traffic (chat, embeddings, models).
    pub api_base: String,
    /// Base URL for identity and device-code endpoints.
    pub auth_base: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl BackendClientConfig {
    pub fn new(api_base: impl Into<String>, auth_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            auth_base: auth_base.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

pub enum BackendResponse {
    Json(Bytes),
    /// SSE byte stream; the forwarding task stops when the receiver is
    /// dropped or the stream idles out.
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Clone)]
pub struct BackendClient {
    config: BackendClientConfig,
    client: Client,
}

impl BackendClient {
    pub fn new(config: BackendClientConfig) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    pub async fn chat(
        &self,
        token: &str,
        body: &ChatCompletionRequestBody,
    ) -> Result<BackendResponse, UpstreamFailure> {
        let want_stream = body.stream == Some(true);
        let payload = serde_json::to_vec(body)
            .map_err(|err| UpstreamFailure::Transport(err.to_string()))?;
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(token)
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(map_wreq_error)?;
        self.convert_response(resp, want_stream).await
    }

    pub async fn embeddings(
        &self,
        token: &str,
        body: &EmbeddingsRequestBody,
    ) -> Result<Bytes, UpstreamFailure> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| UpstreamFailure::Transport(err.to_string()))?;
        let resp = self
            .client
            .post(format!("{}/embeddings", self.config.api_base))
            .bearer_auth(token)
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(map_wreq_error)?;
        match self.convert_response(resp, false).await? {
            BackendResponse::Json(bytes) => Ok(bytes),
            BackendResponse::Stream(_) => {
                Err(UpstreamFailure::Transport("unexpected stream body".to_string()))
            }
        }
    }

    pub async fn models(&self, token: &str) -> Result<Vec<ModelInfo>, UpstreamFailure> {
        let resp = self
            .client
            .get(format!("{}/models", self.config.api_base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_wreq_error)?;
        let bytes = match self.convert_response(resp, false).await? {
            BackendResponse::Json(bytes) => bytes,
            BackendResponse::Stream(_) => {
                return Err(UpstreamFailure::Transport("unexpected stream body".to_string()));
            }
        };
        let listing: ListModelsResponse = serde_json::from_slice(&bytes)
            .map_err(|err| UpstreamFailure::Transport(err.to_string()))?;
        Ok(listing.data)
    }

    async fn convert_response(
        &self,
        resp: wreq::Response,
        want_stream: bool,
    ) -> Result<BackendResponse, UpstreamFailure> {
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamFailure::Status { status, message });
        }
        if !want_stream {
            let body = resp.bytes().await.map_err(map_wreq_error)?;
            return Ok(BackendResponse::Json(body));
        }

        let idle = self.config.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => {
                        debug!("upstream stream idle timeout");
                        break;
                    }
                };
                let Some(item) = item else {
                    break;
                };
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                };
                if tx.send(chunk).await.is_err() {
                    // Downstream hung up; stop pulling from upstream.
                    break;
                }
            }
        });
        Ok(BackendResponse::Stream(rx))
    }
}

// ---- identity / device-code endpoints ----

#[derive(Deserialize)]
struct IdentityResponse {
    username: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
}

#[derive(Deserialize)]
struct DeviceTokenResponse {
    api_key: Option<String>,
    error: Option<String>,
}

fn map_auth_transport(err: wreq::Error) -> UpstreamAuthError {
    UpstreamAuthError::Transport(err.to_string())
}

#[async_trait::async_trait]
impl UpstreamAuth for BackendClient {
    async fn lookup_identity(&self, raw: &str) -> Result<Identity, UpstreamAuthError> {
        let resp = self
            .client
            .get(format!("{}/api/v1/user", self.config.auth_base))
            .bearer_auth(raw)
            .send()
            .await
            .map_err(map_auth_transport)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamAuthError::Rejected(format!(
                "identity lookup failed ({status}): {body}"
            )));
        }
        let identity: IdentityResponse = resp
            .json()
            .await
            .map_err(|err| UpstreamAuthError::Transport(err.to_string()))?;
        Ok(Identity {
            username: identity.username,
        })
    }

    async fn exchange_token(&self, raw: &str) -> Result<ExchangedToken, UpstreamAuthError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/token", self.config.auth_base))
            .bearer_auth(raw)
            .send()
            .await
            .map_err(map_auth_transport)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamAuthError::Rejected(format!(
                "token exchange failed ({status}): {body}"
            )));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|err| UpstreamAuthError::Transport(err.to_string()))?;
        Ok(ExchangedToken {
            token: token.token,
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(token.expires_in),
        })
    }

    async fn start_device_flow(&self) -> Result<DeviceAuthorization, UpstreamAuthError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/device/code", self.config.auth_base))
            .send()
            .await
            .map_err(map_auth_transport)?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamAuthError::Rejected(format!(
                "device authorization failed ({status}): {body}"
            )));
        }
        let device: DeviceCodeResponse = resp
            .json()
            .await
            .map_err(|err| UpstreamAuthError::Transport(err.to_string()))?;
        Ok(DeviceAuthorization {
            device_code: device.device_code,
            user_code: device.user_code,
            verification_uri: device.verification_uri,
            expires_in: device.expires_in,
            interval: device.interval,
        })
    }

    async fn poll_device(&self, device_code: &str) -> Result<DevicePoll, UpstreamAuthError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/device/token", self.config.auth_base))
            .header("content-type", "application/json")
            .body(
                serde_json::json!({ "device_code": device_code })
                    .to_string()
                    .into_bytes(),
            )
            .send()
            .await
            .map_err(map_auth_transport)?;
        let body: DeviceTokenResponse = resp
            .json()
            .await
            .map_err(|err| UpstreamAuthError::Transport(err.to_string()))?;
        if let Some(api_key) = body.api_key {
            return Ok(DevicePoll::Authorized {
                raw_credential: api_key,
            });
        }
        // Standard OAuth device-grant error codes.
        match body.error.as_deref() {
            Some("authorization_pending") => Ok(DevicePoll::Pending),
            Some("slow_down") => Ok(DevicePoll::SlowDown),
            Some("access_denied") => Ok(DevicePoll::Denied),
            Some("expired_token") => Ok(DevicePoll::Expired),
            other => Err(UpstreamAuthError::Rejected(format!(
                "unexpected device poll answer: {other:?}"
            ))),
        }
    }
}
