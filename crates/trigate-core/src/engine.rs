//! Per-request dispatch: pick a credential, fill in model defaults,
//! forward to the backend, and account failures back into the pool.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use trigate_common::GatewayError;
use trigate_pool::{CredentialEntry, CredentialId, CredentialPool};
use trigate_protocol::openai::chat::ChatCompletionRequestBody;
use trigate_protocol::openai::embeddings::EmbeddingsRequestBody;
use trigate_protocol::openai::models::{CredentialModels, ModelInfo};
use trigate_transform::model_map::normalize_model;

use crate::client::{BackendClient, BackendResponse, UpstreamFailure};

pub struct ChatReply {
    pub credential_id: CredentialId,
    pub body: ReplyBody,
}

pub enum ReplyBody {
    Json(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct GatewayEngine {
    pool: Arc<CredentialPool>,
    client: BackendClient,
    default_model: String,
}

impl GatewayEngine {
    pub fn new(pool: Arc<CredentialPool>, client: BackendClient, default_model: String) -> Self {
        Self {
            pool,
            client,
            default_model,
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Forwards a canonical completion request over a selected credential.
    /// The returned stream receiver, when dropped, cancels the upstream
    /// forward.
    pub async fn dispatch_chat(
        &self,
        mut body: ChatCompletionRequestBody,
    ) -> Result<ChatReply, GatewayError> {
        if body.model.is_empty() {
            body.model = self.default_model.clone();
        }
        body.model = normalize_model(&body.model);

        let entry = self
            .pool
            .select_active()
            .await
            .ok_or(GatewayError::NoCredentials)?;
        let token = entry
            .upstream_token
            .clone()
            .ok_or(GatewayError::NoCredentials)?;

        if body.max_tokens.is_none() {
            body.max_tokens = self.default_output_limit(&entry, &token, &body.model).await;
        }

        match self.client.chat(&token, &body).await {
            Ok(BackendResponse::Json(bytes)) => Ok(ChatReply {
                credential_id: entry.id,
                body: ReplyBody::Json(bytes),
            }),
            Ok(BackendResponse::Stream(rx)) => Ok(ChatReply {
                credential_id: entry.id,
                body: ReplyBody::Stream(rx),
            }),
            Err(err) => {
                self.pool.report_error(entry.id).await;
                Err(map_failure(err))
            }
        }
    }

    pub async fn dispatch_embeddings(
        &self,
        mut body: EmbeddingsRequestBody,
    ) -> Result<Bytes, GatewayError> {
        if body.model.is_empty() {
            body.model = self.default_model.clone();
        }
        body.model = normalize_model(&body.model);

        let entry = self
            .pool
            .select_active()
            .await
            .ok_or(GatewayError::NoCredentials)?;
        let token = entry
            .upstream_token
            .clone()
            .ok_or(GatewayError::NoCredentials)?;

        match self.client.embeddings(&token, &body).await {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                self.pool.report_error(entry.id).await;
                Err(map_failure(err))
            }
        }
    }

    /// Lists models over one selected credential, caching the answer on
    /// that entry.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, GatewayError> {
        let entry = self
            .pool
            .select_active()
            .await
            .ok_or(GatewayError::NoCredentials)?;
        let token = entry
            .upstream_token
            .clone()
            .ok_or(GatewayError::NoCredentials)?;
        if let Some(models) = entry.models {
            return Ok(models);
        }
        match self.client.models(&token).await {
            Ok(models) => {
                self.pool.set_models(entry.id, models.clone()).await;
                Ok(models)
            }
            Err(err) => {
                self.pool.report_error(entry.id).await;
                Err(map_failure(err))
            }
        }
    }

    /// Per-credential model breakdown. A failing credential is skipped
    /// (after error accounting) rather than failing the whole listing.
    pub async fn grouped_models(&self) -> Vec<CredentialModels> {
        let mut groups = Vec::new();
        for snapshot in self.pool.statistics().await {
            let Some(entry) = self.pool.get(snapshot.id).await else {
                continue;
            };
            let Some(token) = entry.upstream_token.clone() else {
                continue;
            };
            let models = match entry.models {
                Some(models) => models,
                None => match self.client.models(&token).await {
                    Ok(models) => {
                        self.pool.set_models(entry.id, models.clone()).await;
                        models
                    }
                    Err(err) => {
                        warn!(credential_id = entry.id, error = %err, "models listing failed");
                        self.pool.report_error(entry.id).await;
                        continue;
                    }
                },
            };
            groups.push(CredentialModels {
                id: entry.id,
                username: entry.username,
                models,
            });
        }
        groups
    }

    async fn default_output_limit(
        &self,
        entry: &CredentialEntry,
        token: &str,
        model: &str,
    ) -> Option<i64> {
        if let Some(limit) = entry.max_output_tokens_for(model) {
            return Some(limit);
        }
        if entry.models.is_some() {
            // Capability list is cached and has no limit for this model.
            return None;
        }
        match self.client.models(token).await {
            Ok(models) => {
                let limit = models
                    .iter()
                    .find(|info| info.id == model)
                    .and_then(|info| info.max_output_tokens);
                self.pool.set_models(entry.id, models).await;
                limit
            }
            Err(err) => {
                warn!(credential_id = entry.id, error = %err, "capability lookup failed");
                None
            }
        }
    }
}

fn map_failure(err: UpstreamFailure) -> GatewayError {
    match err {
        UpstreamFailure::Transport(message) => GatewayError::Upstream {
            status: 502,
            message,
        },
        UpstreamFailure::Status { status, message } => GatewayError::Upstream { status, message },
    }
}
