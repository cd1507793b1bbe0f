//! Credential administration endpoints. All of them are disabled in
//! production mode so a publicly exposed gateway cannot be used to
//! enumerate or mutate its own pool.

use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use trigate_common::GatewayError;
use trigate_pool::{CredentialId, PoolError};

use crate::respond::{error_response, parse_json};
use crate::sse::json_response;
use crate::AppState;

const DEFAULT_TIER: &str = "free";

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    active: usize,
    total: usize,
}

pub async fn health(State(state): State<AppState>) -> Response {
    let counts = state.engine.pool().counts().await;
    json_response(&HealthBody {
        status: "ok",
        active: counts.active,
        total: counts.total,
    })
}

#[derive(Serialize)]
struct LoginResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    interval: u64,
}

pub async fn login(State(state): State<AppState>) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    match state.flow.start().await {
        Ok(auth) => json_response(&LoginResponse {
            device_code: auth.device_code,
            user_code: auth.user_code,
            verification_uri: auth.verification_uri,
            expires_in: auth.expires_in,
            interval: auth.interval,
        }),
        Err(err) => error_response(&GatewayError::Upstream {
            status: 502,
            message: err.to_string(),
        }),
    }
}

#[derive(Deserialize)]
struct CompleteRequest {
    device_code: String,
    account_type: Option<String>,
}

pub async fn complete(State(state): State<AppState>, body: Bytes) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    let request: CompleteRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    let tier = request.account_type.as_deref().unwrap_or(DEFAULT_TIER);
    match state.flow.complete_once(&request.device_code, tier).await {
        Ok(outcome) => json_response(&outcome),
        Err(err) => error_response(&map_pool_error(err)),
    }
}

pub async fn list_tokens(State(state): State<AppState>) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    json_response(&state.engine.pool().statistics().await)
}

#[derive(Deserialize)]
struct AddTokenRequest {
    token: String,
    account_type: Option<String>,
}

#[derive(Serialize)]
struct AddTokenResponse {
    id: CredentialId,
}

pub async fn add_token(State(state): State<AppState>, body: Bytes) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    let request: AddTokenRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    let tier = request.account_type.as_deref().unwrap_or(DEFAULT_TIER);
    match state.engine.pool().add_credential(&request.token, tier).await {
        Ok(id) => {
            info!(credential_id = id, "credential added");
            json_response(&AddTokenResponse { id })
        }
        Err(err) => error_response(&map_pool_error(err)),
    }
}

pub async fn delete_token(State(state): State<AppState>, Path(id): Path<CredentialId>) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    remove_by_id(&state, id).await
}

#[derive(Deserialize)]
struct DeleteTokenRequest {
    id: CredentialId,
}

pub async fn delete_token_by_body(State(state): State<AppState>, body: Bytes) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    let request: DeleteTokenRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    remove_by_id(&state, request.id).await
}

#[derive(Serialize)]
struct DeletedBody {
    deleted: u64,
}

pub async fn delete_all_tokens(State(state): State<AppState>) -> Response {
    if let Some(resp) = production_guard(&state) {
        return resp;
    }
    match state.engine.pool().remove_all().await {
        Ok(deleted) => {
            info!(deleted, "all credentials removed");
            json_response(&DeletedBody { deleted })
        }
        Err(err) => error_response(&map_pool_error(err)),
    }
}

async fn remove_by_id(state: &AppState, id: CredentialId) -> Response {
    match state.engine.pool().remove(id).await {
        Ok(true) => {
            info!(credential_id = id, "credential removed");
            json_response(&DeletedBody { deleted: 1 })
        }
        Ok(false) => error_response(&GatewayError::NotFound(format!("no credential with id {id}"))),
        Err(err) => error_response(&map_pool_error(err)),
    }
}

fn production_guard(state: &AppState) -> Option<Response> {
    state
        .production
        .then(|| error_response(&GatewayError::Forbidden))
}

fn map_pool_error(err: PoolError) -> GatewayError {
    match err {
        // Rejected credentials and failed exchanges are auth failures,
        // not malformed requests.
        PoolError::Auth(message) => GatewayError::Auth(message),
        PoolError::NotFound(id) => GatewayError::NotFound(format!("no credential with id {id}")),
        PoolError::Storage(err) => GatewayError::Upstream {
            status: 500,
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_credential_surfaces_as_auth_error() {
        let err = map_pool_error(PoolError::Auth("credential rejected".to_string()));
        assert_eq!(err.error_type(), "auth_error");
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn unknown_id_surfaces_as_not_found() {
        let err = map_pool_error(PoolError::NotFound(7));
        assert_eq!(err.error_type(), "not_found");
        assert_eq!(err.status_code(), 404);
    }
}
