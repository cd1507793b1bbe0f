use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;

use trigate_common::GatewayError;

use crate::respond::error_response;
use crate::AppState;

/// Gateway-level API-key check, orthogonal to backend credentials.
/// Comparison happens on blake3 digests, which compare in constant time.
pub async fn gateway_auth(
    State(state): State<AppState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key_hash else {
        return next.run(req).await;
    };

    let presented = extract_api_key(req.headers());
    match presented {
        Some(key) if blake3::hash(key.as_bytes()) == expected => next.run(req).await,
        _ => error_response(&GatewayError::Auth("invalid or missing api key".to_string())),
    }
}

/// Accepted key carriers, in precedence order: Authorization bearer,
/// x-api-key, x-goog-api-key.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        let prefix = "Bearer ";
        if s.len() > prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = s[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    for name in ["x-api-key", "x-goog-api-key"] {
        if let Some(value) = headers.get(name)
            && let Ok(s) = value.to_str()
        {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer first"),
        );
        headers.insert("x-api-key", HeaderValue::from_static("second"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("first"));
    }

    #[test]
    fn goog_header_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static("g-key"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("g-key"));
    }

    #[test]
    fn blank_values_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_api_key(&headers), None);
    }
}
