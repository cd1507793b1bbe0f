use serde::{Deserialize, Serialize};

/// Process-wide error taxonomy. Every handler failure maps onto one of
/// these before it reaches the wire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    NotFound(String),
    #[error("endpoint disabled")]
    Forbidden,
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("no credentials available")]
    NoCredentials,
}

impl GatewayError {
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation_error",
            GatewayError::Auth(_) => "auth_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Forbidden => "forbidden",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::NoCredentials => "no_credentials_available",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Validation(_) => 400,
            GatewayError::Auth(_) => 401,
            GatewayError::NotFound(_) => 404,
            GatewayError::Forbidden => 403,
            // Forward the upstream status verbatim where possible.
            GatewayError::Upstream { status, .. } => *status,
            GatewayError::NoCredentials => 503,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_is_forwarded() {
        let err = GatewayError::Upstream {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.error_type(), "upstream_error");
    }

    #[test]
    fn envelope_shape() {
        let err = GatewayError::NoCredentials;
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(json["error"]["type"], "no_credentials_available");
    }
}
