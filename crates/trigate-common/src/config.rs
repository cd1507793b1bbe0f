use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Gateway-level API key; `None` disables inbound auth entirely.
    pub api_key: Option<String>,
    /// Database DSN for the credential record store.
    pub dsn: String,
    /// Disables /auth/* management endpoints when set.
    pub production: bool,
    /// Base URL for upstream chat/embeddings/models calls.
    pub api_base: String,
    /// Base URL for upstream identity/token/device-code calls.
    pub auth_base: String,
    pub refresh_interval_secs: u64,
    /// Upstream model used when an alias lookup has no better answer.
    pub default_model: String,
}

/// Optional layer used while merging configuration sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub dsn: Option<String>,
    pub production: Option<bool>,
    pub api_base: Option<String>,
    pub auth_base: Option<String>,
    pub refresh_interval_secs: Option<u64>,
    pub default_model: Option<String>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.production.is_some() {
            self.production = other.production;
        }
        if other.api_base.is_some() {
            self.api_base = other.api_base;
        }
        if other.auth_base.is_some() {
            self.auth_base = other.auth_base;
        }
        if other.refresh_interval_secs.is_some() {
            self.refresh_interval_secs = other.refresh_interval_secs;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8686),
            api_key: self.api_key.filter(|key| !key.trim().is_empty()),
            dsn: self.dsn.ok_or(GatewayConfigError::MissingField("dsn"))?,
            production: self.production.unwrap_or(false),
            api_base: self
                .api_base
                .ok_or(GatewayConfigError::MissingField("api_base"))?,
            auth_base: self
                .auth_base
                .ok_or(GatewayConfigError::MissingField("auth_base"))?,
            refresh_interval_secs: self.refresh_interval_secs.unwrap_or(1800),
            default_model: self.default_model.unwrap_or_else(|| "glm-4.6".to_string()),
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            api_key: value.api_key,
            dsn: Some(value.dsn),
            production: Some(value.production),
            api_base: Some(value.api_base),
            auth_base: Some(value.auth_base),
            refresh_interval_secs: Some(value.refresh_interval_secs),
            default_model: Some(value.default_model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_patch() -> GatewayConfigPatch {
        GatewayConfigPatch {
            dsn: Some("sqlite::memory:".to_string()),
            api_base: Some("https://api.example.com".to_string()),
            auth_base: Some("https://auth.example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn overlay_prefers_later_layer() {
        let mut patch = base_patch();
        patch.port = Some(9000);
        patch.overlay(GatewayConfigPatch {
            port: Some(9001),
            ..Default::default()
        });
        assert_eq!(patch.into_config().unwrap().port, 9001);
    }

    #[test]
    fn missing_dsn_is_an_error() {
        let mut patch = base_patch();
        patch.dsn = None;
        assert!(patch.into_config().is_err());
    }

    #[test]
    fn blank_api_key_means_auth_disabled() {
        let mut patch = base_patch();
        patch.api_key = Some("   ".to_string());
        assert_eq!(patch.into_config().unwrap().api_key, None);
    }
}
