mod config;
mod error;

pub use config::{GatewayConfig, GatewayConfigError, GatewayConfigPatch};
pub use error::{ErrorBody, ErrorEnvelope, GatewayError};
