use clap::Parser;

use trigate_common::GatewayConfigPatch;

/// Every flag doubles as an environment variable; clap already gives
/// flags precedence over the environment, which matches the merge order
/// CLI > ENV > defaults.
#[derive(Parser)]
#[command(name = "trigate", version)]
pub(crate) struct Cli {
    #[arg(long, env = "TRIGATE_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "TRIGATE_PORT")]
    pub(crate) port: Option<u16>,
    /// Gateway-level API key. Omit to disable inbound auth.
    #[arg(long, env = "TRIGATE_API_KEY")]
    pub(crate) api_key: Option<String>,
    /// Database DSN for credential records, e.g. sqlite://trigate.db?mode=rwc
    #[arg(long, env = "TRIGATE_DSN")]
    pub(crate) dsn: Option<String>,
    /// Disables the /auth/* management endpoints.
    #[arg(long, env = "TRIGATE_PRODUCTION")]
    pub(crate) production: Option<bool>,
    #[arg(long, env = "TRIGATE_API_BASE")]
    pub(crate) api_base: Option<String>,
    #[arg(long, env = "TRIGATE_AUTH_BASE")]
    pub(crate) auth_base: Option<String>,
    #[arg(long, env = "TRIGATE_REFRESH_INTERVAL_SECS")]
    pub(crate) refresh_interval_secs: Option<u64>,
    #[arg(long, env = "TRIGATE_DEFAULT_MODEL")]
    pub(crate) default_model: Option<String>,
}

impl Cli {
    pub(crate) fn into_patch(self) -> GatewayConfigPatch {
        GatewayConfigPatch {
            host: self.host,
            port: self.port,
            api_key: self.api_key,
            dsn: self.dsn,
            production: self.production,
            api_base: self.api_base,
            auth_base: self.auth_base,
            refresh_interval_secs: self.refresh_interval_secs,
            default_model: self.default_model,
        }
    }
}
