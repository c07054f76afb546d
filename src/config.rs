use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

use crate::error::{CertLedgerError, Result};

const DEFAULT_CONFIG_PATH: &str = "cert-ledger.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub ledger: LedgerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint. When unset the service runs against an in-process ledger.
    pub rpc_url: Option<String>,
    pub timeout_secs: u64,
    /// Hex-encoded secp256k1 secret key used to sign issued certificates.
    pub issuer_key_path: Option<String>,
    pub issuing_authority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_secs: i64,
    pub block_secs: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://cert-ledger.db".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            ledger: LedgerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            timeout_secs: 30,
            issuer_key_path: None,
            issuing_authority: "Registrar".to_string(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 15 * 60,
            block_secs: 60 * 60,
        }
    }
}

impl AppConfig {
    /// Load defaults, then the optional TOML file, then `CERT_LEDGER__*` environment overrides.
    pub fn load() -> Result<Self> {
        let path = env::var("CERT_LEDGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::new(&path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("CERT_LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        info!("Configuration loaded (config file: {})", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_attempts == 0 {
            return Err(CertLedgerError::ConfigError(
                "rate_limit.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs <= 0 || self.rate_limit.block_secs <= 0 {
            return Err(CertLedgerError::ConfigError(
                "rate_limit window and block durations must be positive".to_string(),
            ));
        }
        if self.ledger.timeout_secs == 0 {
            return Err(CertLedgerError::ConfigError(
                "ledger.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
