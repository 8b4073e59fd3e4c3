use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::coordinator::DispatchPolicy;
use crate::error::PaymentError;
use crate::model::{Credentials, IpnNotificationType};

pub const DEFAULT_GATEWAY_URL: &str = "https://pay.pesapal.com/v3/";
pub const DEFAULT_LEDGER_URL: &str = "https://test.mwonya.com/Requests/endpoints/";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds before expiry at which a token stops being used.
    #[serde(default = "default_expiry_buffer_secs")]
    pub expiry_buffer_secs: i64,

    pub ipn_url: Option<String>,
    #[serde(default)]
    pub ipn_notification_type: IpnNotificationType,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            consumer_key: None,
            consumer_secret: None,
            timeout_ms: default_timeout_ms(),
            expiry_buffer_secs: default_expiry_buffer_secs(),
            ipn_url: None,
            ipn_notification_type: IpnNotificationType::Get,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn expiry_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiry_buffer_secs)
    }

    /// Configured key/secret, falling back to the legacy `PESAPAL_*` variables.
    /// Blank or missing values are a configuration error, raised before any call.
    pub fn credentials(&self) -> Result<Credentials, PaymentError> {
        let key = self
            .consumer_key
            .clone()
            .or_else(|| env::var("PESAPAL_CONSUMER_KEY").ok())
            .ok_or_else(|| {
                PaymentError::Configuration(
                    "consumer_key not set (check config or PAYMENTS__GATEWAY__CONSUMER_KEY)"
                        .to_string(),
                )
            })?;
        let secret = self
            .consumer_secret
            .clone()
            .or_else(|| env::var("PESAPAL_CONSUMER_SECRET").ok())
            .ok_or_else(|| {
                PaymentError::Configuration(
                    "consumer_secret not set (check config or PAYMENTS__GATEWAY__CONSUMER_SECRET)"
                        .to_string(),
                )
            })?;
        Credentials::new(key, secret)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_ledger_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchPolicy::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl CheckoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_ledger_url() -> String {
    DEFAULT_LEDGER_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_expiry_buffer_secs() -> i64 {
    5 * 60
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_poll_attempts() -> u32 {
    24
}

fn default_port() -> u16 {
    3002
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // 1. Project config from config/config.{toml,json}
            .add_source(File::with_name("config/config").required(false))
            // 2. Per-mode overrides, e.g. config/production.toml
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // 3. Local config from config/local.* (not checked in)
            .add_source(File::with_name("config/local").required(false))
            // 4. Environment overrides
            // e.g. PAYMENTS__GATEWAY__CONSUMER_KEY
            .add_source(
                Environment::with_prefix("PAYMENTS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Parses settings from an inline TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
