use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::services::commerce::pricing_service::PricingConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_BACKEND: &str = "in-memory";
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// Where session carts live: "in-memory" or "redis"
    #[serde(default = "default_session_backend")]
    #[validate(custom = "validate_session_backend")]
    pub session_backend: String,

    /// Redis connection URL (session backend "redis")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Idle lifetime of a session cart in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Subtotal at or above which delivery is free
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: Decimal,

    /// Delivery surcharge as a percentage of the subtotal below the threshold
    #[serde(default = "default_standard_delivery_percentage")]
    pub standard_delivery_percentage: Decimal,

    /// ISO currency code used for payment intents (lowercase, e.g. "usd")
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Publishable key handed to the browser with the client secret
    #[serde(default)]
    pub stripe_public_key: Option<String>,

    /// Secret key for payment intent creation
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Shared secret used to verify webhook signatures
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    #[serde(default = "default_stripe_timeout_secs")]
    pub stripe_timeout_secs: u64,

    /// Maximum accepted age of a signed webhook, in seconds
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            session_backend: default_session_backend(),
            redis_url: None,
            session_ttl_secs: default_session_ttl_secs(),
            free_delivery_threshold: default_free_delivery_threshold(),
            standard_delivery_percentage: default_standard_delivery_percentage(),
            currency: default_currency(),
            stripe_public_key: None,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: default_stripe_api_base(),
            stripe_timeout_secs: default_stripe_timeout_secs(),
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Delivery policy handed to the pricer and the order builder.
    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            free_delivery_threshold: self.free_delivery_threshold,
            standard_delivery_percentage: self.standard_delivery_percentage,
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), AppConfigError> {
        if self.free_delivery_threshold.is_sign_negative() {
            return Err(AppConfigError::Invalid(
                "free_delivery_threshold must not be negative".into(),
            ));
        }
        if self.standard_delivery_percentage.is_sign_negative()
            || self.standard_delivery_percentage > Decimal::ONE_HUNDRED
        {
            return Err(AppConfigError::Invalid(
                "standard_delivery_percentage must be between 0 and 100".into(),
            ));
        }
        if self.session_backend.eq_ignore_ascii_case("redis") && self.redis_url.is_none() {
            return Err(AppConfigError::Invalid(
                "redis_url is required when session_backend = \"redis\"".into(),
            ));
        }
        if self.is_production()
            && (self.stripe_secret_key.is_none() || self.stripe_webhook_secret.is_none())
        {
            return Err(AppConfigError::Invalid(
                "stripe_secret_key and stripe_webhook_secret are required in production".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_session_backend() -> String {
    DEFAULT_SESSION_BACKEND.to_string()
}

fn default_session_ttl_secs() -> u64 {
    60 * 60 * 24 * 14
}

fn default_free_delivery_threshold() -> Decimal {
    Decimal::from(50)
}

fn default_standard_delivery_percentage() -> Decimal {
    Decimal::from(10)
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_stripe_timeout_secs() -> u64 {
    10
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_session_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("session_backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let result = if json {
        fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init()
    } else {
        fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Same layering as [`load_config`], reading files from `config_dir`.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let default_file = config_dir.join("default");
    let env_file = config_dir.join(run_env);
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .add_source(File::with_name(&default_file.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_file.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate()?;
    app_config.validate_additional_constraints()?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
