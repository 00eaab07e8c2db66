//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use credits_ledger::{
    db::DatabaseConfig, ledger::DEFAULT_CURRENCY, payments::PurchaseSettings,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Payment provider configuration
    pub payments: PaymentsConfig,
    /// Ledger and catalog configuration
    pub ledger: LedgerConfig,
    /// Prometheus exporter address, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT verification secret (required)
    pub jwt_secret: String,
    /// Shared secret for webhook signatures, unsigned webhooks accepted when unset
    pub webhook_secret: Option<String>,
}

/// Payment provider configuration
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Provider name recorded on intents
    pub provider_name: String,
    /// Provider API base URL
    pub api_url: String,
    /// Provider API key
    pub api_key: String,
    /// Timeout for each provider call
    pub timeout_secs: u64,
    /// Currency packages are priced in
    pub currency: String,
    pub success_url: String,
    pub failure_url: String,
    pub cancel_url: String,
    pub notification_url: String,
    /// Payment page language when the client sends none
    pub default_language: String,
    /// Width of the purchase idempotency bucket
    pub idempotency_window_secs: u64,
}

/// Ledger configuration
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Currency code of credit wallets
    pub currency: String,
    /// JSON gift catalog, built-in gifts when unset
    pub gift_catalog_path: Option<PathBuf>,
    /// JSON package catalog, built-in packages when unset
    pub package_catalog_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(
            |key| std::env::var(key).ok(),
            bind_override,
            database_url_override,
        )
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(
        lookup: F,
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        // Bind address
        let bind = match bind_override {
            Some(bind) => bind,
            None => env
                .parse("SERVER_BIND")?
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080))),
        };

        // Database configuration
        let database_url = database_url_override
            .or_else(|| env.get("DATABASE_URL"))
            .unwrap_or_else(|| DatabaseConfig::DEVELOPMENT_URL.to_string());

        let database = DatabaseConfig {
            database_url,
            max_connections: env.parse_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env.parse_or("DB_MIN_CONNECTIONS", 2)?,
            connection_timeout_secs: env.parse_or("DB_CONNECTION_TIMEOUT_SECS", 5)?,
            idle_timeout_secs: env.parse_or("DB_IDLE_TIMEOUT_SECS", 300)?,
            max_lifetime_secs: env.parse_or("DB_MAX_LIFETIME_SECS", 1800)?,
        };

        // Security configuration (REQUIRED)
        let jwt_secret = env.get("JWT_SECRET").ok_or_else(|| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let security = SecurityConfig {
            jwt_secret,
            webhook_secret: env.get("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
        };

        let defaults = PurchaseSettings::default();
        let payments = PaymentsConfig {
            provider_name: env.get_or("PAYMENT_PROVIDER_NAME", "hosted-checkout"),
            api_url: env.get_or("PAYMENT_API_URL", "http://localhost:9090"),
            api_key: env.get("PAYMENT_API_KEY").unwrap_or_default(),
            timeout_secs: env.parse_or(
                "PAYMENT_TIMEOUT_SECS",
                defaults.provider_timeout.as_secs(),
            )?,
            currency: env.get_or("PAYMENT_CURRENCY", "EUR"),
            success_url: env.get_or("PAYMENT_SUCCESS_URL", &defaults.success_url),
            failure_url: env.get_or("PAYMENT_FAILURE_URL", &defaults.failure_url),
            cancel_url: env.get_or("PAYMENT_CANCEL_URL", &defaults.cancel_url),
            notification_url: env.get_or("PAYMENT_NOTIFICATION_URL", &defaults.notification_url),
            default_language: env.get_or("PAYMENT_DEFAULT_LANGUAGE", &defaults.default_language),
            idempotency_window_secs: env.parse_or(
                "PURCHASE_IDEMPOTENCY_WINDOW_SECS",
                defaults.idempotency_window.as_secs(),
            )?,
        };

        let ledger = LedgerConfig {
            currency: env.get_or("LEDGER_CURRENCY", DEFAULT_CURRENCY),
            gift_catalog_path: env.get("GIFT_CATALOG_PATH").map(PathBuf::from),
            package_catalog_path: env.get("PACKAGE_CATALOG_PATH").map(PathBuf::from),
        };

        let metrics_bind = env.parse("METRICS_BIND")?;

        let config = ServerConfig {
            bind,
            database,
            security,
            payments,
            ledger,
            metrics_bind,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self
            .security
            .webhook_secret
            .as_ref()
            .is_some_and(|secret| secret.len() < 16)
        {
            return Err(ConfigError::Invalid {
                var: "WEBHOOK_SECRET".to_string(),
                reason: "Must be at least 16 characters".to_string(),
            });
        }

        if !self.payments.api_url.starts_with("http://")
            && !self.payments.api_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                var: "PAYMENT_API_URL".to_string(),
                reason: "Must be an http(s) URL".to_string(),
            });
        }

        if self.payments.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PAYMENT_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.payments.idempotency_window_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PURCHASE_IDEMPOTENCY_WINDOW_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.ledger.currency.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "LEDGER_CURRENCY".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed max connections ({})",
                    self.database.max_connections
                ),
            });
        }

        Ok(())
    }

    /// Purchase flow settings derived from the payment section
    pub fn purchase_settings(&self) -> PurchaseSettings {
        PurchaseSettings {
            idempotency_window: Duration::from_secs(self.payments.idempotency_window_secs),
            default_language: self.payments.default_language.clone(),
            success_url: self.payments.success_url.clone(),
            failure_url: self.payments.failure_url.clone(),
            cancel_url: self.payments.cancel_url.clone(),
            notification_url: self.payments.notification_url.clone(),
            provider_timeout: self.provider_timeout(),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.payments.timeout_secs)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Typed access to a variable source
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable if set; a malformed value is an error, not a silent default
    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("Cannot parse '{raw}'"),
            }),
        }
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse(key)?.unwrap_or(default))
    }
}
