use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Environment {
    #[strum(serialize = "development", serialize = "dev", to_string = "development")]
    Development,
    #[strum(serialize = "test", to_string = "test")]
    Test,
    #[strum(serialize = "staging", to_string = "staging")]
    Staging,
    #[strum(serialize = "production", serialize = "prod", to_string = "production")]
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StorageBackend {
    Memory,
    File,
    Sqlite,
}

impl StorageBackend {
    pub fn default_path(&self) -> &'static str {
        match self {
            StorageBackend::File => "licenses.json",
            StorageBackend::Memory | StorageBackend::Sqlite => "licenses.db",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub storage_backend: StorageBackend,
    pub database_path: PathBuf,
    /// Signs validation responses; the insecure default is used when unset
    pub hmac_secret: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    /// Accept unsigned webhooks (never allowed in production)
    pub webhook_skip_verification: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    /// Key the rate limiter by X-Forwarded-For / X-Real-IP
    pub trust_proxy_headers: bool,
    pub request_timeout: Duration,
    pub license_key_prefix: String,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub email_webhook_url: Option<String>,
}

/// Non-empty value of an environment variable.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}

fn flag(name: &str) -> bool {
    var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl Config {
    /// Read configuration from the environment (and `.env`, if present).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let environment: Environment = parse_var("ENVIRONMENT", Environment::Production)?;
        let storage_backend: StorageBackend = parse_var("STORAGE_BACKEND", StorageBackend::Sqlite)?;
        let database_path = var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(storage_backend.default_path()));

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var("PORT", 8080)?,
            environment,
            storage_backend,
            database_path,
            hmac_secret: var("HMAC_SECRET"),
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET"),
            webhook_skip_verification: flag("WEBHOOK_SKIP_VERIFICATION"),
            rate_limit_requests: parse_var("RATE_LIMIT_REQUESTS", 10)?,
            rate_limit_window: Duration::from_secs(parse_var("RATE_LIMIT_WINDOW_SECS", 60)?),
            trust_proxy_headers: flag("TRUST_PROXY_HEADERS"),
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 60)?),
            license_key_prefix: var("LICENSE_KEY_PREFIX").unwrap_or_else(|| "LIC".to_string()),
            resend_api_key: var("RESEND_API_KEY"),
            email_from: var("EMAIL_FROM").unwrap_or_else(|| "licenses@example.com".to_string()),
            email_webhook_url: var("EMAIL_WEBHOOK_URL"),
        })
    }

    /// Refuse configurations that are unsafe to serve with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.environment.is_production() {
            if self.hmac_secret.is_none() {
                bail!("HMAC_SECRET must be set in production");
            }
            if self.webhook_skip_verification {
                bail!("WEBHOOK_SKIP_VERIFICATION cannot be enabled in production");
            }
        }
        if !self.webhook_skip_verification && self.stripe_webhook_secret.is_none() {
            bail!("STRIPE_WEBHOOK_SECRET must be set unless WEBHOOK_SKIP_VERIFICATION is enabled");
        }
        if self.rate_limit_window.is_zero() {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        if self.license_key_prefix.contains(char::is_whitespace) {
            bail!("LICENSE_KEY_PREFIX must not contain whitespace");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        self.addr()
            .parse()
            .with_context(|| format!("invalid listen address {}", self.addr()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 8080,
            environment: Environment::Production,
            storage_backend: StorageBackend::Memory,
            database_path: PathBuf::from("licenses.db"),
            hmac_secret: Some("secret".into()),
            stripe_webhook_secret: Some("whsec".into()),
            webhook_skip_verification: false,
            rate_limit_requests: 10,
            rate_limit_window: Duration::from_secs(60),
            trust_proxy_headers: false,
            request_timeout: Duration::from_secs(60),
            license_key_prefix: "LIC".into(),
            resend_api_key: None,
            email_from: "licenses@example.com".into(),
            email_webhook_url: None,
        }
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!(
            "Development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(Environment::Development.to_string(), "development");
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("SQLITE".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!(StorageBackend::File.to_string(), "file");
        assert_eq!(StorageBackend::File.default_path(), "licenses.json");
    }

    #[test]
    fn test_production_requires_hmac_secret() {
        let mut c = config();
        c.hmac_secret = None;
        assert!(c.validate().is_err());

        c.environment = Environment::Development;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_skipped_verification() {
        let mut c = config();
        c.webhook_skip_verification = true;
        assert!(c.validate().is_err());

        c.environment = Environment::Test;
        c.stripe_webhook_secret = None;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_webhook_secret_required_unless_skipping() {
        let mut c = config();
        c.stripe_webhook_secret = None;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_zero_rate_limit_is_allowed() {
        let mut c = config();
        c.rate_limit_requests = 0;
        assert!(c.validate().is_ok());
    }
}
