//! Application configuration, loaded from the environment.

use crate::error::ObsrvError;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub environment: String,

    pub default_crawl_timeout_secs: u64,
    pub max_concurrent_crawls: usize,
    pub crawl_rate_limit_per_domain: u32,
    pub crawl_retry_attempts: u32,
    pub crawl_retry_backoff_base_secs: u64,

    pub webhook_timeout_secs: u64,
    pub webhook_max_retries: u32,
    pub webhook_retry_backoff_base_secs: u64,
    pub webhook_signature_tolerance_secs: i64,
    pub secret_rotation_grace_secs: i64,

    pub default_retention_days: u32,
    pub max_retention_days: u32,

    pub user_agent: String,
    pub webhook_user_agent: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./obsrv.db".to_string());

        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let default_crawl_timeout_secs = std::env::var("DEFAULT_CRAWL_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let max_concurrent_crawls = std::env::var("MAX_CONCURRENT_CRAWLS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let crawl_rate_limit_per_domain = std::env::var("CRAWL_RATE_LIMIT_PER_DOMAIN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let crawl_retry_attempts = std::env::var("CRAWL_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let crawl_retry_backoff_base_secs = std::env::var("CRAWL_RETRY_BACKOFF_BASE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let webhook_timeout_secs = std::env::var("WEBHOOK_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let webhook_max_retries = std::env::var("WEBHOOK_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let webhook_retry_backoff_base_secs = std::env::var("WEBHOOK_RETRY_BACKOFF_BASE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let webhook_signature_tolerance_secs =
            std::env::var("WEBHOOK_SIGNATURE_TOLERANCE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300);

        let secret_rotation_grace_secs = std::env::var("SECRET_ROTATION_GRACE_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);

        let default_retention_days = std::env::var("DEFAULT_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90);

        let max_retention_days = std::env::var("MAX_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(365);

        let user_agent = std::env::var("USER_AGENT").unwrap_or_else(|_| {
            "Mozilla/5.0 (compatible; ObsrvBot/1.0; +https://obsrv.example.com/bot)".to_string()
        });

        let webhook_user_agent =
            std::env::var("WEBHOOK_USER_AGENT").unwrap_or_else(|_| "Obsrv-Webhook/1.0".to_string());

        let config = Self {
            database_path,
            environment,
            default_crawl_timeout_secs,
            max_concurrent_crawls,
            crawl_rate_limit_per_domain,
            crawl_retry_attempts,
            crawl_retry_backoff_base_secs,
            webhook_timeout_secs,
            webhook_max_retries,
            webhook_retry_backoff_base_secs,
            webhook_signature_tolerance_secs,
            secret_rotation_grace_secs,
            default_retention_days,
            max_retention_days,
            user_agent,
            webhook_user_agent,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Mirrors the original's environment validator: only the two known
    /// environment names are accepted.
    fn validate(&self) -> Result<(), ObsrvError> {
        if !self.environment.eq_ignore_ascii_case("production")
            && !self.environment.eq_ignore_ascii_case("development")
        {
            return Err(ObsrvError::Validation(format!(
                "ENVIRONMENT must be 'development' or 'production', got '{}'",
                self.environment
            )));
        }
        Ok(())
    }

    /// Production deployments must not register plaintext webhook endpoints.
    pub fn validate_webhook_url(&self, url: &str) -> Result<(), ObsrvError> {
        if self.is_production() && !url.starts_with("https://") {
            return Err(ObsrvError::Validation(
                "webhook endpoint must use https:// in production".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_environment() {
        let mut cfg = blank_config();
        cfg.environment = "staging".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn production_requires_https_webhook() {
        let mut cfg = blank_config();
        cfg.environment = "production".to_string();
        assert!(cfg.validate_webhook_url("http://example.com/hook").is_err());
        assert!(cfg.validate_webhook_url("https://example.com/hook").is_ok());
    }

    fn blank_config() -> Config {
        Config {
            database_path: "./obsrv.db".to_string(),
            environment: "development".to_string(),
            default_crawl_timeout_secs: 30,
            max_concurrent_crawls: 5,
            crawl_rate_limit_per_domain: 10,
            crawl_retry_attempts: 3,
            crawl_retry_backoff_base_secs: 60,
            webhook_timeout_secs: 10,
            webhook_max_retries: 3,
            webhook_retry_backoff_base_secs: 300,
            webhook_signature_tolerance_secs: 300,
            secret_rotation_grace_secs: 3600,
            default_retention_days: 90,
            max_retention_days: 365,
            user_agent: "test-agent".to_string(),
            webhook_user_agent: "test-webhook-agent".to_string(),
        }
    }
}
