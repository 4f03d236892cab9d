//! Fetcher (C3): per-domain rate-limited HTTP GET with timeout and retry.

mod rate_limit;

pub use rate_limit::DomainRateLimiter;

use crate::error::ObsrvError;
use crate::traits::{FetchResponse, Fetcher};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: DomainRateLimiter,
    timeout: Duration,
    retry_attempts: u32,
    retry_backoff_base_secs: u64,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        timeout_secs: u64,
        rate_limit_per_domain: u32,
        retry_attempts: u32,
        retry_backoff_base_secs: u64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            limiter: DomainRateLimiter::new(rate_limit_per_domain),
            timeout: Duration::from_secs(timeout_secs),
            retry_attempts,
            retry_backoff_base_secs,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, ObsrvError> {
        let host = crate::url_normalize::extract_domain(url)
            .ok_or_else(|| ObsrvError::InvalidUrl(url.to_string()))?;

        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(&host).await;

            debug!(url, attempt, "fetching url");
            let outcome = tokio::time::timeout(self.timeout, self.client.get(url).send()).await;

            let result = match outcome {
                Err(_) => Err(ObsrvError::NetworkTimeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }),
                Ok(Err(e)) => Err(ObsrvError::NetworkError {
                    url: url.to_string(),
                    message: e.to_string(),
                }),
                Ok(Ok(response)) => {
                    let status = response.status();
                    let final_url = response.url().to_string();
                    if status.is_client_error() {
                        Err(ObsrvError::Http4xx {
                            url: url.to_string(),
                            status: status.as_u16(),
                        })
                    } else if status.is_server_error() {
                        Err(ObsrvError::Http5xxExhausted {
                            url: url.to_string(),
                            status: status.as_u16(),
                        })
                    } else {
                        let body = response.text().await.map_err(|e| ObsrvError::NetworkError {
                            url: url.to_string(),
                            message: e.to_string(),
                        })?;
                        return Ok(FetchResponse {
                            final_url,
                            status: status.as_u16(),
                            body,
                            fetched_at: Utc::now(),
                        });
                    }
                }
            };

            match result {
                Err(ObsrvError::Http4xx { .. }) => {
                    // 4xx is permanent: not retried (spec.md §4.3).
                    return result;
                }
                Err(err) if attempt < self.retry_attempts => {
                    let backoff = self.retry_backoff_base_secs * 2u64.pow(attempt);
                    warn!(url, attempt, backoff_secs = backoff, error = %err, "fetch failed, retrying");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                }
                Err(err) => {
                    info!(url, attempts = attempt + 1, "fetch exhausted retries");
                    return Err(err);
                }
                Ok(_) => unreachable!("success returns early above"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_rejected_before_network() {
        let fetcher = HttpFetcher::new("test-agent", 5, 600, 0, 1).unwrap();
        let err = fetcher.fetch("not-a-url").await.unwrap_err();
        assert!(matches!(err, ObsrvError::InvalidUrl(_)));
    }
}
