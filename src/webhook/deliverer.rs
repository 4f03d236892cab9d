//! Webhook Deliverer (C9): signs and POSTs change events, retrying on a
//! fixed schedule and truncating stored response bodies.

use crate::error::ObsrvError;
use crate::models::{DeliveryStatus, WebhookDeliveryLog};
use crate::traits::{Transport, TransportResponse};
use crate::webhook::signer;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Minutes to wait before each retry attempt, per spec.md §4.9.
pub const RETRY_SCHEDULE_MINUTES: [i64; 3] = [0, 5, 30];
pub const MAX_ATTEMPTS: u32 = 3;

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<TransportResponse, ObsrvError> {
        let mut request = self.client.post(url).body(body).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ObsrvError::WebhookDeliveryFailed(format!("timeout posting to {url}")))?
            .map_err(|e| ObsrvError::WebhookDeliveryFailed(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ObsrvError::WebhookDeliveryFailed(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

pub struct WebhookDeliverer {
    transport: Box<dyn Transport>,
    timeout: Duration,
    user_agent: String,
}

impl WebhookDeliverer {
    pub fn new(transport: Box<dyn Transport>, timeout_secs: u64, user_agent: String) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(timeout_secs),
            user_agent,
        }
    }

    /// Performs one delivery attempt and returns the log entry to persist.
    /// On transport failure or non-2xx status, the log is marked `retrying`
    /// (if attempts remain) or `exhausted`, with `next_retry_at` set from
    /// [`RETRY_SCHEDULE_MINUTES`].
    pub async fn attempt_delivery(
        &self,
        product_history_id: Uuid,
        website_id: Uuid,
        target_url: &str,
        payload: &serde_json::Value,
        secret: &str,
        attempt_number: u32,
        now: DateTime<Utc>,
    ) -> WebhookDeliveryLog {
        let body = payload.to_string();
        let signature = signer::sign(secret, &body, now);

        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Obsrv-Signature".to_string(), signature.clone()),
            (
                "X-Obsrv-Event".to_string(),
                payload
                    .get("event_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            ),
            (
                "X-Obsrv-Delivery-ID".to_string(),
                Uuid::new_v4().to_string(),
            ),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ];

        let result = self
            .transport
            .post(target_url, body, &headers, self.timeout)
            .await;

        let attempts_remaining = attempt_number < MAX_ATTEMPTS;
        let next_retry_at = attempts_remaining.then(|| {
            let minutes = RETRY_SCHEDULE_MINUTES
                .get(attempt_number as usize)
                .copied()
                .unwrap_or(*RETRY_SCHEDULE_MINUTES.last().unwrap());
            now + ChronoDuration::minutes(minutes)
        });

        match result {
            Ok(TransportResponse { status, body }) if (200..300).contains(&status) => {
                info!(target_url, attempt_number, status, "webhook delivered");
                WebhookDeliveryLog {
                    id: Uuid::new_v4(),
                    product_history_id,
                    website_id,
                    target_url: target_url.to_string(),
                    payload: payload.clone(),
                    signature,
                    timestamp_header: now,
                    attempt_number,
                    delivery_timestamp: now,
                    http_status_code: Some(status),
                    status: DeliveryStatus::Success,
                    response_body: Some(truncate_body(&body)),
                    error_message: None,
                    next_retry_at: None,
                }
            }
            Ok(TransportResponse { status, body }) => {
                warn!(target_url, attempt_number, status, "webhook rejected by endpoint");
                WebhookDeliveryLog {
                    id: Uuid::new_v4(),
                    product_history_id,
                    website_id,
                    target_url: target_url.to_string(),
                    payload: payload.clone(),
                    signature,
                    timestamp_header: now,
                    attempt_number,
                    delivery_timestamp: now,
                    http_status_code: Some(status),
                    status: if attempts_remaining {
                        DeliveryStatus::Retrying
                    } else {
                        DeliveryStatus::Exhausted
                    },
                    response_body: Some(truncate_body(&body)),
                    error_message: None,
                    next_retry_at,
                }
            }
            Err(err) => {
                warn!(target_url, attempt_number, error = %err, "webhook transport error");
                WebhookDeliveryLog {
                    id: Uuid::new_v4(),
                    product_history_id,
                    website_id,
                    target_url: target_url.to_string(),
                    payload: payload.clone(),
                    signature,
                    timestamp_header: now,
                    attempt_number,
                    delivery_timestamp: now,
                    http_status_code: None,
                    status: if attempts_remaining {
                        DeliveryStatus::Retrying
                    } else {
                        DeliveryStatus::Exhausted
                    },
                    response_body: None,
                    error_message: Some(err.to_string()),
                    next_retry_at,
                }
            }
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= WebhookDeliveryLog::RESPONSE_BODY_TRUNCATE_BYTES {
        body.to_string()
    } else {
        let mut end = WebhookDeliveryLog::RESPONSE_BODY_TRUNCATE_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FakeTransport {
        status: u16,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post(
            &self,
            _url: &str,
            _body: String,
            _headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<TransportResponse, ObsrvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse {
                status: self.status,
                body: "ok".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn success_marks_delivered_with_no_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let deliverer = WebhookDeliverer::new(
            Box::new(FakeTransport {
                status: 200,
                calls: calls.clone(),
            }),
            10,
            "Obsrv-Webhook/1.0".to_string(),
        );
        let log = deliverer
            .attempt_delivery(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "https://client.test/hook",
                &serde_json::json!({"event_type": "price_change"}),
                "secret",
                1,
                Utc::now(),
            )
            .await;
        assert_eq!(log.status, DeliveryStatus::Success);
        assert!(log.next_retry_at.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_schedules_retry_until_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let deliverer = WebhookDeliverer::new(
            Box::new(FakeTransport {
                status: 500,
                calls: calls.clone(),
            }),
            10,
            "Obsrv-Webhook/1.0".to_string(),
        );

        let log = deliverer
            .attempt_delivery(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "https://client.test/hook",
                &serde_json::json!({"event_type": "price_change"}),
                "secret",
                1,
                Utc::now(),
            )
            .await;
        assert_eq!(log.status, DeliveryStatus::Retrying);
        assert!(log.next_retry_at.is_some());

        let final_log = deliverer
            .attempt_delivery(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "https://client.test/hook",
                &serde_json::json!({"event_type": "price_change"}),
                "secret",
                MAX_ATTEMPTS,
                Utc::now(),
            )
            .await;
        assert_eq!(final_log.status, DeliveryStatus::Exhausted);
        assert!(final_log.next_retry_at.is_none());
    }

    #[test]
    fn truncates_response_body_to_limit() {
        let long = "x".repeat(2000);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.len(), WebhookDeliveryLog::RESPONSE_BODY_TRUNCATE_BYTES);
    }
}
