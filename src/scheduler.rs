//! Scheduler (C10): fans out due websites to bounded-concurrency crawl jobs.
//!
//! Concurrency shape follows the teacher's `DomeEnrichmentService`: an
//! `Arc<Semaphore>` caps in-flight jobs, each job spawned onto its own task.

use crate::change_detector;
use crate::error::ObsrvError;
use crate::models::{CrawlExecutionLog, CrawlStatus, TriggeredBy};
use crate::store::Store;
use crate::traits::{Clock, Fetcher, Parser};
use crate::webhook::deliverer::WebhookDeliverer;
use crate::webhook::schemas::{
    PriceChangeDetails, PriceChangeEvent, PriceChangeMetadata, ProductInfo, StockChangeDetails,
    StockChangeEvent, StockChangeMetadata, WebsiteInfo,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct Scheduler {
    store: Arc<Store>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    deliverer: Arc<WebhookDeliverer>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        deliverer: Arc<WebhookDeliverer>,
        clock: Arc<dyn Clock>,
        max_concurrent_crawls: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            parser,
            deliverer,
            clock,
            semaphore: Arc::new(Semaphore::new(max_concurrent_crawls.max(1))),
        }
    }

    /// Runs one scheduler tick: crawls every active website whose due time
    /// has passed, bounded by `max_concurrent_crawls` in-flight jobs.
    pub async fn run_tick(&self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let websites = self.store.list_active_websites()?;

        let mut handles = Vec::new();
        for website in websites {
            if !is_due(
                website.last_successful_crawl_at,
                website.crawl_frequency_minutes,
                now,
            ) {
                continue;
            }

            let permit = self.semaphore.clone().acquire_owned().await?;
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            let parser = self.parser.clone();
            let deliverer = self.deliverer.clone();
            let website_id = website.id;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) =
                    crawl_website(&store, &*fetcher, &*parser, &deliverer, website_id, now).await
                {
                    error!(website_id = %website_id, error = %err, "crawl job failed");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Runs a single website's crawl immediately, bypassing the due-time
    /// check (spec.md §4.10 "on-demand" trigger).
    pub async fn run_on_demand(&self, website_id: Uuid) -> anyhow::Result<()> {
        let now = self.clock.now();
        crawl_website(
            &self.store,
            &*self.fetcher,
            &*self.parser,
            &self.deliverer,
            website_id,
            now,
        )
        .await
    }

    /// Promotes every delivery whose `next_retry_at` has passed, per
    /// spec.md §4.9's three-attempt retry schedule (S4).
    pub async fn process_webhook_retries(&self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let due = self.store.list_retryable_deliveries(now)?;
        for log in due {
            let website = match self.store.get_website(log.website_id)? {
                Some(w) => w,
                None => continue,
            };
            let client = match self.store.get_client(website.client_id)? {
                Some(c) => c,
                None => continue,
            };

            let next_attempt = log.attempt_number + 1;
            let new_log = self
                .deliverer
                .attempt_delivery(
                    log.product_history_id,
                    log.website_id,
                    &log.target_url,
                    &log.payload,
                    &client.webhook_secret_current,
                    next_attempt,
                    now,
                )
                .await;
            self.store.insert_webhook_delivery_log(&new_log)?;
        }
        Ok(())
    }
}

fn is_due(
    last_successful_crawl_at: Option<DateTime<Utc>>,
    crawl_frequency_minutes: u32,
    now: DateTime<Utc>,
) -> bool {
    match last_successful_crawl_at {
        None => true,
        Some(last) => {
            now.signed_duration_since(last) >= chrono::Duration::minutes(crawl_frequency_minutes as i64)
        }
    }
}

/// Per-website crawl job: open a [`CrawlExecutionLog`], crawl each active
/// product, detect changes, write history, enqueue webhooks, then close the
/// log and update the website's bookkeeping (spec.md §4.10).
async fn crawl_website(
    store: &Store,
    fetcher: &dyn Fetcher,
    parser: &dyn Parser,
    deliverer: &WebhookDeliverer,
    website_id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let website = store
        .get_website(website_id)?
        .ok_or_else(|| anyhow::anyhow!("website {website_id} not found"))?;

    let mut log = CrawlExecutionLog::new(website_id, TriggeredBy::Scheduled, now);
    store.insert_crawl_log(&log)?;

    let products = store.list_active_products(website_id)?;
    let client = store
        .get_client(website.client_id)?
        .ok_or_else(|| anyhow::anyhow!("client {} not found", website.client_id))?;

    for product in products {
        let response = match fetcher.fetch(&product.original_url).await {
            Ok(r) => r,
            Err(ObsrvError::Http4xx { status: 404, .. }) => {
                warn!(url = %product.original_url, "product url returned 404, delisting");
                store.mark_product_delisted(product.id, now)?;
                log.errors_count += 1;
                continue;
            }
            Err(err) => {
                warn!(url = %product.original_url, error = %err, "product fetch failed");
                log.errors_count += 1;
                continue;
            }
        };

        let parsed = parser.parse(&response.body);
        let previous = store.latest_history_snapshot(product.id)?;
        let change = change_detector::detect(
            previous,
            parsed.price,
            parsed.stock_status,
            website.price_change_threshold_pct,
        );

        let mut raw = HashMap::new();
        raw.insert("final_url".to_string(), response.final_url.clone());
        raw.insert("http_status".to_string(), response.status.to_string());
        if let Some(name) = &parsed.name {
            raw.insert("parsed_name".to_string(), name.clone());
        }
        if let Some(price) = parsed.price {
            raw.insert("parsed_price".to_string(), price.to_string());
        }
        raw.insert("parsed_currency".to_string(), parsed.currency.clone());
        raw.insert(
            "parsed_stock_status".to_string(),
            parsed.stock_status.as_str().to_string(),
        );
        raw.insert("raw_html".to_string(), truncate_html(&response.body));

        let record = store.write_history(
            product.id,
            website_id,
            log.id,
            now,
            parsed.name.as_deref().unwrap_or(&product.product_name),
            parsed.price,
            &parsed.currency,
            parsed.stock_status,
            change.price_changed,
            change.stock_changed,
            change.price_change_pct,
            &raw,
        )?;

        log.products_processed += 1;
        if change.price_changed || change.stock_changed {
            log.changes_detected += 1;
        }

        let should_notify = change.stock_changed || (change.price_changed && change.exceeded_threshold);
        if website.webhook_enabled && website.webhook_endpoint_url.is_some() && should_notify {
            deliver_change_webhooks(
                store,
                deliverer,
                &website,
                &client.webhook_secret_current,
                &product,
                &change,
                log.id,
                record.id,
                now,
            )
            .await;
        }
    }

    log.status = log.terminal_status();
    log.completed_at = Some(now);
    log.duration_seconds = Some(now.signed_duration_since(log.started_at).num_milliseconds() as f64 / 1000.0);
    store.close_crawl_log(&log)?;

    store.record_website_tick_result(website_id, log.status, now)?;
    info!(
        website_id = %website_id,
        products = log.products_processed,
        changes = log.changes_detected,
        status = log.status.as_str(),
        "crawl tick complete"
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn deliver_change_webhooks(
    store: &Store,
    deliverer: &WebhookDeliverer,
    website: &crate::models::MonitoredWebsite,
    secret: &str,
    product: &crate::models::Product,
    change: &change_detector::ChangeResult,
    crawl_id: Uuid,
    product_history_id: Uuid,
    now: DateTime<Utc>,
) {
    let target_url = website.webhook_endpoint_url.as_ref().unwrap();
    let website_info = WebsiteInfo {
        id: website.id,
        base_url: website.base_url.clone(),
        name: website.base_url.clone(),
    };
    let product_info = ProductInfo {
        id: product.id,
        url: product.original_url.clone(),
        name: product.product_name.clone(),
        extracted_product_id: product.extracted_product_id.clone(),
    };

    if change.price_changed && change.exceeded_threshold {
        // Per spec.md §6's Open Question resolution: a null-value transition
        // (old/new price null, or old price zero) carries no meaningful
        // delta, so it is emitted with an explicit null pct and a zero
        // absolute_change rather than guessed.
        let absolute_change = match (change.old_price, change.new_price) {
            (Some(old), Some(new)) if change.price_change_pct.is_some() => new - old,
            _ => Decimal::ZERO,
        };
        let event = PriceChangeEvent::new(
            website_info.clone(),
            product_info.clone(),
            PriceChangeDetails {
                kind: "price".to_string(),
                old_value: change.old_price,
                new_value: change.new_price,
                currency: product.current_currency.clone(),
                change_pct: change.price_change_pct,
                absolute_change,
                detected_at: now,
            },
            PriceChangeMetadata {
                crawl_id,
                threshold_pct: website.price_change_threshold_pct,
                exceeded_threshold: change.exceeded_threshold,
            },
            product_history_id,
            now,
        );
        persist_delivery(store, deliverer, target_url, secret, website.id, product_history_id, &event, now).await;
    }

    if change.stock_changed {
        let event = StockChangeEvent::new(
            website_info,
            product_info,
            StockChangeDetails {
                kind: "stock".to_string(),
                old_value: change.old_stock.map(|s| s.as_str().to_string()).unwrap_or_default(),
                new_value: change.new_stock.as_str().to_string(),
                detected_at: now,
            },
            StockChangeMetadata {
                crawl_id,
                price_at_change: change.new_price,
                currency: product.current_currency.clone(),
            },
            product_history_id,
            now,
        );
        persist_delivery(store, deliverer, target_url, secret, website.id, product_history_id, &event, now).await;
    }
}

/// Truncates stored raw HTML to bound `crawl_execution_logs` row size
/// (spec.md §4.7), matching the original crawler's `html[:10000]`.
const HTML_TRUNCATE_BYTES: usize = 10_000;

fn truncate_html(html: &str) -> String {
    if html.len() <= HTML_TRUNCATE_BYTES {
        html.to_string()
    } else {
        let mut end = HTML_TRUNCATE_BYTES;
        while !html.is_char_boundary(end) {
            end -= 1;
        }
        html[..end].to_string()
    }
}

async fn persist_delivery<T: serde::Serialize>(
    store: &Store,
    deliverer: &WebhookDeliverer,
    target_url: &str,
    secret: &str,
    website_id: Uuid,
    product_history_id: Uuid,
    event: &T,
    now: DateTime<Utc>,
) {
    let payload = serde_json::to_value(event).expect("event schema always serializes");
    let log = deliverer
        .attempt_delivery(product_history_id, website_id, target_url, &payload, secret, 1, now)
        .await;
    if let Err(err) = store.insert_webhook_delivery_log(&log) {
        error!(error = %err, "failed to persist webhook delivery log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_on_first_crawl() {
        assert!(is_due(None, 360, Utc::now()));
    }

    #[test]
    fn not_due_before_frequency_elapses() {
        let now = Utc::now();
        assert!(!is_due(Some(now), 360, now));
    }

    #[test]
    fn due_after_frequency_elapses() {
        let now = Utc::now();
        let last = now - chrono::Duration::minutes(361);
        assert!(is_due(Some(last), 360, now));
    }
}
