//! Baseline Crawler (C11): one-shot fetch of every approved product URL when
//! a website is first approved, seeding `current_*` fields with no history
//! comparison (there is none yet).

use crate::models::{Product, WebsiteStatus};
use crate::store::Store;
use crate::traits::{Fetcher, Parser};
use crate::url_normalize;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

pub struct BaselineResult {
    pub products_created: u32,
    pub errors: Vec<(String, String)>,
}

/// Crawls every URL in `approved_urls` independently: a failure on one URL
/// is recorded and does not abort the batch (spec.md §4.11 invariant).
pub async fn run(
    store: &Store,
    fetcher: &dyn Fetcher,
    parser: &dyn Parser,
    website_id: Uuid,
    approved_urls: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<BaselineResult> {
    let mut result = BaselineResult {
        products_created: 0,
        errors: Vec::new(),
    };

    for url in approved_urls {
        match crawl_one(store, fetcher, parser, website_id, url, now).await {
            Ok(()) => result.products_created += 1,
            Err(err) => {
                warn!(url, error = %err, "baseline crawl failed for url");
                result.errors.push((url.clone(), err.to_string()));
            }
        }
    }

    let website = store
        .get_website(website_id)?
        .ok_or_else(|| anyhow::anyhow!("website {website_id} not found"))?;
    if website.status == WebsiteStatus::PendingApproval && result.products_created > 0 {
        store.record_website_tick_result(
            website_id,
            crate::models::CrawlStatus::Success,
            now,
        )?;
    }

    Ok(result)
}

async fn crawl_one(
    store: &Store,
    fetcher: &dyn Fetcher,
    parser: &dyn Parser,
    website_id: Uuid,
    url: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let response = fetcher.fetch(url).await?;
    let parsed = parser.parse(&response.body);
    let (extracted_product_id, extraction_method) =
        crate::product_id::extract(url, Some(&response.body));

    let product = Product {
        id: Uuid::new_v4(),
        website_id,
        original_url: url.to_string(),
        normalized_url: url_normalize::normalize(url, false),
        extracted_product_id,
        extraction_method,
        product_name: parsed.name.unwrap_or_else(|| url.to_string()),
        current_price: parsed.price,
        current_currency: if parsed.currency.is_empty() {
            Product::default_currency()
        } else {
            parsed.currency
        },
        current_stock_status: parsed.stock_status,
        last_crawled_at: now,
        is_active: true,
        delisted_at: None,
    };

    store.insert_product(&product)?;
    Ok(())
}
