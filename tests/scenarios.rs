//! End-to-end scenario tests (spec.md §10, S1-S6), driven through the public
//! `Scheduler`/`Store` API with fake `Fetcher`/`Transport` implementations —
//! no real network or filesystem access.

use async_trait::async_trait;
use chrono::Utc;
use obsrv_core::error::ObsrvError;
use obsrv_core::models::*;
use obsrv_core::scheduler::Scheduler;
use obsrv_core::store::Store;
use obsrv_core::traits::{Clock, Fetcher, FetchResponse, Parser, SystemClock, Transport, TransportResponse};
use obsrv_core::parse::HtmlProductParser;
use obsrv_core::webhook::{self, WebhookDeliverer};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

struct FakeFetcher {
    pages: Mutex<HashMap<String, String>>,
    always_fail: bool,
}

impl FakeFetcher {
    fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            always_fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            always_fail: true,
        }
    }

    fn set_page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, ObsrvError> {
        if self.always_fail {
            return Err(ObsrvError::NetworkError {
                url: url.to_string(),
                message: "simulated outage".to_string(),
            });
        }
        let body = self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ObsrvError::Http4xx { url: url.to_string(), status: 404 })?;
        Ok(FetchResponse {
            final_url: url.to_string(),
            status: 200,
            body,
            fetched_at: Utc::now(),
        })
    }
}

struct FakeTransport {
    statuses: Mutex<Vec<u16>>,
}

impl FakeTransport {
    fn with_statuses(statuses: Vec<u16>) -> Self {
        Self {
            statuses: Mutex::new(statuses),
        }
    }
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
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.is_empty() { 200 } else { statuses.remove(0) };
        Ok(TransportResponse {
            status,
            body: "{}".to_string(),
        })
    }
}

fn seed_website_with_product(
    store: &Store,
    threshold_pct: rust_decimal::Decimal,
    initial_price: rust_decimal::Decimal,
    initial_stock: StockStatus,
) -> (Uuid, Uuid) {
    let client = Client {
        id: Uuid::new_v4(),
        webhook_secret_current: "whsec_test".to_string(),
        webhook_secret_previous: None,
        secret_rotation_expires_at: None,
        max_websites: 5,
        max_products_per_website: 100,
    };
    store.insert_client(&client).unwrap();

    let website = MonitoredWebsite {
        id: Uuid::new_v4(),
        client_id: client.id,
        base_url: "https://shop.test".to_string(),
        seed_urls: vec![],
        status: WebsiteStatus::Active,
        crawl_frequency_minutes: 360,
        price_change_threshold_pct: threshold_pct,
        retention_days: 90,
        discovered_products_pending: None,
        approved_product_count: 1,
        last_successful_crawl_at: None,
        last_crawl_status: None,
        webhook_endpoint_url: Some("https://client.test/hook".to_string()),
        webhook_enabled: true,
        consecutive_failures: 0,
    };
    store.insert_website(&website).unwrap();

    let product = Product {
        id: Uuid::new_v4(),
        website_id: website.id,
        original_url: "https://shop.test/p/1".to_string(),
        normalized_url: "https://shop.test/p/1".to_string(),
        extracted_product_id: Some("1".to_string()),
        extraction_method: "url_pattern_generic".to_string(),
        product_name: "Widget".to_string(),
        current_price: Some(initial_price),
        current_currency: "USD".to_string(),
        current_stock_status: initial_stock,
        last_crawled_at: Utc::now(),
        is_active: true,
        delisted_at: None,
    };
    store.insert_product(&product).unwrap();

    let baseline_log = CrawlExecutionLog::new(website.id, TriggeredBy::Manual, Utc::now());
    store.insert_crawl_log(&baseline_log).unwrap();
    store
        .write_history(
            product.id,
            website.id,
            baseline_log.id,
            Utc::now(),
            "Widget",
            Some(initial_price),
            "USD",
            initial_stock,
            false,
            false,
            None,
            &HashMap::new(),
        )
        .unwrap();

    (website.id, product.id)
}

struct FakeClock {
    now: Mutex<chrono::DateTime<Utc>>,
}

impl FakeClock {
    fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

fn scheduler_with(fetcher: Arc<dyn Fetcher>, transport_statuses: Vec<u16>, store: Arc<Store>) -> Scheduler {
    scheduler_with_clock(fetcher, transport_statuses, store, Arc::new(SystemClock))
}

fn scheduler_with_clock(
    fetcher: Arc<dyn Fetcher>,
    transport_statuses: Vec<u16>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
) -> Scheduler {
    let parser: Arc<dyn Parser> = Arc::new(HtmlProductParser);
    let deliverer = Arc::new(WebhookDeliverer::new(
        Box::new(FakeTransport::with_statuses(transport_statuses)),
        10,
        "Obsrv-Webhook/1.0".to_string(),
    ));
    Scheduler::new(store, fetcher, parser, deliverer, clock, 5)
}

#[tokio::test]
async fn s1_price_change_above_threshold_triggers_webhook() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (website_id, product_id) = seed_website_with_product(&store, dec!(1.0), dec!(100.00), StockStatus::InStock);

    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_page(
        "https://shop.test/p/1",
        r#"<meta property="og:title" content="Widget"><script>{"price":"98.00"}</script><p>in stock, add to cart</p>"#,
    );

    let scheduler = scheduler_with(fetcher, vec![200], store.clone());
    scheduler.run_on_demand(website_id).await.unwrap();

    let record = store.latest_history_record(product_id).unwrap().unwrap();
    assert!(record.price_changed);
    assert_eq!(record.price_change_pct, Some(dec!(-2.00)));
    assert!(!record.stock_changed);

    let deliveries = store.list_webhook_deliveries_for_history(record.id).unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);
}

#[tokio::test]
async fn s2_price_change_below_threshold_suppressed() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (website_id, product_id) = seed_website_with_product(&store, dec!(1.0), dec!(100.00), StockStatus::InStock);

    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_page(
        "https://shop.test/p/1",
        r#"<meta property="og:title" content="Widget"><script>{"price":"99.50"}</script><p>in stock, add to cart</p>"#,
    );

    let scheduler = scheduler_with(fetcher, vec![200], store.clone());
    scheduler.run_on_demand(website_id).await.unwrap();

    let record = store.latest_history_record(product_id).unwrap().unwrap();
    assert!(record.price_changed);
    assert_eq!(record.price_change_pct, Some(dec!(-0.50)));

    let deliveries = store.list_webhook_deliveries_for_history(record.id).unwrap();
    assert!(deliveries.is_empty());
}

#[tokio::test]
async fn s3_stock_change_always_emits() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (website_id, product_id) = seed_website_with_product(&store, dec!(50.0), dec!(100.00), StockStatus::InStock);

    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_page(
        "https://shop.test/p/1",
        r#"<meta property="og:title" content="Widget"><script>{"price":"100.00"}</script><p>sorry, out of stock</p>"#,
    );

    let scheduler = scheduler_with(fetcher, vec![200], store.clone());
    scheduler.run_on_demand(website_id).await.unwrap();

    let record = store.latest_history_record(product_id).unwrap().unwrap();
    assert!(!record.price_changed);
    assert!(record.stock_changed);

    let deliveries = store.list_webhook_deliveries_for_history(record.id).unwrap();
    assert_eq!(deliveries.len(), 1);
}

#[tokio::test]
async fn s4_delivery_retry_then_success() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (website_id, product_id) = seed_website_with_product(&store, dec!(1.0), dec!(100.00), StockStatus::InStock);

    let fetcher = Arc::new(FakeFetcher::new());
    fetcher.set_page(
        "https://shop.test/p/1",
        r#"<meta property="og:title" content="Widget"><script>{"price":"90.00"}</script><p>in stock, add to cart</p>"#,
    );

    // First attempt (during the crawl tick) fails with 503; the retry sweep
    // is invoked twice more, succeeding on the third overall attempt. The
    // fake clock is advanced past each `next_retry_at` gate in between.
    let clock = Arc::new(FakeClock::new());
    let scheduler = scheduler_with_clock(fetcher, vec![503, 503, 200], store.clone(), clock.clone());
    scheduler.run_on_demand(website_id).await.unwrap();
    clock.advance(chrono::Duration::minutes(6));
    scheduler.process_webhook_retries().await.unwrap();
    clock.advance(chrono::Duration::minutes(31));
    scheduler.process_webhook_retries().await.unwrap();

    let record = store.latest_history_record(product_id).unwrap().unwrap();
    let deliveries = store.list_webhook_deliveries_for_history(record.id).unwrap();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].status, DeliveryStatus::Retrying);
    assert_eq!(deliveries[1].status, DeliveryStatus::Retrying);
    assert_eq!(deliveries[2].status, DeliveryStatus::Success);
    assert_eq!(deliveries[0].attempt_number, 1);
    assert_eq!(deliveries[1].attempt_number, 2);
    assert_eq!(deliveries[2].attempt_number, 3);
}

#[tokio::test]
async fn s6_auto_pause_after_three_failures() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let (website_id, _product_id) = seed_website_with_product(&store, dec!(1.0), dec!(100.00), StockStatus::InStock);

    let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher::failing());
    let scheduler = scheduler_with(fetcher, vec![], store.clone());

    for _ in 0..3 {
        scheduler.run_on_demand(website_id).await.unwrap();
    }

    let website = store.get_website(website_id).unwrap().unwrap();
    assert_eq!(website.consecutive_failures, 3);
    assert_eq!(website.status, WebsiteStatus::Paused);
}

#[tokio::test]
async fn s5_replay_rejected() {
    let secret = "whsec_test";
    let body = r#"{"event_type":"product.price_changed"}"#;
    let now = Utc::now();

    let stale_timestamp = now - chrono::Duration::seconds(400);
    let stale_header = webhook::sign(secret, body, stale_timestamp);
    assert!(webhook::verify(&stale_header, body, secret, None, now).is_err());

    let fresh_timestamp = now - chrono::Duration::seconds(100);
    let fresh_header = webhook::sign(secret, body, fresh_timestamp);
    assert!(webhook::verify(&fresh_header, body, secret, None, now).is_ok());
}
