//! Persistence layer (C7 History Writer + Store for all other entities).
//!
//! Grounded in the teacher's `signals/db_storage.rs`: WAL mode, tuned
//! PRAGMAs, an embedded `SCHEMA_SQL` constant, and `parking_lot::Mutex`
//! guarding the connection (faster than `std::sync::Mutex` for the short,
//! synchronous critical sections rusqlite requires).

use crate::error::ObsrvError;
use crate::models::*;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    webhook_secret_current TEXT NOT NULL,
    webhook_secret_previous TEXT,
    secret_rotation_expires_at TEXT,
    max_websites INTEGER NOT NULL,
    max_products_per_website INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS websites (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    base_url TEXT NOT NULL,
    seed_urls TEXT NOT NULL,
    status TEXT NOT NULL,
    crawl_frequency_minutes INTEGER NOT NULL,
    price_change_threshold_pct TEXT NOT NULL,
    retention_days INTEGER NOT NULL,
    discovered_products_pending INTEGER,
    approved_product_count INTEGER NOT NULL DEFAULT 0,
    last_successful_crawl_at TEXT,
    last_crawl_status TEXT,
    webhook_endpoint_url TEXT,
    webhook_enabled INTEGER NOT NULL DEFAULT 0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY,
    website_id TEXT NOT NULL REFERENCES websites(id) ON DELETE CASCADE,
    original_url TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    extracted_product_id TEXT,
    extraction_method TEXT NOT NULL,
    product_name TEXT NOT NULL,
    current_price TEXT,
    current_currency TEXT NOT NULL,
    current_stock_status TEXT NOT NULL,
    last_crawled_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    delisted_at TEXT,
    UNIQUE (website_id, normalized_url)
);

CREATE TABLE IF NOT EXISTS crawl_execution_logs (
    id TEXT PRIMARY KEY,
    website_id TEXT NOT NULL REFERENCES websites(id) ON DELETE CASCADE,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    duration_seconds REAL,
    status TEXT NOT NULL,
    products_processed INTEGER NOT NULL DEFAULT 0,
    changes_detected INTEGER NOT NULL DEFAULT 0,
    errors_count INTEGER NOT NULL DEFAULT 0,
    error_details TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    triggered_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS product_history (
    id TEXT PRIMARY KEY,
    product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    website_id TEXT NOT NULL,
    crawl_log_id TEXT NOT NULL REFERENCES crawl_execution_logs(id),
    crawl_timestamp TEXT NOT NULL,
    price TEXT,
    currency TEXT NOT NULL,
    stock_status TEXT NOT NULL,
    price_changed INTEGER NOT NULL,
    stock_changed INTEGER NOT NULL,
    price_change_pct TEXT,
    raw_crawl_data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_product_history_product_ts
    ON product_history(product_id, crawl_timestamp DESC);

CREATE TABLE IF NOT EXISTS webhook_delivery_logs (
    id TEXT PRIMARY KEY,
    product_history_id TEXT NOT NULL,
    website_id TEXT NOT NULL,
    target_url TEXT NOT NULL,
    payload TEXT NOT NULL,
    signature TEXT NOT NULL,
    timestamp_header TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,
    delivery_timestamp TEXT NOT NULL,
    http_status_code INTEGER,
    status TEXT NOT NULL,
    response_body TEXT,
    error_message TEXT,
    next_retry_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_webhook_delivery_retry
    ON webhook_delivery_logs(status, next_retry_at);
"#;

pub struct Store {
    conn: Mutex<Connection>,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, ObsrvError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ObsrvError::Database(rusqlite::Error::InvalidParameterName(e.to_string())))
}

fn dec_to_str(d: Option<Decimal>) -> Option<String> {
    d.map(|v| v.to_string())
}

fn str_to_dec(s: Option<String>) -> Option<Decimal> {
    s.and_then(|v| Decimal::from_str(&v).ok())
}

impl Store {
    pub fn open(path: &str) -> Result<Self, ObsrvError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, ObsrvError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- Client -------------------------------------------------------

    pub fn insert_client(&self, client: &Client) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO clients (id, webhook_secret_current, webhook_secret_previous, \
             secret_rotation_expires_at, max_websites, max_products_per_website) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                client.id.to_string(),
                client.webhook_secret_current,
                client.webhook_secret_previous,
                client.secret_rotation_expires_at.map(ts),
                client.max_websites,
                client.max_products_per_website,
            ],
        )?;
        Ok(())
    }

    pub fn get_client(&self, id: Uuid) -> Result<Option<Client>, ObsrvError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, webhook_secret_current, webhook_secret_previous, \
             secret_rotation_expires_at, max_websites, max_products_per_website \
             FROM clients WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let rotation: Option<String> = row.get(3)?;
                Ok(Client {
                    id,
                    webhook_secret_current: row.get(1)?,
                    webhook_secret_previous: row.get(2)?,
                    secret_rotation_expires_at: rotation.and_then(|s| parse_ts(&s).ok()),
                    max_websites: row.get(4)?,
                    max_products_per_website: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    // ---- MonitoredWebsite ----------------------------------------------

    pub fn insert_website(&self, website: &MonitoredWebsite) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO websites (id, client_id, base_url, seed_urls, status, \
             crawl_frequency_minutes, price_change_threshold_pct, retention_days, \
             discovered_products_pending, approved_product_count, last_successful_crawl_at, \
             last_crawl_status, webhook_endpoint_url, webhook_enabled, consecutive_failures) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                website.id.to_string(),
                website.client_id.to_string(),
                website.base_url,
                serde_json::to_string(&website.seed_urls).unwrap(),
                website.status.as_str(),
                website.crawl_frequency_minutes,
                website.price_change_threshold_pct.to_string(),
                website.retention_days,
                website.discovered_products_pending,
                website.approved_product_count,
                website.last_successful_crawl_at.map(ts),
                website.last_crawl_status.map(|s| s.as_str().to_string()),
                website.webhook_endpoint_url,
                website.webhook_enabled as i64,
                website.consecutive_failures,
            ],
        )?;
        Ok(())
    }

    pub fn list_active_websites(&self) -> Result<Vec<MonitoredWebsite>, ObsrvError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, client_id, base_url, seed_urls, status, crawl_frequency_minutes, \
             price_change_threshold_pct, retention_days, discovered_products_pending, \
             approved_product_count, last_successful_crawl_at, last_crawl_status, \
             webhook_endpoint_url, webhook_enabled, consecutive_failures \
             FROM websites WHERE status = 'active'",
        )?;
        let rows = stmt
            .query_map([], |row| row_to_website(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_website(&self, id: Uuid) -> Result<Option<MonitoredWebsite>, ObsrvError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, client_id, base_url, seed_urls, status, crawl_frequency_minutes, \
             price_change_threshold_pct, retention_days, discovered_products_pending, \
             approved_product_count, last_successful_crawl_at, last_crawl_status, \
             webhook_endpoint_url, webhook_enabled, consecutive_failures \
             FROM websites WHERE id = ?1",
            params![id.to_string()],
            row_to_website,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Applies §4.10 step 5: update last-crawl bookkeeping, bump/reset
    /// `consecutive_failures`, and auto-pause after 3 consecutive failures.
    pub fn record_website_tick_result(
        &self,
        website_id: Uuid,
        terminal_status: CrawlStatus,
        now: DateTime<Utc>,
    ) -> Result<MonitoredWebsite, ObsrvError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut website: MonitoredWebsite = tx.query_row(
            "SELECT id, client_id, base_url, seed_urls, status, crawl_frequency_minutes, \
             price_change_threshold_pct, retention_days, discovered_products_pending, \
             approved_product_count, last_successful_crawl_at, last_crawl_status, \
             webhook_endpoint_url, webhook_enabled, consecutive_failures \
             FROM websites WHERE id = ?1",
            params![website_id.to_string()],
            row_to_website,
        )?;

        website.last_crawl_status = Some(terminal_status);
        if terminal_status.counts_as_successful() {
            website.last_successful_crawl_at = Some(now);
            website.consecutive_failures = 0;
        } else {
            website.consecutive_failures += 1;
            if website.should_auto_pause() {
                website.status = WebsiteStatus::Paused;
            }
        }

        tx.execute(
            "UPDATE websites SET last_successful_crawl_at = ?1, last_crawl_status = ?2, \
             consecutive_failures = ?3, status = ?4 WHERE id = ?5",
            params![
                website.last_successful_crawl_at.map(ts),
                website.last_crawl_status.map(|s| s.as_str().to_string()),
                website.consecutive_failures,
                website.status.as_str(),
                website_id.to_string(),
            ],
        )?;
        tx.commit()?;
        Ok(website)
    }

    // ---- Product --------------------------------------------------------

    pub fn insert_product(&self, product: &Product) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO products (id, website_id, original_url, normalized_url, \
             extracted_product_id, extraction_method, product_name, current_price, \
             current_currency, current_stock_status, last_crawled_at, is_active, delisted_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                product.id.to_string(),
                product.website_id.to_string(),
                product.original_url,
                product.normalized_url,
                product.extracted_product_id,
                product.extraction_method,
                product.product_name,
                dec_to_str(product.current_price),
                product.current_currency,
                product.current_stock_status.as_str(),
                ts(product.last_crawled_at),
                product.is_active as i64,
                product.delisted_at.map(ts),
            ],
        )?;
        Ok(())
    }

    pub fn list_active_products(&self, website_id: Uuid) -> Result<Vec<Product>, ObsrvError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, website_id, original_url, normalized_url, extracted_product_id, \
             extraction_method, product_name, current_price, current_currency, \
             current_stock_status, last_crawled_at, is_active, delisted_at \
             FROM products WHERE website_id = ?1 AND is_active = 1",
        )?;
        let rows = stmt
            .query_map(params![website_id.to_string()], row_to_product)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_product_delisted(&self, product_id: Uuid, now: DateTime<Utc>) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE products SET is_active = 0, delisted_at = ?1 WHERE id = ?2",
            params![ts(now), product_id.to_string()],
        )?;
        Ok(())
    }

    /// Latest history snapshot for a product, used by the Change Detector.
    pub fn latest_history_snapshot(
        &self,
        product_id: Uuid,
    ) -> Result<Option<(Option<Decimal>, StockStatus)>, ObsrvError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT price, stock_status FROM product_history \
             WHERE product_id = ?1 ORDER BY crawl_timestamp DESC LIMIT 1",
            params![product_id.to_string()],
            |row| {
                let price: Option<String> = row.get(0)?;
                let stock: String = row.get(1)?;
                Ok((
                    str_to_dec(price),
                    StockStatus::from_str(&stock).unwrap_or(StockStatus::Unknown),
                ))
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Full latest history row, for callers (tests, reporting) that need the
    /// change flags rather than just the snapshot values.
    pub fn latest_history_record(
        &self,
        product_id: Uuid,
    ) -> Result<Option<ProductHistoryRecord>, ObsrvError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, product_id, website_id, crawl_log_id, crawl_timestamp, price, currency, \
             stock_status, price_changed, stock_changed, price_change_pct, raw_crawl_data \
             FROM product_history WHERE product_id = ?1 ORDER BY crawl_timestamp DESC LIMIT 1",
            params![product_id.to_string()],
            row_to_history_record,
        )
        .optional()
        .map_err(Into::into)
    }

    /// History Writer (C7): product current-state update and history insert
    /// commit in a single transaction, or neither persists.
    #[allow(clippy::too_many_arguments)]
    pub fn write_history(
        &self,
        product_id: Uuid,
        website_id: Uuid,
        crawl_log_id: Uuid,
        crawl_timestamp: DateTime<Utc>,
        product_name: &str,
        price: Option<Decimal>,
        currency: &str,
        stock_status: StockStatus,
        price_changed: bool,
        stock_changed: bool,
        price_change_pct: Option<Decimal>,
        raw_crawl_data: &HashMap<String, String>,
    ) -> Result<ProductHistoryRecord, ObsrvError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE products SET current_price = ?1, current_stock_status = ?2, \
             product_name = ?3, last_crawled_at = ?4 WHERE id = ?5",
            params![
                dec_to_str(price),
                stock_status.as_str(),
                product_name,
                ts(crawl_timestamp),
                product_id.to_string(),
            ],
        )?;

        let record = ProductHistoryRecord {
            id: Uuid::new_v4(),
            product_id,
            website_id,
            crawl_log_id,
            crawl_timestamp,
            price,
            currency: currency.to_string(),
            stock_status,
            price_changed,
            stock_changed,
            price_change_pct,
            raw_crawl_data: raw_crawl_data.clone(),
        };

        tx.execute(
            "INSERT INTO product_history (id, product_id, website_id, crawl_log_id, \
             crawl_timestamp, price, currency, stock_status, price_changed, stock_changed, \
             price_change_pct, raw_crawl_data) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                record.id.to_string(),
                product_id.to_string(),
                website_id.to_string(),
                crawl_log_id.to_string(),
                ts(crawl_timestamp),
                dec_to_str(price),
                currency,
                stock_status.as_str(),
                price_changed as i64,
                stock_changed as i64,
                dec_to_str(price_change_pct),
                serde_json::to_string(raw_crawl_data).unwrap(),
            ],
        )?;

        tx.commit()?;
        Ok(record)
    }

    // ---- CrawlExecutionLog ----------------------------------------------

    pub fn insert_crawl_log(&self, log: &CrawlExecutionLog) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO crawl_execution_logs (id, website_id, started_at, completed_at, \
             duration_seconds, status, products_processed, changes_detected, errors_count, \
             error_details, retry_count, triggered_by) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                log.id.to_string(),
                log.website_id.to_string(),
                ts(log.started_at),
                log.completed_at.map(ts),
                log.duration_seconds,
                log.status.as_str(),
                log.products_processed,
                log.changes_detected,
                log.errors_count,
                log.error_details,
                log.retry_count,
                log.triggered_by.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn close_crawl_log(&self, log: &CrawlExecutionLog) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE crawl_execution_logs SET completed_at = ?1, duration_seconds = ?2, \
             status = ?3, products_processed = ?4, changes_detected = ?5, errors_count = ?6, \
             error_details = ?7 WHERE id = ?8",
            params![
                log.completed_at.map(ts),
                log.duration_seconds,
                log.status.as_str(),
                log.products_processed,
                log.changes_detected,
                log.errors_count,
                log.error_details,
                log.id.to_string(),
            ],
        )?;
        Ok(())
    }

    // ---- WebhookDeliveryLog ----------------------------------------------

    pub fn insert_webhook_delivery_log(&self, log: &WebhookDeliveryLog) -> Result<(), ObsrvError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO webhook_delivery_logs (id, product_history_id, website_id, \
             target_url, payload, signature, timestamp_header, attempt_number, \
             delivery_timestamp, http_status_code, status, response_body, error_message, \
             next_retry_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                log.id.to_string(),
                log.product_history_id.to_string(),
                log.website_id.to_string(),
                log.target_url,
                log.payload.to_string(),
                log.signature,
                ts(log.timestamp_header),
                log.attempt_number,
                ts(log.delivery_timestamp),
                log.http_status_code,
                log.status.as_str(),
                log.response_body,
                log.error_message,
                log.next_retry_at.map(ts),
            ],
        )?;
        Ok(())
    }

    /// Rows a retry sweeper should promote: `status = retrying` and
    /// `next_retry_at` has passed (spec.md §9 background-execution note).
    pub fn list_retryable_deliveries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDeliveryLog>, ObsrvError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, product_history_id, website_id, target_url, payload, signature, \
             timestamp_header, attempt_number, delivery_timestamp, http_status_code, status, \
             response_body, error_message, next_retry_at FROM webhook_delivery_logs \
             WHERE status = 'retrying' AND next_retry_at <= ?1",
        )?;
        let rows = stmt
            .query_map(params![ts(now)], row_to_delivery_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All delivery attempts for one change event, ordered oldest-first.
    pub fn list_webhook_deliveries_for_history(
        &self,
        product_history_id: Uuid,
    ) -> Result<Vec<WebhookDeliveryLog>, ObsrvError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, product_history_id, website_id, target_url, payload, signature, \
             timestamp_header, attempt_number, delivery_timestamp, http_status_code, status, \
             response_body, error_message, next_retry_at FROM webhook_delivery_logs \
             WHERE product_history_id = ?1 ORDER BY delivery_timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![product_history_id.to_string()], row_to_delivery_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_website(row: &rusqlite::Row) -> rusqlite::Result<MonitoredWebsite> {
    let id: String = row.get(0)?;
    let client_id: String = row.get(1)?;
    let seed_urls: String = row.get(3)?;
    let status: String = row.get(4)?;
    let threshold: String = row.get(6)?;
    let last_crawl_at: Option<String> = row.get(10)?;
    let last_crawl_status: Option<String> = row.get(11)?;

    Ok(MonitoredWebsite {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        client_id: Uuid::parse_str(&client_id).unwrap_or_default(),
        base_url: row.get(2)?,
        seed_urls: serde_json::from_str(&seed_urls).unwrap_or_default(),
        status: WebsiteStatus::from_str(&status).unwrap_or(WebsiteStatus::Failed),
        crawl_frequency_minutes: row.get(5)?,
        price_change_threshold_pct: Decimal::from_str(&threshold).unwrap_or_default(),
        retention_days: row.get(7)?,
        discovered_products_pending: row.get(8)?,
        approved_product_count: row.get(9)?,
        last_successful_crawl_at: last_crawl_at.and_then(|s| parse_ts(&s).ok()),
        last_crawl_status: last_crawl_status.and_then(|s| CrawlStatus::from_str(&s)),
        webhook_endpoint_url: row.get(12)?,
        webhook_enabled: row.get::<_, i64>(13)? != 0,
        consecutive_failures: row.get(14)?,
    })
}

fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    let id: String = row.get(0)?;
    let website_id: String = row.get(1)?;
    let current_price: Option<String> = row.get(7)?;
    let stock: String = row.get(9)?;
    let last_crawled_at: String = row.get(10)?;
    let delisted_at: Option<String> = row.get(12)?;

    Ok(Product {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        website_id: Uuid::parse_str(&website_id).unwrap_or_default(),
        original_url: row.get(2)?,
        normalized_url: row.get(3)?,
        extracted_product_id: row.get(4)?,
        extraction_method: row.get(5)?,
        product_name: row.get(6)?,
        current_price: str_to_dec(current_price),
        current_currency: row.get(8)?,
        current_stock_status: StockStatus::from_str(&stock).unwrap_or(StockStatus::Unknown),
        last_crawled_at: parse_ts(&last_crawled_at).unwrap_or_else(|_| Utc::now()),
        is_active: row.get::<_, i64>(11)? != 0,
        delisted_at: delisted_at.and_then(|s| parse_ts(&s).ok()),
    })
}

fn row_to_history_record(row: &rusqlite::Row) -> rusqlite::Result<ProductHistoryRecord> {
    let id: String = row.get(0)?;
    let product_id: String = row.get(1)?;
    let website_id: String = row.get(2)?;
    let crawl_log_id: String = row.get(3)?;
    let crawl_timestamp: String = row.get(4)?;
    let price: Option<String> = row.get(5)?;
    let stock: String = row.get(7)?;
    let price_change_pct: Option<String> = row.get(10)?;
    let raw: String = row.get(11)?;

    Ok(ProductHistoryRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        product_id: Uuid::parse_str(&product_id).unwrap_or_default(),
        website_id: Uuid::parse_str(&website_id).unwrap_or_default(),
        crawl_log_id: Uuid::parse_str(&crawl_log_id).unwrap_or_default(),
        crawl_timestamp: parse_ts(&crawl_timestamp).unwrap_or_else(|_| Utc::now()),
        price: str_to_dec(price),
        currency: row.get(6)?,
        stock_status: StockStatus::from_str(&stock).unwrap_or(StockStatus::Unknown),
        price_changed: row.get::<_, i64>(8)? != 0,
        stock_changed: row.get::<_, i64>(9)? != 0,
        price_change_pct: str_to_dec(price_change_pct),
        raw_crawl_data: serde_json::from_str(&raw).unwrap_or_default(),
    })
}

fn row_to_delivery_log(row: &rusqlite::Row) -> rusqlite::Result<WebhookDeliveryLog> {
    let id: String = row.get(0)?;
    let product_history_id: String = row.get(1)?;
    let website_id: String = row.get(2)?;
    let payload: String = row.get(4)?;
    let timestamp_header: String = row.get(6)?;
    let delivery_timestamp: String = row.get(8)?;
    let status: String = row.get(10)?;
    let next_retry_at: Option<String> = row.get(13)?;

    Ok(WebhookDeliveryLog {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        product_history_id: Uuid::parse_str(&product_history_id).unwrap_or_default(),
        website_id: Uuid::parse_str(&website_id).unwrap_or_default(),
        target_url: row.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        signature: row.get(5)?,
        timestamp_header: parse_ts(&timestamp_header).unwrap_or_else(|_| Utc::now()),
        attempt_number: row.get(7)?,
        delivery_timestamp: parse_ts(&delivery_timestamp).unwrap_or_else(|_| Utc::now()),
        http_status_code: row.get(9)?,
        status: DeliveryStatus::from_str(&status).unwrap_or(DeliveryStatus::Failed),
        response_body: row.get(11)?,
        error_message: row.get(12)?,
        next_retry_at: next_retry_at.and_then(|s| parse_ts(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_website(client_id: Uuid) -> MonitoredWebsite {
        MonitoredWebsite {
            id: Uuid::new_v4(),
            client_id,
            base_url: "https://shop.test".to_string(),
            seed_urls: vec!["https://shop.test/new".to_string()],
            status: WebsiteStatus::Active,
            crawl_frequency_minutes: 720,
            price_change_threshold_pct: dec!(1.0),
            retention_days: 90,
            discovered_products_pending: None,
            approved_product_count: 0,
            last_successful_crawl_at: None,
            last_crawl_status: None,
            webhook_endpoint_url: Some("https://client.test/hook".to_string()),
            webhook_enabled: true,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn write_history_updates_product_and_inserts_record_atomically() {
        let store = Store::open_in_memory().unwrap();
        let client = Client {
            id: Uuid::new_v4(),
            webhook_secret_current: "secret".to_string(),
            webhook_secret_previous: None,
            secret_rotation_expires_at: None,
            max_websites: 5,
            max_products_per_website: 100,
        };
        store.insert_client(&client).unwrap();
        let website = sample_website(client.id);
        store.insert_website(&website).unwrap();

        let product = Product {
            id: Uuid::new_v4(),
            website_id: website.id,
            original_url: "https://shop.test/p/1".to_string(),
            normalized_url: "https://shop.test/p/1".to_string(),
            extracted_product_id: Some("1".to_string()),
            extraction_method: "url_pattern_generic".to_string(),
            product_name: "Widget".to_string(),
            current_price: Some(dec!(100.00)),
            current_currency: "USD".to_string(),
            current_stock_status: StockStatus::InStock,
            last_crawled_at: Utc::now(),
            is_active: true,
            delisted_at: None,
        };
        store.insert_product(&product).unwrap();

        let log = CrawlExecutionLog::new(website.id, TriggeredBy::Manual, Utc::now());
        store.insert_crawl_log(&log).unwrap();

        let record = store
            .write_history(
                product.id,
                website.id,
                log.id,
                Utc::now(),
                "Widget",
                Some(dec!(98.00)),
                "USD",
                StockStatus::InStock,
                true,
                false,
                Some(dec!(-2.00)),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(record.price, Some(dec!(98.00)));

        let reloaded = store.list_active_products(website.id).unwrap();
        assert_eq!(reloaded[0].current_price, Some(dec!(98.00)));
    }

    #[test]
    fn auto_pause_after_three_consecutive_failures() {
        let store = Store::open_in_memory().unwrap();
        let client = Client {
            id: Uuid::new_v4(),
            webhook_secret_current: "secret".to_string(),
            webhook_secret_previous: None,
            secret_rotation_expires_at: None,
            max_websites: 5,
            max_products_per_website: 100,
        };
        store.insert_client(&client).unwrap();
        let website = sample_website(client.id);
        store.insert_website(&website).unwrap();

        for _ in 0..3 {
            store
                .record_website_tick_result(website.id, CrawlStatus::Failed, Utc::now())
                .unwrap();
        }

        let reloaded = store.get_website(website.id).unwrap().unwrap();
        assert_eq!(reloaded.consecutive_failures, 3);
        assert_eq!(reloaded.status, WebsiteStatus::Paused);
    }
}
