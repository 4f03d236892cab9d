//! Core data model: Client, MonitoredWebsite, Product, ProductHistoryRecord,
//! CrawlExecutionLog, WebhookDeliveryLog.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsiteStatus {
    PendingApproval,
    Active,
    Paused,
    Failed,
}

impl WebsiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebsiteStatus::PendingApproval => "pending_approval",
            WebsiteStatus::Active => "active",
            WebsiteStatus::Paused => "paused",
            WebsiteStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_approval" => Some(WebsiteStatus::PendingApproval),
            "active" => Some(WebsiteStatus::Active),
            "paused" => Some(WebsiteStatus::Paused),
            "failed" => Some(WebsiteStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    LimitedAvailability,
    Unknown,
}

impl Default for StockStatus {
    fn default() -> Self {
        StockStatus::Unknown
    }
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::LimitedAvailability => "limited_availability",
            StockStatus::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(StockStatus::InStock),
            "out_of_stock" => Some(StockStatus::OutOfStock),
            "limited_availability" => Some(StockStatus::LimitedAvailability),
            "unknown" => Some(StockStatus::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Pending,
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Pending => "pending",
            CrawlStatus::Running => "running",
            CrawlStatus::Success => "success",
            CrawlStatus::PartialSuccess => "partial_success",
            CrawlStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CrawlStatus::Pending),
            "running" => Some(CrawlStatus::Running),
            "success" => Some(CrawlStatus::Success),
            "partial_success" => Some(CrawlStatus::PartialSuccess),
            "failed" => Some(CrawlStatus::Failed),
            _ => None,
        }
    }

    /// Per SPEC_FULL.md §C.1: `last_successful_crawl_at` advances only on
    /// these terminal statuses.
    pub fn counts_as_successful(&self) -> bool {
        matches!(self, CrawlStatus::Success | CrawlStatus::PartialSuccess)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Scheduled,
    Manual,
    Discovery,
    Retry,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Scheduled => "scheduled",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Discovery => "discovery",
            TriggeredBy::Retry => "retry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(TriggeredBy::Scheduled),
            "manual" => Some(TriggeredBy::Manual),
            "discovery" => Some(TriggeredBy::Discovery),
            "retry" => Some(TriggeredBy::Retry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
    Retrying,
    Exhausted,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Exhausted => "exhausted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "success" => Some(DeliveryStatus::Success),
            "failed" => Some(DeliveryStatus::Failed),
            "retrying" => Some(DeliveryStatus::Retrying),
            "exhausted" => Some(DeliveryStatus::Exhausted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub webhook_secret_current: String,
    pub webhook_secret_previous: Option<String>,
    pub secret_rotation_expires_at: Option<DateTime<Utc>>,
    pub max_websites: u32,
    pub max_products_per_website: u32,
}

impl Client {
    /// Whether `webhook_secret_previous` should still be offered to the
    /// verifier. The signer itself accepts any previous secret regardless of
    /// this flag (spec.md §4.8) — this helper is for the scheduler's job of
    /// clearing stale previous secrets.
    pub fn rotation_grace_active(&self, now: DateTime<Utc>) -> bool {
        match self.secret_rotation_expires_at {
            Some(expires) => now < expires,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredWebsite {
    pub id: Uuid,
    pub client_id: Uuid,
    pub base_url: String,
    pub seed_urls: Vec<String>,
    pub status: WebsiteStatus,
    pub crawl_frequency_minutes: u32,
    pub price_change_threshold_pct: Decimal,
    pub retention_days: u32,
    pub discovered_products_pending: Option<u32>,
    pub approved_product_count: u32,
    pub last_successful_crawl_at: Option<DateTime<Utc>>,
    pub last_crawl_status: Option<CrawlStatus>,
    pub webhook_endpoint_url: Option<String>,
    pub webhook_enabled: bool,
    pub consecutive_failures: u32,
}

impl MonitoredWebsite {
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
    pub const MIN_CRAWL_FREQUENCY_MINUTES: u32 = 360;
    pub const MAX_CRAWL_FREQUENCY_MINUTES: u32 = 1440;
    pub const MIN_RETENTION_DAYS: u32 = 30;
    pub const MAX_RETENTION_DAYS: u32 = 365;
    pub const MAX_APPROVED_PRODUCTS: u32 = 100;

    pub fn should_auto_pause(&self) -> bool {
        self.consecutive_failures >= Self::MAX_CONSECUTIVE_FAILURES
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub website_id: Uuid,
    pub original_url: String,
    pub normalized_url: String,
    pub extracted_product_id: Option<String>,
    pub extraction_method: String,
    pub product_name: String,
    pub current_price: Option<Decimal>,
    pub current_currency: String,
    pub current_stock_status: StockStatus,
    pub last_crawled_at: DateTime<Utc>,
    pub is_active: bool,
    pub delisted_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn default_currency() -> String {
        "USD".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductHistoryRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub website_id: Uuid,
    pub crawl_log_id: Uuid,
    pub crawl_timestamp: DateTime<Utc>,
    pub price: Option<Decimal>,
    pub currency: String,
    pub stock_status: StockStatus,
    pub price_changed: bool,
    pub stock_changed: bool,
    pub price_change_pct: Option<Decimal>,
    pub raw_crawl_data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlExecutionLog {
    pub id: Uuid,
    pub website_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: CrawlStatus,
    pub products_processed: u32,
    pub changes_detected: u32,
    pub errors_count: u32,
    pub error_details: Option<String>,
    pub retry_count: u32,
    pub triggered_by: TriggeredBy,
}

impl CrawlExecutionLog {
    pub fn new(website_id: Uuid, triggered_by: TriggeredBy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            website_id,
            started_at: now,
            completed_at: None,
            duration_seconds: None,
            status: CrawlStatus::Running,
            products_processed: 0,
            changes_detected: 0,
            errors_count: 0,
            error_details: None,
            retry_count: 0,
            triggered_by,
        }
    }

    /// Resolves the terminal status per spec.md §4.10 step 4.
    pub fn terminal_status(&self) -> CrawlStatus {
        if self.products_processed == 0 {
            CrawlStatus::Failed
        } else if self.errors_count == 0 {
            CrawlStatus::Success
        } else {
            CrawlStatus::PartialSuccess
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryLog {
    pub id: Uuid,
    pub product_history_id: Uuid,
    pub website_id: Uuid,
    pub target_url: String,
    pub payload: serde_json::Value,
    pub signature: String,
    pub timestamp_header: DateTime<Utc>,
    pub attempt_number: u32,
    pub delivery_timestamp: DateTime<Utc>,
    pub http_status_code: Option<u16>,
    pub status: DeliveryStatus,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl WebhookDeliveryLog {
    /// Truncation limit per SPEC_FULL.md §B: spec.md's 1024 bytes supersedes
    /// the original source's 1000-byte limit.
    pub const RESPONSE_BODY_TRUNCATE_BYTES: usize = 1024;

    pub fn should_retry(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Retrying
            && self.next_retry_at.map(|t| now >= t).unwrap_or(false)
    }
}
