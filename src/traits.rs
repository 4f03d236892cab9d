//! Capability interfaces the pipeline is built against.
//!
//! Per the design notes in spec.md §9, all polymorphism in this system is
//! over effects — fetching, parsing, signing, clocking, delivery transport,
//! persistence — not over domain types. Narrow traits at these seams let the
//! core run entirely test-harness-driven, without network or database.

use crate::error::ObsrvError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Wall-clock abstraction so signature verification and retry scheduling
/// are deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of a single fetch attempt (C3).
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, ObsrvError>;
}

/// Parsed product page shape (C4).
#[derive(Debug, Clone, Default)]
pub struct ParsedProduct {
    pub name: Option<String>,
    pub price: Option<rust_decimal::Decimal>,
    pub currency: String,
    pub stock_status: crate::models::StockStatus,
}

pub trait Parser: Send + Sync {
    fn parse(&self, html: &str) -> ParsedProduct;
}

/// Generic outbound HTTP transport, narrow enough to fake in tests (C9).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(String, String)],
        timeout: std::time::Duration,
    ) -> Result<TransportResponse, ObsrvError>;
}

/// HMAC signer/verifier (C8).
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &str, secret: &str, timestamp: i64) -> String;
    fn verify(
        &self,
        payload: &str,
        signature_header: &str,
        secret: &str,
        now: DateTime<Utc>,
        tolerance_secs: i64,
    ) -> Result<(), ObsrvError>;
}
