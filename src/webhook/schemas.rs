//! Wire payloads for price/stock change events (spec.md §6).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteInfo {
    pub id: Uuid,
    pub base_url: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub extracted_product_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub old_value: Option<Decimal>,
    pub new_value: Option<Decimal>,
    pub currency: String,
    pub change_pct: Option<Decimal>,
    pub absolute_change: Decimal,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChangeDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub old_value: String,
    pub new_value: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeMetadata {
    pub crawl_id: Uuid,
    pub threshold_pct: Decimal,
    pub exceeded_threshold: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChangeMetadata {
    pub crawl_id: Uuid,
    pub price_at_change: Option<Decimal>,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    pub event_type: String,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub website: WebsiteInfo,
    pub product: ProductInfo,
    pub change: PriceChangeDetails,
    pub metadata: PriceChangeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChangeEvent {
    pub event_type: String,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub website: WebsiteInfo,
    pub product: ProductInfo,
    pub change: StockChangeDetails,
    pub metadata: StockChangeMetadata,
}

impl PriceChangeEvent {
    /// `event_id` is the `product_history_id` (spec.md §6: stable across
    /// retries for receiver-side dedup).
    pub fn new(
        website: WebsiteInfo,
        product: ProductInfo,
        change: PriceChangeDetails,
        metadata: PriceChangeMetadata,
        event_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: "product.price_changed".to_string(),
            event_id,
            timestamp,
            website,
            product,
            change,
            metadata,
        }
    }
}

impl StockChangeEvent {
    pub fn new(
        website: WebsiteInfo,
        product: ProductInfo,
        change: StockChangeDetails,
        metadata: StockChangeMetadata,
        event_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: "product.stock_changed".to_string(),
            event_id,
            timestamp,
            website,
            product,
            change,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_change_event_serializes_with_wire_field_names() {
        let event = PriceChangeEvent::new(
            WebsiteInfo {
                id: Uuid::nil(),
                base_url: "https://shop.test".to_string(),
                name: "shop.test".to_string(),
            },
            ProductInfo {
                id: Uuid::nil(),
                url: "https://shop.test/p/1".to_string(),
                name: "Widget".to_string(),
                extracted_product_id: Some("1".to_string()),
            },
            PriceChangeDetails {
                kind: "price".to_string(),
                old_value: Some(dec!(100.00)),
                new_value: Some(dec!(90.00)),
                currency: "USD".to_string(),
                change_pct: Some(dec!(-10.00)),
                absolute_change: dec!(-10.00),
                detected_at: Utc::now(),
            },
            PriceChangeMetadata {
                crawl_id: Uuid::nil(),
                threshold_pct: dec!(1.0),
                exceeded_threshold: true,
            },
            Uuid::nil(),
            Utc::now(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "product.price_changed");
        assert_eq!(json["event_id"], Uuid::nil().to_string());
        assert_eq!(json["change"]["type"], "price");
        assert_eq!(json["change"]["new_value"], "90.00");
        assert_eq!(json["metadata"]["exceeded_threshold"], true);
    }

    #[test]
    fn stock_change_event_serializes_with_wire_field_names() {
        let event = StockChangeEvent::new(
            WebsiteInfo {
                id: Uuid::nil(),
                base_url: "https://shop.test".to_string(),
                name: "shop.test".to_string(),
            },
            ProductInfo {
                id: Uuid::nil(),
                url: "https://shop.test/p/1".to_string(),
                name: "Widget".to_string(),
                extracted_product_id: None,
            },
            StockChangeDetails {
                kind: "stock".to_string(),
                old_value: "in_stock".to_string(),
                new_value: "out_of_stock".to_string(),
                detected_at: Utc::now(),
            },
            StockChangeMetadata {
                crawl_id: Uuid::nil(),
                price_at_change: Some(dec!(50.00)),
                currency: "USD".to_string(),
            },
            Uuid::nil(),
            Utc::now(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "product.stock_changed");
        assert_eq!(json["change"]["type"], "stock");
        assert_eq!(json["change"]["new_value"], "out_of_stock");
        assert_eq!(json["metadata"]["currency"], "USD");
    }
}
