//! Change Detector (C6): compares current product state against the latest
//! history record and computes flags + percentage change.

use crate::models::StockStatus;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeResult {
    pub price_changed: bool,
    pub stock_changed: bool,
    pub old_price: Option<Decimal>,
    pub new_price: Option<Decimal>,
    pub price_change_pct: Option<Decimal>,
    pub old_stock: Option<StockStatus>,
    pub new_stock: StockStatus,
    pub exceeded_threshold: bool,
}

/// `detect(product, website) → ChangeResult`, given the previous snapshot
/// (`None` on first-ever crawl, per spec.md §6 invariant 9).
pub fn detect(
    previous: Option<(Option<Decimal>, StockStatus)>,
    new_price: Option<Decimal>,
    new_stock: StockStatus,
    threshold_pct: Decimal,
) -> ChangeResult {
    let Some((old_price, old_stock)) = previous else {
        return ChangeResult {
            price_changed: false,
            stock_changed: false,
            old_price: None,
            new_price,
            price_change_pct: None,
            old_stock: None,
            new_stock,
            exceeded_threshold: false,
        };
    };

    let (price_changed, price_change_pct, exceeded_threshold) =
        match (old_price, new_price) {
            (None, None) => (false, None, false),
            (None, Some(_)) | (Some(_), None) => (true, None, true),
            (Some(old), Some(_new)) if old.is_zero() => (true, None, true),
            (Some(old), Some(new)) => {
                let pct = (new - old) / old * Decimal::ONE_HUNDRED;
                let changed = old != new;
                let exceeded = pct.abs() >= threshold_pct;
                (changed, Some(pct), exceeded)
            }
        };

    ChangeResult {
        price_changed,
        stock_changed: old_stock != new_stock,
        old_price,
        new_price,
        price_change_pct,
        old_stock: Some(old_stock),
        new_stock,
        exceeded_threshold,
    }
}
