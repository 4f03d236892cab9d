//! Product Parser (C4): side-effect-free, total HTML → product fields.
//!
//! The HTML-parsing heuristics are a pluggable capability per spec.md §1;
//! this regex-based implementation is the default, swappable via the
//! `Parser` trait (src/traits.rs).

use crate::models::StockStatus;
use crate::traits::{ParsedProduct, Parser};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

pub struct HtmlProductParser;

impl Parser for HtmlProductParser {
    fn parse(&self, html: &str) -> ParsedProduct {
        ParsedProduct {
            name: parse_name(html),
            price: parse_price(html),
            currency: parse_currency(html).unwrap_or_else(|| "USD".to_string()),
            stock_status: parse_stock_status(html),
        }
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

fn parse_name(html: &str) -> Option<String> {
    static OG_TITLE: OnceLock<Regex> = OnceLock::new();
    static TITLE_TAG: OnceLock<Regex> = OnceLock::new();
    static H1_TAG: OnceLock<Regex> = OnceLock::new();

    let og = OG_TITLE
        .get_or_init(|| re(r#"(?i)<meta\s+property="og:title"\s+content="([^"]+)""#));
    if let Some(caps) = og.captures(html) {
        return Some(caps[1].trim().to_string());
    }

    let title = TITLE_TAG.get_or_init(|| re(r"(?is)<title[^>]*>(.*?)</title>"));
    if let Some(caps) = title.captures(html) {
        let value = caps[1].trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    let h1 = H1_TAG.get_or_init(|| re(r"(?is)<h1[^>]*>(.*?)</h1>"));
    if let Some(caps) = h1.captures(html) {
        let value = strip_tags(&caps[1]);
        if !value.is_empty() {
            return Some(value);
        }
    }

    None
}

fn strip_tags(fragment: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| re(r"(?s)<[^>]+>"));
    tag.replace_all(fragment, "").trim().to_string()
}

fn parse_price(html: &str) -> Option<Decimal> {
    static JSON_PRICE: OnceLock<Regex> = OnceLock::new();
    static META_PRICE: OnceLock<Regex> = OnceLock::new();
    static CURRENCY_SIGN: OnceLock<Regex> = OnceLock::new();

    let json_price = JSON_PRICE.get_or_init(|| re(r#""price"\s*:\s*"?(\d+(?:\.\d+)?)"?"#));
    if let Some(caps) = json_price.captures(html) {
        if let Ok(d) = Decimal::from_str(&caps[1]) {
            return Some(d.round_dp(2));
        }
    }

    let meta_price = META_PRICE
        .get_or_init(|| re(r#"(?i)product:price:amount"\s+content="(\d+(?:\.\d+)?)""#));
    if let Some(caps) = meta_price.captures(html) {
        if let Ok(d) = Decimal::from_str(&caps[1]) {
            return Some(d.round_dp(2));
        }
    }

    let currency_sign =
        CURRENCY_SIGN.get_or_init(|| re(r"[$€£]\s?(\d{1,3}(?:[,.]\d{3})*(?:\.\d{2})?)"));
    if let Some(caps) = currency_sign.captures(html) {
        let cleaned = caps[1].replace(',', "");
        if let Ok(d) = Decimal::from_str(&cleaned) {
            return Some(d.round_dp(2));
        }
    }

    None
}

fn parse_currency(html: &str) -> Option<String> {
    static ISO: OnceLock<Regex> = OnceLock::new();
    let iso = ISO.get_or_init(|| re(r#""priceCurrency"\s*:\s*"([A-Z]{3})""#));
    if let Some(caps) = iso.captures(html) {
        return Some(caps[1].to_string());
    }
    if html.contains('€') {
        return Some("EUR".to_string());
    }
    if html.contains('£') {
        return Some("GBP".to_string());
    }
    if html.contains('$') {
        return Some("USD".to_string());
    }
    None
}

fn parse_stock_status(html: &str) -> StockStatus {
    let lower = html.to_ascii_lowercase();

    if lower.contains("out of stock") || lower.contains("sold out") || lower.contains("unavailable")
    {
        return StockStatus::OutOfStock;
    }
    if lower.contains("in stock") || lower.contains("available") || lower.contains("add to cart") {
        return StockStatus::InStock;
    }
    if lower.contains("limited") || limited_left(&lower) {
        return StockStatus::LimitedAvailability;
    }
    StockStatus::Unknown
}

fn limited_left(lower_html: &str) -> bool {
    static ONLY_LEFT: OnceLock<Regex> = OnceLock::new();
    let pattern = ONLY_LEFT.get_or_init(|| re(r"only\s+\d+\s+left"));
    pattern.is_match(lower_html)
}
