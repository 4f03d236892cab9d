//! Product Identifier Extractor (C2): `(product_key, method)` from a URL and
//! optionally its fetched HTML, in the order spec.md §4.2 specifies.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

struct PlatformPattern {
    platform: &'static str,
    regex: &'static str,
}

/// URL pattern table, grounded in `core/product_extractors.py`
/// (SPEC_FULL.md §B). Order matches spec.md §4.2's platform listing.
const PLATFORM_PATTERNS: &[PlatformPattern] = &[
    PlatformPattern { platform: "amazon", regex: r"/dp/([A-Z0-9]{10})" },
    PlatformPattern { platform: "amazon", regex: r"/gp/product/([A-Z0-9]{10})" },
    PlatformPattern { platform: "amazon", regex: r"/product/([A-Z0-9]{10})" },
    PlatformPattern { platform: "amazon", regex: r"/ASIN/([A-Z0-9]{10})" },
    PlatformPattern { platform: "amazon", regex: r"[?&]ASIN=([A-Z0-9]{10})" },
    PlatformPattern { platform: "shopify", regex: r"/products/([a-z0-9-]+)" },
    PlatformPattern { platform: "shopify", regex: r"[?&]product_id=(\d+)" },
    PlatformPattern { platform: "woocommerce", regex: r"/product/([a-z0-9-]+)" },
    PlatformPattern { platform: "woocommerce", regex: r"[?&]product_id=(\d+)" },
    PlatformPattern { platform: "woocommerce", regex: r"[?&]post_id=(\d+)" },
    PlatformPattern { platform: "magento", regex: r"/catalog/product/view/id/(\d+)" },
    PlatformPattern { platform: "magento", regex: r"product/(\d+)" },
    PlatformPattern { platform: "magento", regex: r"/([a-z0-9-]+)\.html" },
    PlatformPattern { platform: "bigcommerce", regex: r"/products/([a-z0-9-]+)" },
    PlatformPattern { platform: "bigcommerce", regex: r"[?&]product_id=(\d+)" },
];

static PATTERN_REGEXES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

fn compiled_patterns() -> &'static [(&'static str, Regex)] {
    PATTERN_REGEXES.get_or_init(|| {
        PLATFORM_PATTERNS
            .iter()
            .map(|p| (p.platform, Regex::new(p.regex).expect("valid pattern")))
            .collect()
    })
}

const GENERIC_QUERY_KEYS: &[&str] = &["id", "product_id", "productId", "pid", "item_id", "itemId"];

/// `extract(url, html?) → (id?, method)`.
pub fn extract(url: &str, html: Option<&str>) -> (Option<String>, String) {
    if let Some((id, method)) = extract_from_url(url) {
        return (Some(id), method);
    }
    if let Some(html) = html {
        if let Some((id, method)) = extract_from_html(html) {
            return (Some(id), method);
        }
    }
    (None, "none".to_string())
}

pub fn extract_from_url(url: &str) -> Option<(String, String)> {
    for (platform, regex) in compiled_patterns() {
        if let Some(caps) = regex.captures(url) {
            let id = caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| caps.get(0).unwrap().as_str().to_string());
            return Some((id, format!("url_pattern_{platform}")));
        }
    }
    extract_generic(url)
}

fn extract_generic(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;

    for key in GENERIC_QUERY_KEYS {
        if let Some((_, value)) = parsed.query_pairs().find(|(k, _)| k == key) {
            if !value.is_empty() {
                return Some((value.into_owned(), "url_pattern_generic".to_string()));
            }
        }
    }

    let numeric = Regex::new(r"/(\d{4,})").unwrap();
    if let Some(caps) = numeric.captures(parsed.path()) {
        return Some((caps[1].to_string(), "url_pattern_generic".to_string()));
    }

    let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
    if let Some(last) = segments.last() {
        let suffix = Regex::new(r"(?i)\.(html?|php|aspx?)$").unwrap();
        let trimmed = suffix.replace(last, "");
        if trimmed.len() > 3 {
            return Some((trimmed.to_string(), "url_pattern_generic".to_string()));
        }
    }

    None
}

pub fn extract_from_html(html: &str) -> Option<(String, String)> {
    let og_patterns = [
        r#"(?i)<meta\s+property="product:retailer_item_id"\s+content="([^"]+)""#,
        r#"(?i)<meta\s+property="product:sku"\s+content="([^"]+)""#,
        r#"(?i)<meta\s+property="og:product:sku"\s+content="([^"]+)""#,
    ];
    for pattern in og_patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(html) {
            return Some((caps[1].to_string(), "html_opengraph".to_string()));
        }
    }

    let schema_patterns = [
        r#""sku"\s*:\s*"([^"]+)""#,
        r#""productID"\s*:\s*"([^"]+)""#,
        r#""identifier"\s*:\s*"([^"]+)""#,
    ];
    for pattern in schema_patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(html) {
            return Some((caps[1].to_string(), "html_schema".to_string()));
        }
    }

    let meta_patterns = [
        r#"(?i)<meta\s+name="product_id"\s+content="([^"]+)""#,
        r#"(?i)<meta\s+name="sku"\s+content="([^"]+)""#,
        r#"(?i)<meta\s+itemprop="sku"\s+content="([^"]+)""#,
        r#"(?i)<meta\s+itemprop="productID"\s+content="([^"]+)""#,
    ];
    for pattern in meta_patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(caps) = re.captures(html) {
            return Some((caps[1].to_string(), "html_schema".to_string()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_amazon_asin() {
        let (id, method) = extract("https://amazon.com/dp/B08N5WRWNW", None);
        assert_eq!(id.as_deref(), Some("B08N5WRWNW"));
        assert_eq!(method, "url_pattern_amazon");
    }

    #[test]
    fn extracts_shopify_slug() {
        let (id, method) = extract("https://shop.test/products/awesome-t-shirt", None);
        assert_eq!(id.as_deref(), Some("awesome-t-shirt"));
        assert_eq!(method, "url_pattern_shopify");
    }

    #[test]
    fn falls_back_to_generic_query_param() {
        let (id, method) = extract("https://shop.test/view?product_id=9988", None);
        // shopify/woocommerce/bigcommerce patterns for product_id all match first.
        assert!(id.is_some());
        assert!(method.starts_with("url_pattern_"));
    }

    #[test]
    fn generic_numeric_path_segment() {
        let (id, method) = extract("https://shop.test/catalog/88231", None);
        assert_eq!(id.as_deref(), Some("88231"));
        assert_eq!(method, "url_pattern_generic");
    }

    #[test]
    fn falls_back_to_html_opengraph() {
        let html = r#"<meta property="product:sku" content="ABC123">"#;
        let (id, method) = extract("https://shop.test/x", Some(html));
        assert_eq!(id.as_deref(), Some("ABC123"));
        assert_eq!(method, "html_opengraph");
    }

    #[test]
    fn none_when_nothing_matches() {
        let (id, method) = extract("https://shop.test/", None);
        assert_eq!(id, None);
        assert_eq!(method, "none");
    }

    #[test]
    fn url_tried_before_html() {
        let html = r#"<meta property="product:sku" content="FROM-HTML">"#;
        let (id, method) = extract("https://amazon.com/dp/B000000000", Some(html));
        assert_eq!(id.as_deref(), Some("B000000000"));
        assert_eq!(method, "url_pattern_amazon");
    }
}
