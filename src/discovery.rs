//! Discovery Engine (C5): seed-URL crawl → ranked, deduped candidate URLs.

use crate::product_id;
use crate::traits::Fetcher;
use crate::url_normalize;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub normalized_url: String,
    pub extracted_product_id: Option<String>,
    pub extraction_method: String,
    pub relevance_score: f64,
}

/// Product-path signals (spec.md §4.5), grounded in `discovery_service.py`.
const PRODUCT_URL_PATTERNS: &[&str] = &[
    r"/product[s]?/",
    r"/item[s]?/",
    r"/p/",
    r"/dp/",
    r"/gp/product/",
    r"-p-\d+",
    r"/pd/",
];

const EXCLUDE_PATTERNS: &[&str] = &[
    r"/categor(y|ies)/",
    r"/collection[s]?/",
    r"/search",
    r"/cart",
    r"/checkout",
    r"/account",
    r"/login",
    r"/register",
    r"/blog",
    r"/about",
    r"/contact",
];

static PRODUCT_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
static EXCLUDE_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();

fn product_regexes() -> &'static [Regex] {
    PRODUCT_REGEXES.get_or_init(|| {
        PRODUCT_URL_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    })
}

fn exclude_regexes() -> &'static [Regex] {
    EXCLUDE_REGEXES.get_or_init(|| {
        EXCLUDE_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
            .collect()
    })
}

fn is_product_url(url: &str) -> bool {
    if product_regexes().iter().any(|r| r.is_match(url)) {
        return true;
    }
    matches!(product_id::extract_from_url(url), Some((_, method)) if method != "none")
}

fn is_excluded_url(url: &str) -> bool {
    exclude_regexes().iter().any(|r| r.is_match(url))
}

/// Extract absolute `<a href>` links from raw HTML, resolved against
/// `base_url` and normalized. Regex-based, matching the teacher
/// link-extraction shape used for Fetcher (§B), since DOM parsing is the
/// pluggable heuristic spec.md leaves abstract.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let href = HREF.get_or_init(|| Regex::new(r#"(?i)<a[^>]+href=["']([^"']+)["']"#).unwrap());

    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in href.captures_iter(html) {
        let href_val = &caps[1];
        if let Ok(resolved) = base.join(href_val) {
            if matches!(resolved.scheme(), "http" | "https") {
                let normalized = url_normalize::normalize(resolved.as_str(), false);
                if seen.insert(normalized.clone()) {
                    out.push(normalized);
                }
            }
        }
    }
    out
}

fn calculate_relevance(url: &str) -> f64 {
    let mut score = 0.5f64;
    let Ok(parsed) = url::Url::parse(url) else {
        return score.clamp(0.0, 1.0);
    };
    let path = parsed.path().to_ascii_lowercase();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.len() <= 3 {
        score += 0.2;
    } else if segments.len() <= 5 {
        score += 0.1;
    }

    let strong_indicators = ["/product/", "/p/", "/dp/", "/item/"];
    if strong_indicators.iter().any(|i| path.contains(i)) {
        score += 0.2;
    }

    if let Some((_, method)) = product_id::extract_from_url(url) {
        if method.contains("amazon") || method.contains("shopify") {
            score += 0.1;
        }
    }

    // SPEC_FULL.md §C.3: clamp unconditionally, even though the formula's
    // arithmetic never exceeds 1.0 in practice.
    score.clamp(0.0, 1.0)
}

/// `discover(base_url, seed_urls, max_products) → candidate[]`.
pub async fn discover(
    fetcher: &dyn Fetcher,
    base_url: &str,
    seed_urls: &[String],
    max_products: usize,
) -> Vec<Candidate> {
    let mut seen_comparison = HashSet::new();
    let mut candidates = Vec::new();

    for seed in seed_urls {
        if candidates.len() >= max_products {
            break;
        }

        let response = match fetcher.fetch(seed).await {
            Ok(r) => r,
            Err(_) => continue,
        };

        let links = extract_links(&response.body, &response.final_url);
        for link in links {
            if candidates.len() >= max_products {
                break;
            }
            if !url_normalize::is_same_domain(&link, base_url) {
                continue;
            }
            if !is_product_url(&link) || is_excluded_url(&link) {
                continue;
            }

            let clean = url_normalize::clean_for_comparison(&link);
            if !seen_comparison.insert(clean) {
                continue;
            }

            let (extracted_product_id, extraction_method) = product_id::extract_from_url(&link)
                .map(|(id, m)| (Some(id), m))
                .unwrap_or((None, "none".to_string()));

            if extracted_product_id.is_none() {
                continue;
            }

            candidates.push(Candidate {
                normalized_url: url_normalize::normalize(&link, false),
                relevance_score: calculate_relevance(&link),
                extracted_product_id,
                extraction_method,
                url: link,
            });
        }
    }

    candidates.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap());
    candidates.truncate(max_products);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_clamped_and_scored() {
        let score = calculate_relevance("https://shop.test/dp/B08N5WRWNW");
        assert!(score <= 1.0 && score > 0.5);
    }

    #[test]
    fn excludes_category_and_cart_paths() {
        assert!(!is_product_url("https://shop.test/category/shoes"));
        assert!(is_excluded_url("https://shop.test/cart"));
    }

    #[test]
    fn extracts_links_and_dedups() {
        let html = r#"
            <a href="/products/a">A</a>
            <a href="/products/a?utm_source=x">A dup</a>
            <a href="/category/shoes">Category</a>
        "#;
        let links = extract_links(html, "https://shop.test/");
        assert_eq!(links.len(), 2);
    }
}
