//! URL Normalizer (C1): canonical forms for dedup and comparison.

use url::Url;

/// Tracking parameters stripped during normalization. Fuller than the
/// illustrative list in spec.md §4.1 — carried over from the original's
/// `core/url_utils.py` deny-set per SPEC_FULL.md §B. Described there as
/// "fixed, extensible": callers may grow this via `with_extra_tracking_params`.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "msclkid",
    "ref",
    "ref_",
    "mk_tok",
    "_hsenc",
    "_hsmi",
    "igshid",
    "dclid",
    "fb_action_ids",
    "fb_action_types",
    "fb_ref",
    "fb_source",
    "_ga",
    "_gl",
    "qid",
    "share",
    "sharesource",
    "trk",
    "trkid",
    "sessionid",
    "sid",
    "phpsessid",
    "jsessionid",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "mc_", "pf_rd_"];

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str())
        || TRACKING_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// `normalize(url, keep_fragment) → url`. On parse failure, returns the
/// input unchanged (spec.md §4.1 failure policy: never throw).
pub fn normalize(input: &str, keep_fragment: bool) -> String {
    let Ok(mut parsed) = Url::parse(input) else {
        return input.to_string();
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    if parsed.set_scheme(&scheme).is_err() {
        return input.to_string();
    }

    if let Some(host) = parsed.host_str() {
        let lower_host = host.to_ascii_lowercase();
        if parsed.set_host(Some(&lower_host)).is_err() {
            return input.to_string();
        }
    }

    // Strip default ports (80 for http, 443 for https).
    let default_port = match parsed.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if parsed.port() == default_port {
        let _ = parsed.set_port(None);
    }

    let mut kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort_by(|a, b| a.0.cmp(&b.0));

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let qs = kept
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&qs));
    }

    if !keep_fragment {
        parsed.set_fragment(None);
    }

    parsed.to_string()
}

/// `clean_for_comparison(url) → url`: strips all query and fragment, trims
/// a trailing slash, for deduplication purposes.
pub fn clean_for_comparison(input: &str) -> String {
    let Ok(mut parsed) = Url::parse(input) else {
        return input.to_string();
    };
    parsed.set_query(None);
    parsed.set_fragment(None);
    let mut s = parsed.to_string();
    if s.ends_with('/') {
        s.pop();
    }
    s
}

pub fn extract_domain(input: &str) -> Option<String> {
    Url::parse(input)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Handles two-level public suffixes (`co.uk`, `com.br`, `ac.*`, `gov.*`,
/// `org.*`) by taking the last three labels; otherwise the last two.
pub fn extract_base_domain(input: &str) -> Option<String> {
    let host = extract_domain(input)?;
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() >= 3 {
        let second_to_last = parts[parts.len() - 2];
        if matches!(second_to_last, "co" | "com" | "gov" | "org" | "ac") {
            return Some(parts[parts.len() - 3..].join("."));
        }
    }
    if parts.len() >= 2 {
        Some(parts[parts.len() - 2..].join("."))
    } else {
        Some(host)
    }
}

pub fn is_same_domain(a: &str, b: &str) -> bool {
    match (extract_base_domain(a), extract_base_domain(b)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

pub fn is_valid_url(input: &str) -> bool {
    Url::parse(input)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
