//! URL and domain normalization shared by every stage of the scan pipeline
//!
//! All scope strings (bare domains, URLs, wildcard patterns) go through these
//! functions so that matching in later stages compares like with like.

use std::net::IpAddr;

use thiserror::Error;
use url::Url;

/// Errors produced when a scope string cannot be turned into a domain or URL
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("input is empty")]
    Empty,

    #[error("input contains only a protocol: {0}")]
    ProtocolOnly(String),

    #[error("invalid URL or domain: {0}")]
    Invalid(String),
}

fn is_protocol_only(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower == "http://" || lower == "https://"
}

fn check_input(input: &str) -> Result<&str, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }
    if is_protocol_only(trimmed) {
        return Err(UrlError::ProtocolOnly(trimmed.to_string()));
    }
    Ok(trimmed)
}

/// Host of `input` as the URL parser sees it, lowercased, trailing dot dropped
///
/// Inputs without a scheme are read as https URLs, so userinfo is stripped and
/// internationalized names come back in punycode on every path.
fn parse_host(input: &str) -> Result<String, UrlError> {
    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{input}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| UrlError::Invalid(format!("{input}: {e}")))?;

    let host = url
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .unwrap_or_default();

    if host.is_empty() {
        return Err(UrlError::Invalid(input.to_string()));
    }

    Ok(host)
}

/// Extract the host part of a scope string
///
/// Examples:
/// - "https://api.example.com/v1" -> "api.example.com"
/// - "*.example.com" -> "example.com"
/// - "example.com:8080/path" -> "example.com"
/// - "http://10.0.0.1/" -> "10.0.0.1"
pub fn extract_domain(input: &str) -> Result<String, UrlError> {
    let trimmed = check_input(input)?;

    match trimmed.strip_prefix("*.") {
        Some(rest) => {
            let rest = rest.trim_matches('.');
            if rest.is_empty() {
                return Err(UrlError::Invalid(trimmed.to_string()));
            }
            parse_host(rest)
        }
        None => parse_host(trimmed),
    }
}

/// Left-most label of a host with more than two labels, otherwise empty
pub fn extract_subdomain(input: &str) -> String {
    if input.trim().starts_with("*.") {
        return String::new();
    }

    let Ok(host) = extract_domain(input) else {
        return String::new();
    };

    if host.parse::<IpAddr>().is_ok() {
        return String::new();
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 {
        labels[0].to_string()
    } else {
        String::new()
    }
}

/// Strip every leading "*." from a wildcard pattern ("*.*.example.com" -> "example.com")
pub fn convert_wildcard_to_domain(pattern: &str) -> String {
    let mut rest = pattern.trim();
    while let Some(stripped) = rest.strip_prefix("*.") {
        rest = stripped;
    }
    rest.trim_matches('.').to_ascii_lowercase()
}

/// Canonical form of a URL: https scheme, no default port, no trailing slash
pub fn normalize_url(input: &str) -> Result<String, UrlError> {
    let trimmed = check_input(input)?;

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| UrlError::Invalid(format!("{trimmed}: {e}")))?;
    let host = parse_host(trimmed)?;

    let mut normalized = format!("https://{host}");

    if let Some(port) = url.port().filter(|p| *p != 443 && *p != 80) {
        normalized.push_str(&format!(":{port}"));
    }

    normalized.push_str(url.path().trim_end_matches('/'));

    if let Some(query) = url.query() {
        normalized.push('?');
        normalized.push_str(query);
    }

    Ok(normalized)
}

/// Heuristic filter for discovery-API noise
///
/// Rejects hash-like tokens, numeric strings, dotless strings and labels that
/// break RFC 1035 rules. False negatives are acceptable here.
pub fn is_valid_domain(candidate: &str) -> bool {
    let domain = candidate.trim().trim_end_matches('.').to_ascii_lowercase();

    if domain.len() < 4 || domain.len() > 253 {
        return false;
    }

    if !domain.contains('.') {
        return false;
    }

    // Numeric strings, including dotted IPv4 literals
    if domain.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();

    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
        if label.len() >= 32 && label.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
    }

    let tld = labels.last().copied().unwrap_or_default();
    tld.chars().any(|c| c.is_ascii_alphabetic())
}

/// True when `url` is a strict descendant of the suffix of `pattern`
///
/// "x.sub.domain.com" and "x.y.sub.domain.com" match "*.sub.domain.com",
/// "sub.domain.com" does not. A pattern without a wildcard prefix only
/// matches itself.
pub fn matches_wildcard(url: &str, pattern: &str) -> bool {
    let Ok(host) = extract_domain(url) else {
        return false;
    };

    let pattern = pattern.trim().to_ascii_lowercase();
    if !pattern.starts_with("*.") {
        return extract_domain(&pattern).map(|p| p == host).unwrap_or(false);
    }

    let suffix = convert_wildcard_to_domain(&pattern);
    if suffix.is_empty() {
        return false;
    }

    host.ends_with(&format!(".{suffix}"))
}

/// True when `child` equals `parent` or sits anywhere below it
pub fn is_subdomain_of(child: &str, parent: &str) -> bool {
    let Ok(child) = extract_domain(child) else {
        return false;
    };
    let parent = convert_wildcard_to_domain(parent);
    let Ok(parent) = extract_domain(&parent) else {
        return false;
    };

    child == parent || child.ends_with(&format!(".{parent}"))
}
