//! Scope classification: platform scope entries -> primary assets + out-of-scope list

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::{debug, warn};

use crate::types::{AssetType, ScopeAsset, ScopeEntry};
use crate::urlutil::{
    convert_wildcard_to_domain, extract_domain, is_valid_domain, normalize_url, UrlError,
};

/// Result of classifying one program's scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedScope {
    /// Eligible url/wildcard entries; persisted as primary assets and fed to discovery
    pub primary: Vec<ScopeAsset>,

    /// Every ineligible entry, whatever its type
    pub out_of_scope: Vec<ScopeAsset>,
}

impl ClassifiedScope {
    /// Canonical URLs of the primary entries
    pub fn primary_urls(&self) -> HashSet<String> {
        self.primary.iter().map(|a| a.url.clone()).collect()
    }

    /// Deduplicated root domains to expand through passive DNS
    ///
    /// IP literals and strings that do not look like domains are left out.
    pub fn root_domains(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut roots = Vec::new();

        for asset in &self.primary {
            let domain = asset.domain.as_str();
            if domain.parse::<IpAddr>().is_ok() || !is_valid_domain(domain) {
                debug!("Skipping discovery root {}", domain);
                continue;
            }
            if seen.insert(domain.to_string()) {
                roots.push(domain.to_string());
            }
        }

        roots
    }
}

/// Normalize a single platform entry
pub fn normalize_entry(entry: &ScopeEntry) -> Result<ScopeAsset, UrlError> {
    let identifier = entry.identifier.trim();

    let (url, domain, wildcard_pattern) = match entry.asset_type {
        AssetType::Wildcard => {
            let without_scheme = identifier
                .split_once("://")
                .map_or(identifier, |(_, rest)| rest);
            let domain = extract_domain(&convert_wildcard_to_domain(without_scheme))?;
            let pattern = format!("*.{domain}");
            (normalize_url(&domain)?, domain, Some(pattern))
        }
        AssetType::Url => (normalize_url(identifier)?, extract_domain(identifier)?, None),
        AssetType::Cidr => {
            if identifier.is_empty() {
                return Err(UrlError::Empty);
            }
            (identifier.to_string(), identifier.to_string(), None)
        }
        AssetType::Other => {
            if identifier.is_empty() {
                return Err(UrlError::Empty);
            }
            let domain = extract_domain(identifier).unwrap_or_else(|_| identifier.to_string());
            (identifier.to_string(), domain, None)
        }
    };

    Ok(ScopeAsset {
        identifier: entry.identifier.clone(),
        url,
        domain,
        asset_type: entry.asset_type,
        eligible_for_submission: entry.eligible_for_submission,
        wildcard_pattern,
    })
}

/// Split raw scope entries into primary candidates and the out-of-scope list
pub fn classify(entries: &[ScopeEntry]) -> ClassifiedScope {
    let mut classified = ClassifiedScope::default();
    let mut primary_urls = HashSet::new();

    for entry in entries {
        if !entry.eligible_for_submission {
            match normalize_entry(entry) {
                Ok(asset) => classified.out_of_scope.push(asset),
                Err(e) => warn!("Ignoring out-of-scope entry '{}': {}", entry.identifier, e),
            }
            continue;
        }

        match entry.asset_type {
            AssetType::Url | AssetType::Wildcard => match normalize_entry(entry) {
                Ok(asset) => {
                    if primary_urls.insert(asset.url.clone()) {
                        classified.primary.push(asset);
                    }
                }
                Err(e) => warn!("Dropping scope entry '{}': {}", entry.identifier, e),
            },
            other => {
                debug!("Dropping {} scope entry '{}'", other, entry.identifier);
            }
        }
    }

    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_splits_primary_and_out_of_scope() {
        let entries = vec![
            ScopeEntry::new("slack.com", AssetType::Url, true),
            ScopeEntry::new("*.slack-edge.com", AssetType::Wildcard, true),
            ScopeEntry::new("10.0.0.0/8", AssetType::Cidr, true),
            ScopeEntry::new("com.tinyspeck.chatlyio", AssetType::Other, true),
            ScopeEntry::new("status.slack.com", AssetType::Url, false),
            ScopeEntry::new("192.168.0.0/16", AssetType::Cidr, false),
        ];

        let scope = classify(&entries);

        assert_eq!(scope.primary.len(), 2);
        assert_eq!(scope.primary[0].url, "https://slack.com");
        assert_eq!(scope.primary[0].domain, "slack.com");
        assert_eq!(scope.primary[1].asset_type, AssetType::Wildcard);
        assert_eq!(scope.primary[1].domain, "slack-edge.com");
        assert_eq!(scope.primary[1].wildcard_pattern.as_deref(), Some("*.slack-edge.com"));

        assert_eq!(scope.out_of_scope.len(), 2);
        assert_eq!(scope.out_of_scope[0].domain, "status.slack.com");
        assert_eq!(scope.out_of_scope[1].asset_type, AssetType::Cidr);
    }

    #[test]
    fn test_wildcard_always_has_domain() {
        let asset = normalize_entry(&ScopeEntry::new("*.*.example.com", AssetType::Wildcard, true)).unwrap();
        assert_eq!(asset.domain, "example.com");
        assert_eq!(asset.wildcard_pattern.as_deref(), Some("*.example.com"));

        let bare = normalize_entry(&ScopeEntry::new("example.org", AssetType::Wildcard, true)).unwrap();
        assert_eq!(bare.domain, "example.org");
        assert_eq!(bare.wildcard_pattern.as_deref(), Some("*.example.org"));
    }

    #[test]
    fn test_wildcard_pattern_is_canonical() {
        for identifier in [
            "*.example.com/*",
            "*.Example.com:443",
            "https://*.example.com",
            "http://*.example.com/login",
            "*.example.com.",
        ] {
            let asset = normalize_entry(&ScopeEntry::new(identifier, AssetType::Wildcard, false)).unwrap();
            assert_eq!(asset.domain, "example.com", "domain of {identifier}");
            assert_eq!(asset.url, "https://example.com", "url of {identifier}");
            assert_eq!(
                asset.wildcard_pattern.as_deref(),
                Some("*.example.com"),
                "pattern of {identifier}"
            );
        }
    }

    #[test]
    fn test_invalid_entries_are_dropped() {
        let entries = vec![
            ScopeEntry::new("https://", AssetType::Url, true),
            ScopeEntry::new("   ", AssetType::Url, true),
            ScopeEntry::new("*.", AssetType::Wildcard, false),
        ];
        let scope = classify(&entries);
        assert!(scope.primary.is_empty());
        assert!(scope.out_of_scope.is_empty());
    }

    #[test]
    fn test_duplicate_primary_urls_collapse() {
        let entries = vec![
            ScopeEntry::new("https://example.com/", AssetType::Url, true),
            ScopeEntry::new("example.com", AssetType::Url, true),
        ];
        assert_eq!(classify(&entries).primary.len(), 1);
    }

    #[test]
    fn test_root_domains_dedupe_and_skip_ips() {
        let entries = vec![
            ScopeEntry::new("https://example.com/app", AssetType::Url, true),
            ScopeEntry::new("*.example.com", AssetType::Wildcard, true),
            ScopeEntry::new("https://10.0.0.1/", AssetType::Url, true),
            ScopeEntry::new("api.other.io", AssetType::Url, true),
        ];
        let scope = classify(&entries);
        assert_eq!(scope.root_domains(), vec!["example.com", "api.other.io"]);
    }
}
