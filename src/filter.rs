//! Out-of-scope filtering for discovered hosts
//!
//! A filter is always built from a single program's out-of-scope list.

use tracing::debug;

use crate::types::{AssetType, ScopeAsset};
use crate::urlutil::{is_subdomain_of, matches_wildcard};

/// Drops hosts covered by a program's out-of-scope entries
#[derive(Debug, Clone, Default)]
pub struct OutOfScopeFilter {
    /// Domains excluded together with everything below them
    domains: Vec<String>,
    /// Wildcard patterns excluding strict descendants only
    wildcards: Vec<String>,
}

impl OutOfScopeFilter {
    /// Build a filter from one program's out-of-scope entries
    ///
    /// CIDR and unrecognized entries are ignored.
    pub fn new(out_of_scope: &[ScopeAsset]) -> Self {
        let mut filter = Self::default();

        for asset in out_of_scope {
            match asset.asset_type {
                AssetType::Url => filter.domains.push(asset.domain.clone()),
                AssetType::Wildcard => {
                    let pattern = asset
                        .wildcard_pattern
                        .clone()
                        .unwrap_or_else(|| format!("*.{}", asset.domain));
                    filter.wildcards.push(pattern);
                }
                AssetType::Cidr | AssetType::Other => {}
            }
        }

        filter
    }

    /// Check whether a host is still in scope
    pub fn allows(&self, host: &str) -> bool {
        if let Some(domain) = self.domains.iter().find(|d| is_subdomain_of(host, d)) {
            debug!("{} excluded by out-of-scope domain {}", host, domain);
            return false;
        }

        if let Some(pattern) = self.wildcards.iter().find(|p| matches_wildcard(host, p)) {
            debug!("{} excluded by out-of-scope pattern {}", host, pattern);
            return false;
        }

        true
    }

    /// Keep only the hosts this filter allows
    pub fn apply(&self, hosts: Vec<String>) -> Vec<String> {
        hosts.into_iter().filter(|h| self.allows(h)).collect()
    }

    /// Number of active exclusion rules
    pub fn count(&self) -> usize {
        self.domains.len() + self.wildcards.len()
    }
}
