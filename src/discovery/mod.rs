//! Passive-DNS subdomain discovery

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod chaos;

pub use chaos::ChaosClient;

/// Discovery outcome for one root domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResult {
    pub domain: String,

    /// Fully qualified, validated subdomains
    pub subdomains: Vec<String>,

    pub count: usize,

    /// Set when discovery for this domain failed
    pub error: Option<String>,
}

impl DomainResult {
    pub fn ok(domain: impl Into<String>, subdomains: Vec<String>) -> Self {
        Self {
            domain: domain.into(),
            count: subdomains.len(),
            subdomains,
            error: None,
        }
    }

    pub fn failed(domain: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            subdomains: Vec::new(),
            count: 0,
            error: Some(error.into()),
        }
    }
}

/// Aggregated discovery outcome for a set of root domains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResult {
    pub results: Vec<DomainResult>,

    /// Sum of subdomain counts over domains without an error
    pub total_count: usize,

    /// Domains whose discovery failed
    pub error_count: usize,
}

impl BulkResult {
    pub fn from_results(results: Vec<DomainResult>) -> Self {
        let total_count = results
            .iter()
            .filter(|r| r.error.is_none())
            .map(|r| r.count)
            .sum();
        let error_count = results.iter().filter(|r| r.error.is_some()).count();

        Self {
            results,
            total_count,
            error_count,
        }
    }

    /// Union of all discovered subdomains in first-seen order
    pub fn subdomains(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.results
            .iter()
            .flat_map(|r| r.subdomains.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

/// Passive-DNS discovery service
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Discover subdomains for all domains in one bulk call, falling back to
    /// bounded per-domain calls when the bulk endpoint fails
    async fn discover_domains_bulk(&self, domains: &[String]) -> Result<BulkResult>;

    /// Discover subdomains with one call per domain, at most `max_concurrent` in flight
    async fn discover_domains_concurrent(
        &self,
        domains: &[String],
        max_concurrent: usize,
    ) -> Result<BulkResult>;

    async fn health_check(&self) -> Result<()>;
}
