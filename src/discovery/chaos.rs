//! ProjectDiscovery Chaos passive-DNS client

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{BulkResult, DiscoveryClient, DomainResult};
use crate::config::ChaosConfig;
use crate::http::{json_client, send_with_retry};
use crate::ratelimit::RateLimiter;
use crate::urlutil::{convert_wildcard_to_domain, is_valid_domain};

#[derive(Debug, Deserialize)]
struct SubdomainsResponse {
    #[serde(default)]
    subdomains: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BulkRequest<'a> {
    domains: &'a [String],
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    results: Vec<BulkEntry>,
}

#[derive(Debug, Deserialize)]
struct BulkEntry {
    domain: String,
    #[serde(default)]
    subdomains: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Chaos API client
pub struct ChaosClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    retries: u32,
    retry_wait: Duration,
    max_concurrent: usize,
    health_domain: String,
}

impl ChaosClient {
    /// Create a new Chaos client from configuration
    pub fn new(config: &ChaosConfig) -> Result<Self> {
        Ok(Self {
            api_key: config.api_key.clone(),
            client: json_client(Duration::from_secs(config.request_timeout_secs))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::per_minute(config.requests_per_minute),
            retries: config.retries,
            retry_wait: Duration::from_millis(config.retry_wait_ms),
            max_concurrent: config.max_concurrent.max(1),
            health_domain: config.health_domain.clone(),
        })
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("Chaos API key not configured");
        }
        Ok(())
    }

    /// Turn raw API labels into validated, fully qualified subdomains
    ///
    /// Labels may be bare ("www"), wildcard-shaped ("*.dev") or already
    /// qualified. The root itself and invalid tokens are dropped.
    pub fn expand_subdomains(domain: &str, labels: &[String]) -> Vec<String> {
        let domain = domain.trim().to_ascii_lowercase();
        let suffix = format!(".{domain}");
        let mut seen = HashSet::new();
        let mut hosts = Vec::new();
        let mut noise = 0usize;

        for label in labels {
            let label = label.trim().trim_end_matches('.').to_ascii_lowercase();
            if label.is_empty() {
                continue;
            }

            let qualified = if label == domain || label.ends_with(&suffix) {
                label
            } else {
                format!("{label}{suffix}")
            };

            let host = convert_wildcard_to_domain(&qualified);
            if host == domain {
                continue;
            }
            if !is_valid_domain(&host) {
                noise += 1;
                continue;
            }
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }

        if noise > 0 {
            debug!("Dropped {} invalid subdomain entries for {}", noise, domain);
        }

        hosts
    }

    /// Discover subdomains of a single domain
    pub async fn discover_domain(&self, domain: &str) -> Result<Vec<String>> {
        self.ensure_enabled()?;
        self.limiter.acquire().await;

        let url = format!("{}/dns/{}/subdomains", self.base_url, domain);
        let response = send_with_retry("chaos", self.retries, self.retry_wait, || {
            self.client.get(&url).header(AUTHORIZATION, &self.api_key)
        })
        .await
        .with_context(|| format!("Chaos request failed for {}", domain))?;

        if !response.status().is_success() {
            anyhow::bail!("Chaos returned {} for {}", response.status(), domain);
        }

        let body: SubdomainsResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Chaos response for {}", domain))?;

        Ok(Self::expand_subdomains(domain, &body.subdomains))
    }

    /// One bulk request for all domains
    async fn bulk_request(&self, domains: &[String]) -> Result<Vec<DomainResult>> {
        self.ensure_enabled()?;
        self.limiter.acquire().await;

        let url = format!("{}/dns/bulk", self.base_url);
        let body = BulkRequest { domains };

        let response = send_with_retry("chaos bulk", self.retries, self.retry_wait, || {
            self.client
                .post(&url)
                .header(AUTHORIZATION, &self.api_key)
                .json(&body)
        })
        .await
        .context("Chaos bulk request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Chaos bulk endpoint returned {}", response.status());
        }

        let parsed: BulkResponse = response
            .json()
            .await
            .context("Failed to parse Chaos bulk response")?;

        let mut by_domain: HashMap<String, BulkEntry> = parsed
            .results
            .into_iter()
            .map(|entry| (entry.domain.trim().to_ascii_lowercase(), entry))
            .collect();

        let results = domains
            .iter()
            .map(|domain| match by_domain.remove(&domain.to_ascii_lowercase()) {
                Some(BulkEntry { error: Some(error), .. }) if !error.is_empty() => {
                    warn!("Chaos reported error for {}: {}", domain, error);
                    DomainResult::failed(domain.as_str(), error)
                }
                Some(entry) => {
                    DomainResult::ok(domain.as_str(), Self::expand_subdomains(domain, &entry.subdomains))
                }
                None => DomainResult::failed(domain.as_str(), "missing from bulk response"),
            })
            .collect();

        Ok(results)
    }
}

#[async_trait]
impl DiscoveryClient for ChaosClient {
    async fn discover_domains_bulk(&self, domains: &[String]) -> Result<BulkResult> {
        if domains.is_empty() {
            return Ok(BulkResult::default());
        }

        info!("Discovering subdomains for {} domains via Chaos bulk", domains.len());

        match self.bulk_request(domains).await {
            Ok(results) => {
                let result = BulkResult::from_results(results);
                info!(
                    "Chaos bulk discovery: {} subdomains, {} domain errors",
                    result.total_count, result.error_count
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    "Chaos bulk endpoint unavailable ({:#}), falling back to per-domain discovery",
                    e
                );
                self.discover_domains_concurrent(domains, self.max_concurrent)
                    .await
            }
        }
    }

    async fn discover_domains_concurrent(
        &self,
        domains: &[String],
        max_concurrent: usize,
    ) -> Result<BulkResult> {
        let limit = max_concurrent.max(1);
        debug!(
            "Discovering {} domains with concurrency {}",
            domains.len(),
            limit
        );

        let results: Vec<DomainResult> = stream::iter(domains.iter().cloned())
            .map(|domain: String| async move {
                match self.discover_domain(&domain).await {
                    Ok(subdomains) => DomainResult::ok(domain, subdomains),
                    Err(e) => {
                        warn!("Chaos discovery failed for {}: {:#}", domain, e);
                        DomainResult::failed(domain, format!("{:#}", e))
                    }
                }
            })
            .buffered(limit)
            .collect()
            .await;

        let result = BulkResult::from_results(results);
        info!(
            "Per-domain discovery: {} subdomains, {} domain errors",
            result.total_count, result.error_count
        );
        Ok(result)
    }

    async fn health_check(&self) -> Result<()> {
        self.discover_domain(&self.health_domain)
            .await
            .context("Chaos health check failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ChaosClient {
        let config = ChaosConfig {
            api_key: "secret".to_string(),
            base_url: server.uri(),
            retries: 0,
            retry_wait_ms: 1,
            requests_per_minute: 6000,
            ..ChaosConfig::default()
        };
        ChaosClient::new(&config).unwrap()
    }

    async fn mount_single(server: &MockServer, domain: &str, labels: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/dns/{}/subdomains", domain)))
            .and(header("authorization", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "domain": domain,
                "subdomains": labels,
                "count": 0
            })))
            .mount(server)
            .await;
    }

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_expand_subdomains_qualifies_and_filters_noise() {
        let labels = domains(&[
            "api",
            "*.dev",
            "*",
            "www.example.com",
            "API",
            "0027ccb97c839fec02edebe904d50ff8",
            "bad_label",
            "",
        ]);

        let hosts = ChaosClient::expand_subdomains("example.com", &labels);
        assert_eq!(hosts, vec!["api.example.com", "dev.example.com", "www.example.com"]);
    }

    #[tokio::test]
    async fn test_bulk_success_records_domain_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dns/bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"domain": "slack.com", "subdomains": ["api", "status"], "count": 2},
                    {"domain": "broken.com", "subdomains": [], "count": 0, "error": "quota exceeded"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server)
            .discover_domains_bulk(&domains(&["slack.com", "broken.com", "absent.com"]))
            .await
            .unwrap();

        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[0].subdomains, vec!["api.slack.com", "status.slack.com"]);
        assert_eq!(result.results[1].error.as_deref(), Some("quota exceeded"));
        assert!(result.results[2].error.is_some());
        assert_eq!(result.total_count, 2);
        assert_eq!(result.error_count, 2);
    }

    #[tokio::test]
    async fn test_bulk_failure_falls_back_to_per_domain() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dns/bulk"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_single(&server, "slack.com", json!(["api", "status"])).await;
        mount_single(&server, "slack-edge.com", json!(["cdn"])).await;

        let chaos = client(&server);
        let input = domains(&["slack.com", "slack-edge.com", "missing.com"]);

        let bulk = chaos.discover_domains_bulk(&input).await.unwrap();
        let concurrent = chaos.discover_domains_concurrent(&input, 10).await.unwrap();

        assert_eq!(bulk, concurrent);
        assert_eq!(bulk.total_count, 3);
        assert_eq!(bulk.error_count, 1);
        assert_eq!(bulk.results[1].subdomains, vec!["cdn.slack-edge.com"]);
    }

    #[tokio::test]
    async fn test_per_domain_discovery_runs_on_spawned_task() {
        let server = MockServer::start().await;
        mount_single(&server, "slack.com", json!(["api"])).await;
        mount_single(&server, "slack-edge.com", json!(["cdn"])).await;

        let chaos: Arc<dyn DiscoveryClient> = Arc::new(client(&server));
        let input = domains(&["slack.com", "slack-edge.com"]);

        let result = tokio::spawn(async move { chaos.discover_domains_concurrent(&input, 1).await })
            .await
            .unwrap()
            .unwrap();

        // Input order is kept even with one request in flight
        assert_eq!(result.subdomains(), vec!["api.slack.com", "cdn.slack-edge.com"]);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn test_unparsable_bulk_body_falls_back() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/dns/bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;
        mount_single(&server, "example.com", json!(["www"])).await;

        let result = client(&server)
            .discover_domains_bulk(&domains(&["example.com"]))
            .await
            .unwrap();

        assert_eq!(result.subdomains(), vec!["www.example.com"]);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_every_domain_without_raising() {
        let config = ChaosConfig::default();
        let chaos = ChaosClient::new(&config).unwrap();

        let result = chaos
            .discover_domains_bulk(&domains(&["a.com", "b.com"]))
            .await
            .unwrap();

        assert_eq!(result.error_count, 2);
        assert!(chaos.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_domain_list() {
        let server = MockServer::start().await;
        let result = client(&server).discover_domains_bulk(&[]).await.unwrap();
        assert_eq!(result, BulkResult::default());
    }
}
