//! reqwest-backed HTTP prober

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ProbeClient, ProbeResult};
use crate::config::ProbeConfig;
use crate::http::USER_AGENT;
use crate::ratelimit::RateLimiter;

/// Concurrent, rate-limited HTTP prober
pub struct HttpProber {
    client: reqwest::Client,
    limiter: RateLimiter,
    concurrency: usize,
    retries: u32,
}

impl HttpProber {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let policy = if config.follow_redirects {
            Policy::limited(config.max_redirects)
        } else {
            Policy::none()
        };

        // Existence is being checked, not trust
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(policy)
            .danger_accept_invalid_certs(true)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build probe HTTP client")?;

        Ok(Self {
            client,
            limiter: RateLimiter::per_minute(config.requests_per_minute),
            concurrency: config.concurrency.max(1),
            retries: config.retries,
        })
    }

    fn probe_url(host: &str) -> String {
        if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }

    async fn probe_one(&self, host: String) -> ProbeResult {
        let url = Self::probe_url(&host);
        let mut last_error = String::new();

        for attempt in 0..=self.retries {
            self.limiter.acquire().await;

            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    debug!("{} answered {}", url, status_code);
                    return ProbeResult {
                        host,
                        url,
                        status_code,
                        exists: status_code >= 1,
                        error: None,
                    };
                }
                Err(e) => {
                    debug!("Probe of {} failed (attempt {}): {}", url, attempt + 1, e);
                    last_error = e.to_string();
                }
            }
        }

        ProbeResult {
            host,
            url,
            status_code: 0,
            exists: false,
            error: Some(last_error),
        }
    }
}

#[async_trait]
impl ProbeClient for HttpProber {
    async fn probe_domains(&self, hosts: &[String], deadline: Instant) -> Result<Vec<ProbeResult>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = hosts
            .iter()
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect();
        let total = unique.len();

        info!("Probing {} hosts with {} workers", total, self.concurrency);

        let mut probes = stream::iter(unique)
            .map(|host| self.probe_one(host))
            .buffer_unordered(self.concurrency);

        let mut results = Vec::with_capacity(total);
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                next = probes.next() => match next {
                    Some(result) => results.push(result),
                    None => break,
                },
                _ = &mut expired => {
                    warn!(
                        "Probe deadline reached: keeping {} of {} results",
                        results.len(),
                        total
                    );
                    break;
                }
            }
        }

        let alive = results.iter().filter(|r| r.exists).count();
        info!("Probing finished: {} of {} hosts alive", alive, results.len());

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober(concurrency: usize) -> HttpProber {
        let config = ProbeConfig {
            timeout_secs: 10,
            concurrency,
            requests_per_minute: 60_000,
            retries: 0,
            ..ProbeConfig::default()
        };
        HttpProber::new(&config).unwrap()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_probe_url_infers_https() {
        assert_eq!(HttpProber::probe_url("api.example.com"), "https://api.example.com");
        assert_eq!(HttpProber::probe_url("http://127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_any_status_counts_as_alive() {
        let server = MockServer::start().await;

        for (p, status) in [("/ok", 200), ("/missing", 404), ("/broken", 500)] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }

        let hosts = vec![
            format!("{}/ok", server.uri()),
            format!("{}/missing", server.uri()),
            format!("{}/broken", server.uri()),
            "http://127.0.0.1:1".to_string(),
        ];

        let mut results = prober(4).probe_domains(&hosts, far_deadline()).await.unwrap();
        results.sort_by_key(|r| r.status_code);

        assert_eq!(results.len(), 4);
        assert!(!results[0].exists);
        assert!(results[0].error.is_some());
        assert_eq!(
            results[1..].iter().map(|r| r.status_code).collect::<Vec<_>>(),
            vec![200, 404, 500]
        );
        assert!(results[1..].iter().all(|r| r.exists));
    }

    #[tokio::test]
    async fn test_filter_existing_domains() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let alive = server.uri();
        let hosts = vec![alive.clone(), "http://127.0.0.1:1".to_string(), alive.clone()];

        let existing = prober(2)
            .filter_existing_domains(&hosts, far_deadline())
            .await
            .unwrap();

        assert_eq!(existing, vec![alive]);
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_results() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let hosts = vec![format!("{}/slow", server.uri()), format!("{}/fast", server.uri())];
        let deadline = Instant::now() + Duration::from_millis(800);

        let started = Instant::now();
        let results = prober(2).probe_domains(&hosts, deadline).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(results.len(), 1);
        assert!(results[0].url.ends_with("/fast"));
    }
}
