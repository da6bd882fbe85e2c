//! Liveness probing of discovered hosts

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

pub mod http;

pub use self::http::HttpProber;

/// Outcome of probing one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Host as submitted
    pub host: String,

    /// URL actually requested
    pub url: String,

    /// HTTP status observed, 0 when nothing answered
    pub status_code: u16,

    /// True when any HTTP response was received, error statuses included
    pub exists: bool,

    pub error: Option<String>,
}

/// HTTP probing engine
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Probe every host, returning whatever finished before `deadline`
    async fn probe_domains(&self, hosts: &[String], deadline: Instant) -> Result<Vec<ProbeResult>>;

    /// Hosts that answered before `deadline`
    async fn filter_existing_domains(&self, hosts: &[String], deadline: Instant) -> Result<Vec<String>> {
        let results = self.probe_domains(hosts, deadline).await?;
        Ok(results
            .into_iter()
            .filter(|r| r.exists)
            .map(|r| r.host)
            .collect())
    }
}
