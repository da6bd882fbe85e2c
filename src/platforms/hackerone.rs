//! HackerOne hacker API integration

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::PlatformAPI;
use crate::http::{json_client, send_with_retry};
use crate::types::{AssetType, Program, ScopeEntry};

const PROGRAM_BASE_URL: &str = "https://hackerone.com";

/// HackerOne API client
pub struct HackerOneAPI {
    username: String,
    api_token: String,
    client: reqwest::Client,
    base_url: String,
    max_pages: usize,
    retries: u32,
    retry_wait: Duration,
}

impl HackerOneAPI {
    /// Create new HackerOne API client
    pub fn new(username: String, api_token: String) -> Result<Self> {
        Ok(Self {
            username,
            api_token,
            client: json_client(Duration::from_secs(30))?,
            base_url: "https://api.hackerone.com".to_string(),
            max_pages: 50,
            retries: 3,
            retry_wait: Duration::from_secs(2),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_retry(mut self, retries: u32, wait: Duration) -> Self {
        self.retries = retries;
        self.retry_wait = wait;
        self
    }

    /// Handle from "https://hackerone.com/{handle}" (or a bare handle)
    fn handle_from_url(program_url: &str) -> Option<String> {
        let trimmed = program_url.trim().trim_end_matches('/');
        let handle = match url::Url::parse(trimmed) {
            Ok(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(str::to_string),
            Err(_) => Some(trimmed.to_string()),
        };
        handle.filter(|h| !h.is_empty())
    }

    /// GET a paginated collection, following `links.next`
    async fn fetch_paginated(&self, first_url: String) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= self.max_pages {
                warn!("HackerOne pagination stopped after {} pages", pages);
                break;
            }
            pages += 1;

            let response = send_with_retry("hackerone", self.retries, self.retry_wait, || {
                self.client
                    .get(&url)
                    .basic_auth(&self.username, Some(&self.api_token))
            })
            .await
            .context("Failed to send request to HackerOne API")?;

            if !response.status().is_success() {
                anyhow::bail!(
                    "HackerOne API returned error: {} - {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                );
            }

            let json: Value = response
                .json()
                .await
                .context("Failed to parse HackerOne API response")?;

            let data = json["data"]
                .as_array()
                .context("Invalid response format from HackerOne")?;
            items.extend(data.iter().cloned());

            next = json["links"]["next"]
                .as_str()
                .filter(|n| !n.is_empty())
                .map(str::to_string);
        }

        Ok(items)
    }

    fn parse_program(data: &Value) -> Option<Program> {
        let attributes = &data["attributes"];
        let handle = attributes["handle"].as_str().unwrap_or("");
        if handle.is_empty() {
            return None;
        }

        let state = attributes["state"].as_str().unwrap_or("public_mode");
        let submission_state = attributes["submission_state"].as_str().unwrap_or("open");
        if state != "public_mode" || submission_state != "open" {
            debug!("Skipping HackerOne program {} ({}, {})", handle, state, submission_state);
            return None;
        }

        let name = attributes["name"].as_str().unwrap_or(handle).to_string();
        let website = attributes["website"].as_str().unwrap_or("").to_string();

        Some(Program {
            platform: "hackerone".to_string(),
            name,
            url: format!("{}/{}", PROGRAM_BASE_URL, handle),
            website,
        })
    }

    fn parse_scope(data: &Value) -> Option<ScopeEntry> {
        let attributes = &data["attributes"];
        let identifier = attributes["asset_identifier"].as_str().unwrap_or("").trim();
        if identifier.is_empty() {
            return None;
        }

        let asset_type = match attributes["asset_type"].as_str().unwrap_or("") {
            "URL" if identifier.starts_with("*.") => AssetType::Wildcard,
            "URL" => AssetType::Url,
            "WILDCARD" => AssetType::Wildcard,
            "CIDR" | "IP_ADDRESS" => AssetType::Cidr,
            _ => AssetType::Other,
        };

        let eligible = attributes["eligible_for_submission"]
            .as_bool()
            .unwrap_or(false);

        Some(ScopeEntry::new(identifier, asset_type, eligible))
    }
}

#[async_trait]
impl PlatformAPI for HackerOneAPI {
    fn name(&self) -> &str {
        "hackerone"
    }

    async fn get_public_programs(&self) -> Result<Vec<Program>> {
        info!("Fetching programs from HackerOne");

        let url = format!("{}/v1/hackers/programs?page%5Bsize%5D=100", self.base_url);
        let programs: Vec<Program> = self
            .fetch_paginated(url)
            .await?
            .iter()
            .filter_map(Self::parse_program)
            .collect();

        info!("Found {} public programs on HackerOne", programs.len());
        Ok(programs)
    }

    async fn get_program_scope(&self, program_url: &str) -> Result<Vec<ScopeEntry>> {
        let handle = Self::handle_from_url(program_url)
            .with_context(|| format!("Cannot derive HackerOne handle from {}", program_url))?;

        debug!("Fetching scope for program: {}", handle);

        let url = format!(
            "{}/v1/hackers/programs/{}/structured_scopes?page%5Bsize%5D=100",
            self.base_url, handle
        );
        let entries: Vec<ScopeEntry> = self
            .fetch_paginated(url)
            .await
            .with_context(|| format!("Failed to fetch scope for {}", handle))?
            .iter()
            .filter_map(Self::parse_scope)
            .collect();

        debug!("Found {} scope entries for program: {}", entries.len(), handle);
        Ok(entries)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/v1/hackers/programs?page%5Bsize%5D=1", self.base_url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await
            .context("HackerOne API unreachable")?;

        if !response.status().is_success() {
            anyhow::bail!("HackerOne API health check failed: {}", response.status());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HackerOneAPI {
        HackerOneAPI::new("test_user".to_string(), "test_token".to_string())
            .unwrap()
            .with_base_url(server.uri())
            .with_retry(0, Duration::from_millis(1))
    }

    #[test]
    fn test_handle_from_url() {
        assert_eq!(HackerOneAPI::handle_from_url("https://hackerone.com/slack"), Some("slack".to_string()));
        assert_eq!(HackerOneAPI::handle_from_url("https://hackerone.com/slack/"), Some("slack".to_string()));
        assert_eq!(HackerOneAPI::handle_from_url("gitlab"), Some("gitlab".to_string()));
        assert_eq!(HackerOneAPI::handle_from_url(""), None);
    }

    #[tokio::test]
    async fn test_get_public_programs_follows_pagination() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/hackers/programs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "1", "attributes": {"handle": "slack", "name": "Slack", "state": "public_mode", "submission_state": "open"}},
                    {"id": "2", "attributes": {"handle": "paused", "name": "Paused", "state": "public_mode", "submission_state": "paused"}},
                ],
                "links": {"next": format!("{}/page2", server.uri())}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"id": "3", "attributes": {"handle": "gitlab", "name": "GitLab", "website": "https://gitlab.com"}},
                    {"id": "4", "attributes": {"handle": "", "name": "Broken"}},
                ],
                "links": {}
            })))
            .mount(&server)
            .await;

        let programs = api(&server).get_public_programs().await.unwrap();

        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].url, "https://hackerone.com/slack");
        assert_eq!(programs[0].platform, "hackerone");
        assert_eq!(programs[1].name, "GitLab");
        assert_eq!(programs[1].website, "https://gitlab.com");
    }

    #[tokio::test]
    async fn test_get_program_scope_types_entries() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/hackers/programs/slack/structured_scopes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"attributes": {"asset_identifier": "slack.com", "asset_type": "URL", "eligible_for_submission": true}},
                    {"attributes": {"asset_identifier": "*.slack.com", "asset_type": "URL", "eligible_for_submission": true}},
                    {"attributes": {"asset_identifier": "*.slack-edge.com", "asset_type": "WILDCARD", "eligible_for_submission": true}},
                    {"attributes": {"asset_identifier": "10.0.0.0/8", "asset_type": "CIDR", "eligible_for_submission": false}},
                    {"attributes": {"asset_identifier": "com.slack", "asset_type": "GOOGLE_PLAY_APP_ID", "eligible_for_submission": true}},
                    {"attributes": {"asset_identifier": "", "asset_type": "URL", "eligible_for_submission": true}},
                ],
                "links": {}
            })))
            .mount(&server)
            .await;

        let scope = api(&server)
            .get_program_scope("https://hackerone.com/slack")
            .await
            .unwrap();

        assert_eq!(scope.len(), 5);
        assert_eq!(scope[0], ScopeEntry::new("slack.com", AssetType::Url, true));
        assert_eq!(scope[1].asset_type, AssetType::Wildcard);
        assert_eq!(scope[2].asset_type, AssetType::Wildcard);
        assert_eq!(scope[3], ScopeEntry::new("10.0.0.0/8", AssetType::Cidr, false));
        assert_eq!(scope[4].asset_type, AssetType::Other);
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/hackers/programs"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = api(&server);
        assert!(api.get_public_programs().await.is_err());
        assert!(api.health_check().await.is_err());
    }
}
