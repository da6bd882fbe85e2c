//! Bugcrowd public program listing integration

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::PlatformAPI;
use crate::http::{json_client, send_with_retry};
use crate::types::{AssetType, Program, ScopeEntry};

/// Bugcrowd API client
pub struct BugcrowdAPI {
    api_token: Option<String>,
    client: reqwest::Client,
    base_url: String,
    max_pages: usize,
    retries: u32,
    retry_wait: Duration,
}

impl BugcrowdAPI {
    /// Create new Bugcrowd client; the token is optional for public listings
    pub fn new(api_token: Option<String>) -> Result<Self> {
        Ok(Self {
            api_token: api_token.filter(|t| !t.is_empty()),
            client: json_client(Duration::from_secs(30))?,
            base_url: "https://bugcrowd.com".to_string(),
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

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = send_with_retry("bugcrowd", self.retries, self.retry_wait, || {
            let request = self.client.get(url);
            match &self.api_token {
                Some(token) => request.header(AUTHORIZATION, format!("Token {}", token)),
                None => request,
            }
        })
        .await
        .context("Failed to send request to Bugcrowd")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Bugcrowd returned error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
        }

        response
            .json()
            .await
            .context("Failed to parse Bugcrowd response")
    }

    /// Path of a program on bugcrowd.com ("/slack" for "https://bugcrowd.com/slack")
    fn program_path(&self, program_url: &str) -> String {
        let trimmed = program_url.trim().trim_end_matches('/');
        let path = match url::Url::parse(trimmed) {
            Ok(url) => url.path().to_string(),
            Err(_) => trimmed.to_string(),
        };
        format!("/{}", path.trim_start_matches('/'))
    }

    fn parse_program(&self, data: &Value) -> Option<Program> {
        let path = data["program_url"].as_str().unwrap_or("").trim();
        if path.is_empty() {
            return None;
        }

        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.trim_end_matches('/').to_string()
        } else {
            format!("https://bugcrowd.com/{}", path.trim_matches('/'))
        };

        let name = data["name"].as_str().unwrap_or(path).to_string();
        let website = data["website"].as_str().unwrap_or("").to_string();

        Some(Program {
            platform: "bugcrowd".to_string(),
            name,
            url,
            website,
        })
    }

    /// Infer the scope type of a Bugcrowd target
    fn classify_target(name: &str, category: &str) -> AssetType {
        let name = name.trim();

        if name.starts_with("*.") {
            return AssetType::Wildcard;
        }
        if name.parse::<ipnet::IpNet>().is_ok() || name.parse::<std::net::IpAddr>().is_ok() {
            return AssetType::Cidr;
        }
        if matches!(category, "website" | "api") {
            return AssetType::Url;
        }
        if name.starts_with("http://") || name.starts_with("https://") {
            return AssetType::Url;
        }
        if !name.contains(' ') && crate::urlutil::is_valid_domain(name) {
            return AssetType::Url;
        }

        AssetType::Other
    }
}

#[async_trait]
impl PlatformAPI for BugcrowdAPI {
    fn name(&self) -> &str {
        "bugcrowd"
    }

    async fn get_public_programs(&self) -> Result<Vec<Program>> {
        info!("Fetching programs from Bugcrowd");

        let mut programs = Vec::new();

        for page in 1..=self.max_pages {
            let url = format!("{}/programs.json?page={}", self.base_url, page);
            let json = self.get_json(&url).await?;

            let entries = json["programs"]
                .as_array()
                .context("Invalid response format from Bugcrowd")?;

            if entries.is_empty() {
                break;
            }

            programs.extend(entries.iter().filter_map(|p| self.parse_program(p)));

            if page == self.max_pages {
                warn!("Bugcrowd pagination stopped after {} pages", page);
            }
        }

        info!("Found {} public programs on Bugcrowd", programs.len());
        Ok(programs)
    }

    async fn get_program_scope(&self, program_url: &str) -> Result<Vec<ScopeEntry>> {
        let path = self.program_path(program_url);
        debug!("Fetching scope for program: {}", path);

        let url = format!("{}{}/target_groups.json", self.base_url, path);
        let json = self
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch scope for {}", path))?;

        let groups = json["groups"]
            .as_array()
            .context("Invalid target group format from Bugcrowd")?;

        let mut entries = Vec::new();

        for group in groups {
            let in_scope = group["in_scope"].as_bool().unwrap_or(false);
            let Some(targets) = group["targets"].as_array() else {
                continue;
            };

            for target in targets {
                let name = target["name"].as_str().unwrap_or("").trim();
                let uri = target["uri"].as_str().unwrap_or("").trim();
                let identifier = if name.starts_with("*.") || uri.is_empty() { name } else { uri };
                if identifier.is_empty() {
                    continue;
                }

                let category = target["category"].as_str().unwrap_or("");
                let asset_type = Self::classify_target(identifier, category);
                entries.push(ScopeEntry::new(identifier, asset_type, in_scope));
            }
        }

        debug!("Found {} scope entries for program: {}", entries.len(), path);
        Ok(entries)
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/programs.json?page=1", self.base_url);
        self.get_json(&url)
            .await
            .context("Bugcrowd health check failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> BugcrowdAPI {
        BugcrowdAPI::new(None)
            .unwrap()
            .with_base_url(server.uri())
            .with_retry(0, Duration::from_millis(1))
    }

    #[test]
    fn test_classify_target() {
        assert_eq!(BugcrowdAPI::classify_target("*.tesla.com", "website"), AssetType::Wildcard);
        assert_eq!(BugcrowdAPI::classify_target("10.0.0.0/8", "other"), AssetType::Cidr);
        assert_eq!(BugcrowdAPI::classify_target("https://shop.tesla.com", "other"), AssetType::Url);
        assert_eq!(BugcrowdAPI::classify_target("api.tesla.com", ""), AssetType::Url);
        assert_eq!(BugcrowdAPI::classify_target("Tesla Android App", "android"), AssetType::Other);
    }

    #[tokio::test]
    async fn test_get_public_programs_stops_on_empty_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/programs.json"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "programs": [
                    {"name": "Tesla", "program_url": "/tesla", "website": "https://tesla.com"},
                    {"name": "No URL"}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/programs.json"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"programs": []})))
            .mount(&server)
            .await;

        let programs = api(&server).get_public_programs().await.unwrap();

        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].url, "https://bugcrowd.com/tesla");
        assert_eq!(programs[0].platform, "bugcrowd");
        assert_eq!(programs[0].website, "https://tesla.com");
    }

    #[tokio::test]
    async fn test_get_program_scope_reads_groups() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/tesla/target_groups.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "groups": [
                    {"in_scope": true, "targets": [
                        {"name": "*.tesla.com", "category": "website"},
                        {"name": "Shop", "uri": "https://shop.tesla.com", "category": "website"},
                        {"name": "Tesla iOS", "category": "ios"}
                    ]},
                    {"in_scope": false, "targets": [
                        {"name": "forums.tesla.com", "category": "website"}
                    ]}
                ]
            })))
            .mount(&server)
            .await;

        let scope = api(&server)
            .get_program_scope("https://bugcrowd.com/tesla")
            .await
            .unwrap();

        assert_eq!(scope.len(), 4);
        assert_eq!(scope[0], ScopeEntry::new("*.tesla.com", AssetType::Wildcard, true));
        assert_eq!(scope[1], ScopeEntry::new("https://shop.tesla.com", AssetType::Url, true));
        assert_eq!(scope[2].asset_type, AssetType::Other);
        assert_eq!(scope[3], ScopeEntry::new("forums.tesla.com", AssetType::Url, false));
    }
}
