// src/config.rs

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_database_url() -> String {
    "postgresql://localhost/scopescout".to_string()
}

fn default_max_connections() -> u32 { 20 }
fn default_batch_size() -> usize { 500 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub hackerone: Option<HackerOneConfig>,
    #[serde(default)]
    pub bugcrowd: Option<BugcrowdConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HackerOneConfig {
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_hackerone_url")]
    pub base_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BugcrowdConfig {
    pub enabled: bool,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_bugcrowd_url")]
    pub base_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_hackerone_url() -> String { "https://api.hackerone.com".to_string() }
fn default_bugcrowd_url() -> String { "https://bugcrowd.com".to_string() }
fn default_max_pages() -> usize { 50 }

#[derive(Debug, Deserialize, Clone)]
pub struct ChaosConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chaos_url")]
    pub base_url: String,
    #[serde(default = "default_chaos_concurrency")]
    pub max_concurrent: usize,
    #[serde(default = "default_chaos_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
    #[serde(default = "default_health_domain")]
    pub health_domain: String,
}

fn default_chaos_url() -> String { "https://dns.projectdiscovery.io".to_string() }
fn default_chaos_concurrency() -> usize { 10 }
fn default_chaos_rpm() -> u32 { 60 }
fn default_request_timeout() -> u64 { 30 }
fn default_retries() -> u32 { 3 }
fn default_retry_wait_ms() -> u64 { 2000 }
fn default_health_domain() -> String { "projectdiscovery.io".to_string() }

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_chaos_url(),
            max_concurrent: default_chaos_concurrency(),
            requests_per_minute: default_chaos_rpm(),
            request_timeout_secs: default_request_timeout(),
            retries: default_retries(),
            retry_wait_ms: default_retry_wait_ms(),
            health_domain: default_health_domain(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_probe_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_probe_retries")]
    pub retries: u32,
}

fn default_probe_timeout() -> u64 { 10 }
fn default_probe_concurrency() -> usize { 50 }
fn default_probe_rpm() -> u32 { 300 }
fn default_follow_redirects() -> bool { true }
fn default_max_redirects() -> usize { 3 }
fn default_probe_retries() -> u32 { 1 }

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
            concurrency: default_probe_concurrency(),
            requests_per_minute: default_probe_rpm(),
            follow_redirects: default_follow_redirects(),
            max_redirects: default_max_redirects(),
            retries: default_probe_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Budget for discovery + probing of one program
    #[serde(default = "default_chaos_timeout")]
    pub chaos_discovery_timeout_secs: u64,
    /// Budget for one whole run across all platforms
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_hours: u64,
}

fn default_chaos_timeout() -> u64 { 30 * 60 }
fn default_scan_timeout() -> u64 { 6 * 3600 }
fn default_scan_interval() -> u64 { 24 }

impl ScannerConfig {
    pub fn chaos_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.chaos_discovery_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_hours * 3600)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chaos_discovery_timeout_secs: default_chaos_timeout(),
            scan_timeout_secs: default_scan_timeout(),
            scan_interval_hours: default_scan_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
}

fn default_max_memory_mb() -> u64 { 2048 }

impl Default for HealthConfig {
    fn default() -> Self {
        Self { max_memory_mb: default_max_memory_mb() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub chaos: ChaosConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Load, apply environment overrides and validate
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Secrets from the environment take precedence over the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(key) = lookup("CHAOS_API_KEY") {
            self.chaos.api_key = key;
        }
        if let Some(ref mut h1) = self.platforms.hackerone {
            if let Some(username) = lookup("HACKERONE_USERNAME") {
                h1.username = username;
            }
            if let Some(token) = lookup("HACKERONE_API_TOKEN") {
                h1.api_token = token;
            }
        }
        if let Some(ref mut bugcrowd) = self.platforms.bugcrowd {
            if let Some(token) = lookup("BUGCROWD_API_TOKEN") {
                bugcrowd.api_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chaos.max_concurrent == 0 {
            anyhow::bail!("chaos.max_concurrent must be greater than 0");
        }
        if self.chaos.requests_per_minute == 0 || self.probe.requests_per_minute == 0 {
            anyhow::bail!("requests_per_minute must be greater than 0");
        }
        if self.probe.concurrency == 0 {
            anyhow::bail!("probe.concurrency must be greater than 0");
        }
        if self.probe.timeout_secs == 0 || self.chaos.request_timeout_secs == 0 {
            anyhow::bail!("request timeouts must be greater than 0");
        }
        if self.scanner.scan_timeout_secs == 0 || self.scanner.chaos_discovery_timeout_secs == 0 {
            anyhow::bail!("scanner timeouts must be greater than 0");
        }
        if self.scanner.chaos_discovery_timeout_secs > self.scanner.scan_timeout_secs {
            anyhow::bail!(
                "scanner.chaos_discovery_timeout_secs ({}) exceeds scanner.scan_timeout_secs ({})",
                self.scanner.chaos_discovery_timeout_secs,
                self.scanner.scan_timeout_secs
            );
        }
        if self.scanner.scan_interval_hours == 0 {
            anyhow::bail!("scanner.scan_interval_hours must be greater than 0");
        }
        if self.database.batch_size == 0 {
            anyhow::bail!("database.batch_size must be greater than 0");
        }
        if let Some(ref h1) = self.platforms.hackerone {
            if h1.enabled && (h1.username.is_empty() || h1.api_token.is_empty()) {
                anyhow::bail!("HackerOne is enabled but username or api_token is missing");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_from_valid_toml() {
        let toml_content = r#"
[logging]
level = "debug"

[database]
url = "postgresql://db/scopes"
max_connections = 5

[platforms.hackerone]
enabled = true
username = "hunter"
api_token = "token"

[platforms.bugcrowd]
enabled = true

[chaos]
api_key = "chaos-key"
max_concurrent = 4

[probe]
concurrency = 25
follow_redirects = false

[scanner]
chaos_discovery_timeout_secs = 600
scan_timeout_secs = 3600
scan_interval_hours = 12
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.url, "postgresql://db/scopes");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.batch_size, 500);
        let h1 = config.platforms.hackerone.as_ref().unwrap();
        assert!(h1.enabled);
        assert_eq!(h1.base_url, "https://api.hackerone.com");
        assert!(config.platforms.bugcrowd.as_ref().unwrap().api_token.is_none());
        assert_eq!(config.chaos.max_concurrent, 4);
        assert_eq!(config.chaos.requests_per_minute, 60);
        assert_eq!(config.probe.concurrency, 25);
        assert!(!config.probe.follow_redirects);
        assert_eq!(config.probe.max_redirects, 3);
        assert_eq!(config.scanner.chaos_discovery_timeout(), Duration::from_secs(600));
        assert_eq!(config.scanner.scan_interval(), Duration::from_secs(12 * 3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.chaos.max_concurrent, 10);
        assert_eq!(config.probe.timeout_secs, 10);
        assert_eq!(config.scanner.scan_interval_hours, 24);
        assert!(config.platforms.hackerone.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_invalid_toml() {
        assert!(Config::from_toml("invalid toml content {{{").is_err());
    }

    #[test]
    fn test_config_nonexistent_file() {
        let result = Config::from_file(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.chaos.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.scanner.chaos_discovery_timeout_secs = config.scanner.scan_timeout_secs + 1;
        assert!(config.validate().is_err());

        let config = Config::from_toml("[platforms.hackerone]\nenabled = true\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut config = Config::from_toml(
            "[platforms.hackerone]\nenabled = true\n[platforms.bugcrowd]\nenabled = false\n",
        )
        .unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgresql://env/db"),
            ("CHAOS_API_KEY", "from-env"),
            ("HACKERONE_USERNAME", "env-user"),
            ("HACKERONE_API_TOKEN", "env-token"),
            ("BUGCROWD_API_TOKEN", ""),
        ]);
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.url, "postgresql://env/db");
        assert_eq!(config.chaos.api_key, "from-env");
        let h1 = config.platforms.hackerone.as_ref().unwrap();
        assert_eq!(h1.username, "env-user");
        assert_eq!(h1.api_token, "env-token");
        assert!(config.platforms.bugcrowd.as_ref().unwrap().api_token.is_none());
        assert!(config.validate().is_ok());
    }
}
