//! Bug bounty platform API integrations

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::config::PlatformsConfig;
use crate::types::{Program, ScopeEntry};

pub mod bugcrowd;
pub mod hackerone;

pub use bugcrowd::BugcrowdAPI;
pub use hackerone::HackerOneAPI;

/// Platform API trait for fetching programs and their scope
#[async_trait]
pub trait PlatformAPI: Send + Sync {
    /// Platform name used as program identity (e.g. "hackerone")
    fn name(&self) -> &str;

    /// Fetch all public programs currently listed
    async fn get_public_programs(&self) -> Result<Vec<Program>>;

    /// Fetch the scope of one program identified by its platform URL
    async fn get_program_scope(&self, program_url: &str) -> Result<Vec<ScopeEntry>>;

    /// Check that the API is reachable and credentials are accepted
    async fn health_check(&self) -> Result<()>;
}

/// Maps platform name -> client
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, Arc<dyn PlatformAPI>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a platform under its lower-cased name, replacing any previous one
    pub fn register(&mut self, platform: Arc<dyn PlatformAPI>) {
        self.platforms
            .insert(platform.name().to_ascii_lowercase(), platform);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlatformAPI>> {
        self.platforms.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn PlatformAPI>> {
        self.platforms.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.platforms.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Build clients for every enabled platform
    pub fn from_config(config: &PlatformsConfig) -> Result<Self> {
        let mut registry = Self::new();

        if let Some(h1) = config.hackerone.as_ref().filter(|c| c.enabled) {
            info!("Initializing HackerOne API integration");
            let api = HackerOneAPI::new(h1.username.clone(), h1.api_token.clone())?
                .with_base_url(&h1.base_url)
                .with_max_pages(h1.max_pages);
            registry.register(Arc::new(api));
        }

        if let Some(bugcrowd) = config.bugcrowd.as_ref().filter(|c| c.enabled) {
            info!("Initializing Bugcrowd API integration");
            let api = BugcrowdAPI::new(bugcrowd.api_token.clone())?
                .with_base_url(&bugcrowd.base_url)
                .with_max_pages(bugcrowd.max_pages);
            registry.register(Arc::new(api));
        }

        Ok(registry)
    }
}
