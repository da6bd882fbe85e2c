// src/scanner.rs
//! Scan orchestration
//!
//! Per program: fetch scope, classify it, store the primary assets, then
//! (unless the scope is unchanged since the last run) expand root domains
//! through passive DNS, probe the results, drop out-of-scope hosts and store
//! the survivors as secondary assets. Every program scan leaves exactly one
//! scan record behind, either `completed` or `failed`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::database::Store;
use crate::discovery::DiscoveryClient;
use crate::filter::OutOfScopeFilter;
use crate::platforms::{PlatformAPI, PlatformRegistry};
use crate::probe::ProbeClient;
use crate::scope::{classify, ClassifiedScope};
use crate::stats::RunStats;
use crate::types::{
    AssetSource, AssetType, NewAsset, ProgramRecord, ScanStatus, ASSET_STATUS_ACTIVE,
};
use crate::urlutil::{extract_domain, extract_subdomain, normalize_url};

/// How a single program scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Scope matched the stored primary assets, discovery was skipped
    Unchanged { assets_found: i64 },
    Completed { assets_found: i64, new_assets: usize },
    Failed { error: String },
}

/// Per-platform tally of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformSummary {
    pub platform: String,
    pub programs: usize,
    pub completed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub deactivated: usize,
}

impl PlatformSummary {
    fn new(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            ..Self::default()
        }
    }
}

/// Drives scans across all registered platforms
pub struct ScanService {
    platforms: PlatformRegistry,
    discovery: Arc<dyn DiscoveryClient>,
    prober: Arc<dyn ProbeClient>,
    store: Arc<dyn Store>,
    discovery_timeout: Duration,
    stats: RunStats,
    /// Programs whose last discovery pass did not finish; rescanned even with unchanged scope
    incomplete: Mutex<HashSet<i64>>,
}

impl ScanService {
    pub fn new(
        platforms: PlatformRegistry,
        discovery: Arc<dyn DiscoveryClient>,
        prober: Arc<dyn ProbeClient>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            platforms,
            discovery,
            prober,
            store,
            discovery_timeout: Duration::from_secs(30 * 60),
            stats: RunStats::new(),
            incomplete: Mutex::new(HashSet::new()),
        }
    }

    /// Budget for discovery plus probing of one program
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Bring the store schema up to date
    pub async fn prepare_store(&self) -> Result<()> {
        self.store.migrate().await.context("Database is not ready")
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn platforms(&self) -> &PlatformRegistry {
        &self.platforms
    }

    /// Scan every registered platform in parallel. A failing platform does
    /// not stop the others; the run reports failure once all have finished.
    pub async fn scan_all(&self) -> Result<Vec<PlatformSummary>> {
        if self.platforms.is_empty() {
            anyhow::bail!("No platforms configured");
        }

        let platforms = self.platforms.all();
        info!("Starting scan of {} platforms", platforms.len());

        let results = join_all(platforms.iter().map(|p| self.scan_platform(p.as_ref()))).await;

        let mut summaries = Vec::new();
        let mut failed = Vec::new();

        for (platform, result) in platforms.iter().zip(results) {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    error!("Scan of {} failed: {:#}", platform.name(), e);
                    failed.push(platform.name().to_string());
                }
            }
        }

        info!("Scan finished: {}", self.stats.format_stats());

        if !failed.is_empty() {
            anyhow::bail!("Platform scans failed: {}", failed.join(", "));
        }

        Ok(summaries)
    }

    /// Scan one platform looked up by name
    pub async fn scan_platform_named(&self, name: &str) -> Result<PlatformSummary> {
        let platform = self
            .platforms
            .get(name)
            .with_context(|| format!("Unknown platform '{}'", name))?;

        let summary = self.scan_platform(platform.as_ref()).await?;
        info!("Scan finished: {}", self.stats.format_stats());

        Ok(summary)
    }

    /// Scan all public programs of one platform, then mark programs that are
    /// no longer listed as inactive.
    pub async fn scan_platform(&self, platform: &dyn PlatformAPI) -> Result<PlatformSummary> {
        let name = platform.name();
        info!("Fetching programs from {}", name);

        let programs = platform
            .get_public_programs()
            .await
            .with_context(|| format!("Failed to fetch programs from {}", name))?;

        info!("Fetched {} programs from {}", programs.len(), name);

        let mut summary = PlatformSummary::new(name);
        let mut listed = HashSet::new();

        for program in &programs {
            listed.insert(program.url.clone());

            let record = self
                .store
                .upsert_program(program)
                .await
                .with_context(|| format!("Failed to store program {}", program.url))?;

            summary.programs += 1;
            self.stats.record_program();

            match self.scan_program(platform, &record).await? {
                ScanOutcome::Unchanged { .. } => summary.unchanged += 1,
                ScanOutcome::Completed { .. } => summary.completed += 1,
                ScanOutcome::Failed { .. } => summary.failed += 1,
            }
        }

        for stored in self.store.list_programs(Some(name)).await? {
            if stored.active && !listed.contains(&stored.url) {
                info!("{} no longer lists {}, marking inactive", name, stored.url);
                self.store.mark_program_inactive(stored.id).await?;
                summary.deactivated += 1;
                self.stats.record_deactivated();
            }
        }

        info!(
            "{}: {} programs, {} scanned, {} unchanged, {} failed, {} deactivated",
            name,
            summary.programs,
            summary.completed,
            summary.unchanged,
            summary.failed,
            summary.deactivated
        );

        Ok(summary)
    }

    /// Run one scan of one stored program and record its outcome.
    ///
    /// Only store failures while opening or closing the scan record are
    /// returned as errors; everything else ends up in the outcome.
    pub async fn scan_program(
        &self,
        platform: &dyn PlatformAPI,
        program: &ProgramRecord,
    ) -> Result<ScanOutcome> {
        let scan = self.store.create_scan(program.id).await?;
        debug!("Scan {} started for {}", scan.id, program.url);

        let outcome = match self.run_scan(platform, program).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Scan of {} failed: {:#}", program.url, e);
                ScanOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        };

        let (status, assets_found, error) = match &outcome {
            ScanOutcome::Unchanged { assets_found } => {
                self.stats.record_completed();
                self.stats.record_skipped();
                (ScanStatus::Completed, *assets_found, "")
            }
            ScanOutcome::Completed { assets_found, .. } => {
                self.stats.record_completed();
                (ScanStatus::Completed, *assets_found, "")
            }
            ScanOutcome::Failed { error } => {
                self.stats.record_failed();
                (ScanStatus::Failed, 0, error.as_str())
            }
        };

        if !self
            .store
            .finish_scan(scan.id, status, assets_found, error)
            .await?
        {
            warn!("Scan {} was already finished", scan.id);
        }

        Ok(outcome)
    }

    async fn run_scan(&self, platform: &dyn PlatformAPI, program: &ProgramRecord) -> Result<ScanOutcome> {
        let entries = platform
            .get_program_scope(&program.url)
            .await
            .context("Failed to fetch program scope")?;

        let scope = classify(&entries);
        info!(
            "{}: {} primary assets, {} out-of-scope entries",
            program.name,
            scope.primary.len(),
            scope.out_of_scope.len()
        );

        // Compare before writing, otherwise the new entries are already stored
        let changed = self.scope_changed(program, &scope).await;

        let primary = Self::primary_assets(program, &scope);
        self.store
            .upsert_assets(&primary)
            .await
            .context("Failed to persist primary assets")?;

        let retry = self.incomplete.lock().await.contains(&program.id);
        if !changed && !retry {
            info!("Scope of {} unchanged, skipping discovery", program.name);
            let assets_found = self.count_assets(program, primary.len()).await;
            return Ok(ScanOutcome::Unchanged { assets_found });
        }
        if !changed {
            info!("Previous discovery of {} did not finish, running it again", program.name);
        }

        let new_assets = match self.discover_secondary(program, &scope).await {
            Ok(new_assets) => {
                self.incomplete.lock().await.remove(&program.id);
                new_assets
            }
            Err(e) => {
                warn!("Discovery pass for {} incomplete: {:#}", program.name, e);
                self.incomplete.lock().await.insert(program.id);
                0
            }
        };
        let assets_found = self.count_assets(program, primary.len() + new_assets).await;

        Ok(ScanOutcome::Completed {
            assets_found,
            new_assets,
        })
    }

    /// True unless every live primary URL is already stored as primary.
    /// Errs on the side of scanning when the stored set cannot be read.
    async fn scope_changed(&self, program: &ProgramRecord, scope: &ClassifiedScope) -> bool {
        let stored = match self
            .store
            .get_assets(program.id, Some(AssetSource::Primary))
            .await
        {
            Ok(assets) => assets.into_iter().map(|a| a.url).collect::<HashSet<_>>(),
            Err(e) => {
                warn!(
                    "Could not read stored scope of {}, running discovery: {:#}",
                    program.url, e
                );
                return true;
            }
        };

        let new_urls: Vec<String> = scope
            .primary_urls()
            .into_iter()
            .filter(|url| !stored.contains(url))
            .collect();

        if new_urls.is_empty() {
            return false;
        }

        debug!("{} new scope URLs for {}: {:?}", new_urls.len(), program.url, new_urls);
        true
    }

    fn primary_assets(program: &ProgramRecord, scope: &ClassifiedScope) -> Vec<NewAsset> {
        scope
            .primary
            .iter()
            .map(|asset| NewAsset {
                program_id: program.id,
                program_url: program.url.clone(),
                url: asset.url.clone(),
                domain: asset.domain.clone(),
                subdomain: match asset.asset_type {
                    AssetType::Wildcard => String::new(),
                    _ => extract_subdomain(&asset.url),
                },
                status: ASSET_STATUS_ACTIVE.to_string(),
                source: AssetSource::Primary,
            })
            .collect()
    }

    fn secondary_asset(program: &ProgramRecord, host: &str) -> Option<NewAsset> {
        let url = normalize_url(host).ok()?;
        let domain = extract_domain(host).ok()?;

        Some(NewAsset {
            program_id: program.id,
            program_url: program.url.clone(),
            url,
            subdomain: extract_subdomain(&domain),
            domain,
            status: ASSET_STATUS_ACTIVE.to_string(),
            source: AssetSource::Secondary,
        })
    }

    /// Discovery, probing, filtering and storage of secondary assets.
    ///
    /// Partial results count as success. An error means the pass found
    /// nothing it could keep; the caller logs it and the scan still completes.
    async fn discover_secondary(&self, program: &ProgramRecord, scope: &ClassifiedScope) -> Result<usize> {
        let roots = scope.root_domains();
        if roots.is_empty() {
            debug!("No discoverable root domains for {}", program.name);
            return Ok(0);
        }

        let deadline = Instant::now() + self.discovery_timeout;
        info!("Discovering subdomains of {} root domains for {}", roots.len(), program.name);

        let bulk = tokio::time::timeout_at(deadline, self.discovery.discover_domains_bulk(&roots))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "subdomain discovery timed out after {}",
                    RunStats::format_uptime(self.discovery_timeout.as_secs())
                )
            })?
            .context("Subdomain discovery failed")?;

        if bulk.error_count > 0 {
            warn!(
                "Discovery failed for {} of {} domains of {}",
                bulk.error_count,
                bulk.results.len(),
                program.name
            );
        }

        let known: HashSet<String> = match self.store.get_assets(program.id, None).await {
            Ok(assets) => assets.into_iter().map(|a| a.url).collect(),
            Err(e) => {
                warn!("Could not read stored assets of {}: {:#}", program.url, e);
                HashSet::new()
            }
        };

        let candidates: Vec<String> = bulk
            .subdomains()
            .into_iter()
            .filter(|host| normalize_url(host).is_ok_and(|url| !known.contains(&url)))
            .collect();

        if candidates.is_empty() {
            info!("No new subdomains for {}", program.name);
            return Ok(0);
        }

        info!("Probing {} new subdomains for {}", candidates.len(), program.name);

        let alive = self
            .prober
            .filter_existing_domains(&candidates, deadline)
            .await
            .context("Probing failed")?;

        let filter = OutOfScopeFilter::new(&scope.out_of_scope);
        let in_scope = filter.apply(alive);

        let assets: Vec<NewAsset> = in_scope
            .iter()
            .filter_map(|host| Self::secondary_asset(program, host))
            .collect();

        if assets.is_empty() {
            return Ok(0);
        }

        let written = self
            .store
            .upsert_assets(&assets)
            .await
            .context("Failed to persist secondary assets")?;

        info!("Stored {} new assets for {}", written, program.name);
        self.stats.add_secondary_assets(written as u64);
        Ok(written)
    }

    async fn count_assets(&self, program: &ProgramRecord, fallback: usize) -> i64 {
        match self.store.count_assets(program.id).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count assets of {}: {:#}", program.url, e);
                fallback as i64
            }
        }
    }
}
