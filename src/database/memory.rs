// src/database/memory.rs
//! In-process store with the same semantics as the PostgreSQL backend

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{AssetStore, PlatformCount, ProgramStore, ScanStore, Store, StoreStats};
use crate::types::{Asset, AssetSource, NewAsset, Program, ProgramRecord, Scan, ScanStatus};

#[derive(Default)]
struct Tables {
    next_id: i64,
    programs: Vec<ProgramRecord>,
    assets: Vec<Asset>,
    scans: Vec<Scan>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Store kept entirely in memory, used by tests and dry runs
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgramStore for MemoryBackend {
    async fn upsert_program(&self, program: &Program) -> Result<ProgramRecord> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(existing) = tables
            .programs
            .iter_mut()
            .find(|p| p.platform == program.platform && p.url == program.url)
        {
            existing.name = program.name.clone();
            existing.website = program.website.clone();
            existing.active = true;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = ProgramRecord {
            id: tables.next_id(),
            platform: program.platform.clone(),
            name: program.name.clone(),
            url: program.url.clone(),
            website: program.website.clone(),
            active: true,
            updated_at: now,
        };
        tables.programs.push(record.clone());
        Ok(record)
    }

    async fn get_program(&self, platform: &str, url: &str) -> Result<Option<ProgramRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .programs
            .iter()
            .find(|p| p.platform == platform && p.url == url)
            .cloned())
    }

    async fn list_programs(&self, platform: Option<&str>) -> Result<Vec<ProgramRecord>> {
        let tables = self.tables.lock().await;
        let mut programs: Vec<ProgramRecord> = tables
            .programs
            .iter()
            .filter(|p| platform.is_none_or(|name| p.platform == name))
            .cloned()
            .collect();
        programs.sort_by(|a, b| (&a.platform, &a.name).cmp(&(&b.platform, &b.name)));
        Ok(programs)
    }

    async fn mark_program_inactive(&self, program_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(program) = tables.programs.iter_mut().find(|p| p.id == program_id) {
            program.active = false;
            program.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_program(&self, program_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.programs.retain(|p| p.id != program_id);
        tables.assets.retain(|a| a.program_id != program_id);
        tables.scans.retain(|s| s.program_id != program_id);
        Ok(())
    }
}

#[async_trait]
impl AssetStore for MemoryBackend {
    async fn upsert_assets(&self, assets: &[NewAsset]) -> Result<usize> {
        let mut tables = self.tables.lock().await;

        for asset in assets {
            if !tables.programs.iter().any(|p| p.id == asset.program_id) {
                anyhow::bail!(
                    "Failed to upsert asset {}: program {} does not exist",
                    asset.url,
                    asset.program_id
                );
            }
        }

        let now = Utc::now();
        for asset in assets {
            if let Some(existing) = tables
                .assets
                .iter_mut()
                .find(|a| a.program_id == asset.program_id && a.url == asset.url)
            {
                existing.domain = asset.domain.clone();
                existing.subdomain = asset.subdomain.clone();
                existing.status = asset.status.clone();
                if existing.source != AssetSource::Primary {
                    existing.source = asset.source;
                }
                existing.updated_at = now;
                continue;
            }

            let id = tables.next_id();
            tables.assets.push(Asset {
                id,
                program_id: asset.program_id,
                program_url: asset.program_url.clone(),
                url: asset.url.clone(),
                domain: asset.domain.clone(),
                subdomain: asset.subdomain.clone(),
                status: asset.status.clone(),
                source: asset.source,
                created_at: now,
                updated_at: now,
            });
        }

        Ok(assets.len())
    }

    async fn get_assets(&self, program_id: i64, source: Option<AssetSource>) -> Result<Vec<Asset>> {
        let tables = self.tables.lock().await;
        let mut assets: Vec<Asset> = tables
            .assets
            .iter()
            .filter(|a| a.program_id == program_id)
            .filter(|a| source.is_none_or(|s| a.source == s))
            .cloned()
            .collect();
        assets.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(assets)
    }

    async fn count_assets(&self, program_id: i64) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .assets
            .iter()
            .filter(|a| a.program_id == program_id)
            .count() as i64)
    }
}

#[async_trait]
impl ScanStore for MemoryBackend {
    async fn create_scan(&self, program_id: i64) -> Result<Scan> {
        let mut tables = self.tables.lock().await;
        if !tables.programs.iter().any(|p| p.id == program_id) {
            anyhow::bail!("Failed to create scan: program {} does not exist", program_id);
        }

        let scan = Scan {
            id: tables.next_id(),
            program_id,
            status: ScanStatus::Running,
            assets_found: 0,
            started_at: Utc::now(),
            completed_at: None,
            error: String::new(),
        };
        tables.scans.push(scan.clone());
        Ok(scan)
    }

    async fn finish_scan(
        &self,
        scan_id: i64,
        status: ScanStatus,
        assets_found: i64,
        error: &str,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables
            .scans
            .iter_mut()
            .find(|s| s.id == scan_id && s.status == ScanStatus::Running)
        {
            Some(scan) => {
                scan.status = status;
                scan.assets_found = assets_found;
                scan.error = error.to_string();
                scan.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_scan(&self, scan_id: i64) -> Result<Option<Scan>> {
        let tables = self.tables.lock().await;
        Ok(tables.scans.iter().find(|s| s.id == scan_id).cloned())
    }

    async fn list_scans(&self, program_id: i64) -> Result<Vec<Scan>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .scans
            .iter()
            .rev()
            .filter(|s| s.program_id == program_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryBackend {
    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self, recent_scans: usize) -> Result<StoreStats> {
        let tables = self.tables.lock().await;

        let mut per_platform: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for program in &tables.programs {
            let entry = per_platform.entry(program.platform.as_str()).or_default();
            if program.active {
                entry.0 += 1;
            }
            entry.1 += 1;
        }

        let count_source = |source: AssetSource| {
            tables.assets.iter().filter(|a| a.source == source).count() as i64
        };
        let count_status = |status: ScanStatus| {
            tables.scans.iter().filter(|s| s.status == status).count() as i64
        };

        Ok(StoreStats {
            programs: per_platform
                .into_iter()
                .map(|(platform, (active, total))| PlatformCount {
                    platform: platform.to_string(),
                    active,
                    total,
                })
                .collect(),
            primary_assets: count_source(AssetSource::Primary),
            secondary_assets: count_source(AssetSource::Secondary),
            running_scans: count_status(ScanStatus::Running),
            completed_scans: count_status(ScanStatus::Completed),
            failed_scans: count_status(ScanStatus::Failed),
            recent_scans: tables.scans.iter().rev().take(recent_scans).cloned().collect(),
        })
    }
}
