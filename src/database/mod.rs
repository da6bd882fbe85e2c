// src/database/mod.rs
use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Asset, AssetSource, NewAsset, Program, ProgramRecord, Scan, ScanStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

/// Program counts for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCount {
    pub platform: String,
    pub active: i64,
    pub total: i64,
}

/// Aggregate counts shown by the `stats` command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub programs: Vec<PlatformCount>,
    pub primary_assets: i64,
    pub secondary_assets: i64,
    pub running_scans: i64,
    pub completed_scans: i64,
    pub failed_scans: i64,
    /// Most recent scans, newest first
    pub recent_scans: Vec<Scan>,
}

impl StoreStats {
    pub fn total_assets(&self) -> i64 {
        self.primary_assets + self.secondary_assets
    }
}

#[async_trait]
pub trait ProgramStore: Send + Sync {
    /// Insert a program or refresh name, website, active flag and timestamp
    async fn upsert_program(&self, program: &Program) -> Result<ProgramRecord>;

    async fn get_program(&self, platform: &str, url: &str) -> Result<Option<ProgramRecord>>;

    /// Programs of one platform, or of all platforms when `platform` is None
    async fn list_programs(&self, platform: Option<&str>) -> Result<Vec<ProgramRecord>>;

    /// Soft delete; the row and its assets are kept
    async fn mark_program_inactive(&self, program_id: i64) -> Result<()>;

    /// Hard delete, cascading to the program's assets and scans
    async fn delete_program(&self, program_id: i64) -> Result<()>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Upsert keyed by (program_id, url); returns the number of rows written
    async fn upsert_assets(&self, assets: &[NewAsset]) -> Result<usize>;

    async fn get_assets(&self, program_id: i64, source: Option<AssetSource>) -> Result<Vec<Asset>>;

    async fn count_assets(&self, program_id: i64) -> Result<i64>;
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Open a scan in the `running` state
    async fn create_scan(&self, program_id: i64) -> Result<Scan>;

    /// Move a running scan to a terminal state. Returns false when the scan
    /// was already terminal, in which case nothing changes.
    async fn finish_scan(
        &self,
        scan_id: i64,
        status: ScanStatus,
        assets_found: i64,
        error: &str,
    ) -> Result<bool>;

    async fn get_scan(&self, scan_id: i64) -> Result<Option<Scan>>;

    async fn list_scans(&self, program_id: i64) -> Result<Vec<Scan>>;
}

/// Everything the scanner persists
#[async_trait]
pub trait Store: ProgramStore + AssetStore + ScanStore {
    /// Create missing tables and indexes. Safe to call repeatedly.
    async fn migrate(&self) -> Result<()>;

    /// Health check
    async fn ping(&self) -> Result<()>;

    async fn stats(&self, recent_scans: usize) -> Result<StoreStats>;
}
