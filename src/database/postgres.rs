// src/database/postgres.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{AssetStore, PlatformCount, ProgramStore, ScanStore, Store, StoreStats};
use crate::types::{Asset, AssetSource, NewAsset, Program, ProgramRecord, Scan, ScanStatus};

const PROGRAM_COLUMNS: &str = "id, platform, name, url, website, active, updated_at";
const ASSET_COLUMNS: &str =
    "id, program_id, program_url, url, domain, subdomain, status, source, created_at, updated_at";
const SCAN_COLUMNS: &str = "id, program_id, status, assets_found, started_at, completed_at, error";

/// PostgreSQL database backend
pub struct PostgresBackend {
    pool: PgPool,
    batch_size: usize,
}

impl PostgresBackend {
    /// Create new PostgreSQL backend
    ///
    /// Connections are opened on first use, so an unreachable server shows up
    /// as an error from the first query rather than here.
    pub fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // sqlx 0.8 rejects 'channel_binding' which some hosted providers append
        let cleaned_url = Self::clean_connection_string(database_url);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(&cleaned_url)
            .context("Invalid PostgreSQL connection string")?;

        debug!("PostgreSQL pool created (max {} connections)", max_connections);

        Ok(Self {
            pool,
            batch_size: 500,
        })
    }

    /// Rows per insert transaction
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn clean_connection_string(url_str: &str) -> String {
        use url::Url;

        if let Ok(mut url) = Url::parse(url_str) {
            let unsupported_params = ["channel_binding"];

            let cleaned_pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| !unsupported_params.contains(&key.as_ref()))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            if cleaned_pairs.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(cleaned_pairs);
            }

            url.to_string()
        } else {
            url_str.to_string()
        }
    }

    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS programs (
                id BIGSERIAL PRIMARY KEY,
                platform TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                website TEXT NOT NULL DEFAULT '',
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (platform, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create programs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id BIGSERIAL PRIMARY KEY,
                program_id BIGINT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
                program_url TEXT NOT NULL,
                url TEXT NOT NULL,
                domain TEXT NOT NULL,
                subdomain TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active',
                source TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (program_id, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create assets table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id BIGSERIAL PRIMARY KEY,
                program_id BIGINT NOT NULL REFERENCES programs(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                assets_found BIGINT NOT NULL DEFAULT 0,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                completed_at TIMESTAMPTZ,
                error TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create scans table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_assets_program_source
            ON assets(program_id, source)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on assets(program_id, source)")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_scans_program_started
            ON scans(program_id, started_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on scans(program_id, started_at)")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_programs_platform_active
            ON programs(platform)
            WHERE active
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create index on programs(platform)")?;

        info!("Database migrations completed successfully");

        Ok(())
    }

    fn program_from_row(row: &PgRow) -> ProgramRecord {
        ProgramRecord {
            id: row.get("id"),
            platform: row.get("platform"),
            name: row.get("name"),
            url: row.get("url"),
            website: row.get("website"),
            active: row.get("active"),
            updated_at: row.get("updated_at"),
        }
    }

    fn asset_from_row(row: &PgRow) -> Result<Asset> {
        let source: String = row.get("source");
        Ok(Asset {
            id: row.get("id"),
            program_id: row.get("program_id"),
            program_url: row.get("program_url"),
            url: row.get("url"),
            domain: row.get("domain"),
            subdomain: row.get("subdomain"),
            status: row.get("status"),
            source: source.parse()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn scan_from_row(row: &PgRow) -> Result<Scan> {
        let status: String = row.get("status");
        Ok(Scan {
            id: row.get("id"),
            program_id: row.get("program_id"),
            status: status.parse()?,
            assets_found: row.get("assets_found"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error: row.get("error"),
        })
    }
}

#[async_trait]
impl ProgramStore for PostgresBackend {
    async fn upsert_program(&self, program: &Program) -> Result<ProgramRecord> {
        let sql = format!(
            r#"
            INSERT INTO programs (platform, name, url, website, active, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            ON CONFLICT (platform, url)
            DO UPDATE SET name = EXCLUDED.name,
                          website = EXCLUDED.website,
                          active = TRUE,
                          updated_at = NOW()
            RETURNING {}
            "#,
            PROGRAM_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(&program.platform)
            .bind(&program.name)
            .bind(&program.url)
            .bind(&program.website)
            .fetch_one(&self.pool)
            .await
            .context("Failed to upsert program")?;

        Ok(Self::program_from_row(&row))
    }

    async fn get_program(&self, platform: &str, url: &str) -> Result<Option<ProgramRecord>> {
        let sql = format!(
            "SELECT {} FROM programs WHERE platform = $1 AND url = $2",
            PROGRAM_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(platform)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch program")?;

        Ok(row.as_ref().map(Self::program_from_row))
    }

    async fn list_programs(&self, platform: Option<&str>) -> Result<Vec<ProgramRecord>> {
        let sql = format!(
            "SELECT {} FROM programs WHERE ($1::TEXT IS NULL OR platform = $1) ORDER BY platform, name",
            PROGRAM_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(platform)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list programs")?;

        Ok(rows.iter().map(Self::program_from_row).collect())
    }

    async fn mark_program_inactive(&self, program_id: i64) -> Result<()> {
        sqlx::query("UPDATE programs SET active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(program_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark program inactive")?;

        Ok(())
    }

    async fn delete_program(&self, program_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM programs WHERE id = $1")
            .bind(program_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete program")?;

        Ok(())
    }
}

#[async_trait]
impl AssetStore for PostgresBackend {
    async fn upsert_assets(&self, assets: &[NewAsset]) -> Result<usize> {
        let mut written = 0;

        for batch in assets.chunks(self.batch_size) {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to begin asset transaction")?;

            for asset in batch {
                // A primary row stays primary when rediscovered
                sqlx::query(
                    r#"
                    INSERT INTO assets (
                        program_id, program_url, url, domain, subdomain, status, source,
                        created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                    ON CONFLICT (program_id, url)
                    DO UPDATE SET domain = EXCLUDED.domain,
                                  subdomain = EXCLUDED.subdomain,
                                  status = EXCLUDED.status,
                                  source = CASE WHEN assets.source = 'primary'
                                                THEN 'primary'
                                                ELSE EXCLUDED.source END,
                                  updated_at = NOW()
                    "#,
                )
                .bind(asset.program_id)
                .bind(&asset.program_url)
                .bind(&asset.url)
                .bind(&asset.domain)
                .bind(&asset.subdomain)
                .bind(&asset.status)
                .bind(asset.source.as_str())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert asset {}", asset.url))?;
            }

            tx.commit()
                .await
                .context("Failed to commit asset transaction")?;
            written += batch.len();
        }

        debug!("Upserted {} assets", written);

        Ok(written)
    }

    async fn get_assets(&self, program_id: i64, source: Option<AssetSource>) -> Result<Vec<Asset>> {
        let sql = format!(
            "SELECT {} FROM assets WHERE program_id = $1 AND ($2::TEXT IS NULL OR source = $2) ORDER BY url",
            ASSET_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(program_id)
            .bind(source.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch assets")?;

        rows.iter().map(Self::asset_from_row).collect()
    }

    async fn count_assets(&self, program_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM assets WHERE program_id = $1")
            .bind(program_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count assets")?;

        Ok(row.get("n"))
    }
}

#[async_trait]
impl ScanStore for PostgresBackend {
    async fn create_scan(&self, program_id: i64) -> Result<Scan> {
        let sql = format!(
            r#"
            INSERT INTO scans (program_id, status, assets_found, started_at, error)
            VALUES ($1, $2, 0, NOW(), '')
            RETURNING {}
            "#,
            SCAN_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(program_id)
            .bind(ScanStatus::Running.as_str())
            .fetch_one(&self.pool)
            .await
            .context("Failed to create scan")?;

        Self::scan_from_row(&row)
    }

    async fn finish_scan(
        &self,
        scan_id: i64,
        status: ScanStatus,
        assets_found: i64,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scans
            SET status = $2, assets_found = $3, error = $4, completed_at = NOW()
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(scan_id)
        .bind(status.as_str())
        .bind(assets_found)
        .bind(error)
        .bind(ScanStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to finish scan")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_scan(&self, scan_id: i64) -> Result<Option<Scan>> {
        let sql = format!("SELECT {} FROM scans WHERE id = $1", SCAN_COLUMNS);

        let row = sqlx::query(&sql)
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch scan")?;

        row.as_ref().map(Self::scan_from_row).transpose()
    }

    async fn list_scans(&self, program_id: i64) -> Result<Vec<Scan>> {
        let sql = format!(
            "SELECT {} FROM scans WHERE program_id = $1 ORDER BY started_at DESC, id DESC",
            SCAN_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(program_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list scans")?;

        rows.iter().map(Self::scan_from_row).collect()
    }
}

#[async_trait]
impl Store for PostgresBackend {
    async fn migrate(&self) -> Result<()> {
        self.run_migrations().await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;

        Ok(())
    }

    async fn stats(&self, recent_scans: usize) -> Result<StoreStats> {
        let mut stats = StoreStats::default();

        let rows = sqlx::query(
            r#"
            SELECT platform,
                   COUNT(*) FILTER (WHERE active) AS active,
                   COUNT(*) AS total
            FROM programs
            GROUP BY platform
            ORDER BY platform
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count programs")?;

        stats.programs = rows
            .iter()
            .map(|row| PlatformCount {
                platform: row.get("platform"),
                active: row.get("active"),
                total: row.get("total"),
            })
            .collect();

        let rows = sqlx::query("SELECT source, COUNT(*) AS n FROM assets GROUP BY source")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count assets")?;

        for row in rows {
            let source: String = row.get("source");
            let n: i64 = row.get("n");
            match source.parse::<AssetSource>()? {
                AssetSource::Primary => stats.primary_assets = n,
                AssetSource::Secondary => stats.secondary_assets = n,
            }
        }

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM scans GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count scans")?;

        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match status.parse::<ScanStatus>()? {
                ScanStatus::Running => stats.running_scans = n,
                ScanStatus::Completed => stats.completed_scans = n,
                ScanStatus::Failed => stats.failed_scans = n,
            }
        }

        let sql = format!(
            "SELECT {} FROM scans ORDER BY started_at DESC, id DESC LIMIT $1",
            SCAN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(recent_scans as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch recent scans")?;

        stats.recent_scans = rows
            .iter()
            .map(Self::scan_from_row)
            .collect::<Result<_>>()?;

        Ok(stats)
    }
}
