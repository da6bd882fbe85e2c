use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a scope entry as reported by a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Url,
    Wildcard,
    Cidr,
    Other,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Url => "url",
            AssetType::Wildcard => "wildcard",
            AssetType::Cidr => "cidr",
            AssetType::Other => "other",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A program as listed by a platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Platform name (e.g. "hackerone")
    pub platform: String,

    /// Display name
    pub name: String,

    /// Program page on the platform; identity together with `platform`
    pub url: String,

    /// Public website of the company, if known
    pub website: String,
}

/// A program as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRecord {
    pub id: i64,
    pub platform: String,
    pub name: String,
    pub url: String,
    pub website: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// A raw scope entry, typed by the platform client but not yet normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEntry {
    pub identifier: String,
    pub asset_type: AssetType,
    pub eligible_for_submission: bool,
}

impl ScopeEntry {
    pub fn new(identifier: impl Into<String>, asset_type: AssetType, eligible: bool) -> Self {
        Self {
            identifier: identifier.into(),
            asset_type,
            eligible_for_submission: eligible,
        }
    }
}

/// A normalized scope entry of one program at scan time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAsset {
    /// Identifier exactly as the platform reported it
    pub identifier: String,

    /// Canonical URL (https, no default port, no trailing slash)
    pub url: String,

    /// Canonical domain; for wildcards the pattern without its "*." prefixes
    pub domain: String,

    pub asset_type: AssetType,
    pub eligible_for_submission: bool,

    /// Original pattern for wildcard entries
    pub wildcard_pattern: Option<String>,
}

/// Where an asset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetSource {
    /// Declared directly in the platform scope
    Primary,
    /// Found through passive DNS and confirmed live
    Secondary,
}

impl AssetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetSource::Primary => "primary",
            AssetSource::Secondary => "secondary",
        }
    }
}

impl fmt::Display for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(AssetSource::Primary),
            "secondary" => Ok(AssetSource::Secondary),
            other => anyhow::bail!("unknown asset source '{}'", other),
        }
    }
}

pub const ASSET_STATUS_ACTIVE: &str = "active";

/// Asset row to be upserted, keyed by (program_id, url)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub program_id: i64,
    pub program_url: String,
    pub url: String,
    pub domain: String,
    pub subdomain: String,
    pub status: String,
    pub source: AssetSource,
}

/// A stored asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: i64,
    pub program_id: i64,
    pub program_url: String,
    pub url: String,
    pub domain: String,
    pub subdomain: String,
    pub status: String,
    pub source: AssetSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a scan record: running -> completed | failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => anyhow::bail!("unknown scan status '{}'", other),
        }
    }
}

/// One discovery run for one program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub id: i64,
    pub program_id: i64,
    pub status: ScanStatus,
    pub assets_found: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Empty when the scan did not fail
    pub error: String,
}
