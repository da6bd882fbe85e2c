// src/health.rs
//! Health checks behind the `health` command

use anyhow::Result;
use tracing::debug;

use crate::database::Store;
use crate::discovery::DiscoveryClient;
use crate::platforms::PlatformRegistry;

/// Outcome of one named check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub error: Option<String>,
}

impl CheckResult {
    fn from_result(name: impl Into<String>, result: Result<()>) -> Self {
        Self {
            name: name.into(),
            error: result.err().map(|e| format!("{:#}", e)),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Value of VmRSS from a /proc/<pid>/status dump, in kB
fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

/// Resident memory of this process in MB, where the platform exposes it
pub fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb / 1024)
}

fn check_memory(usage_mb: Option<u64>, max_memory_mb: u64) -> Result<()> {
    match usage_mb {
        Some(used) if used > max_memory_mb => {
            anyhow::bail!("resident memory {} MB exceeds limit of {} MB", used, max_memory_mb)
        }
        Some(used) => {
            debug!("Resident memory {} MB (limit {} MB)", used, max_memory_mb);
            Ok(())
        }
        None => {
            debug!("Resident memory not available on this platform, skipping");
            Ok(())
        }
    }
}

/// Run every check in sequence: database, platforms, discovery, resources
pub async fn run_checks(
    store: &dyn Store,
    platforms: &PlatformRegistry,
    discovery: &dyn DiscoveryClient,
    max_memory_mb: u64,
) -> Vec<CheckResult> {
    let mut results = vec![CheckResult::from_result("database", store.ping().await)];

    for platform in platforms.all() {
        results.push(CheckResult::from_result(
            format!("platform:{}", platform.name()),
            platform.health_check().await,
        ));
    }

    results.push(CheckResult::from_result("discovery", discovery.health_check().await));
    results.push(CheckResult::from_result(
        "resources",
        check_memory(resident_memory_mb(), max_memory_mb),
    ));

    results
}
