// src/scheduler.rs
//! Periodic scan runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ScannerConfig;
use crate::scanner::ScanService;
use crate::stats::RunStats;

/// Runs the scanner now and then on a fixed interval until shut down
pub struct Scheduler {
    service: Arc<ScanService>,
    interval: Duration,
    scan_timeout: Duration,
    /// Set once the store schema has been migrated
    store_ready: AtomicBool,
}

impl Scheduler {
    pub fn new(service: Arc<ScanService>, config: &ScannerConfig) -> Self {
        Self {
            service,
            interval: config.scan_interval(),
            scan_timeout: config.scan_timeout(),
            store_ready: AtomicBool::new(false),
        }
    }

    /// One run over all platforms, or only `platform` when given, bounded by the scan timeout.
    /// The store is migrated before the first run that reaches it.
    pub async fn run_once(&self, platform: Option<&str>) -> Result<()> {
        let run = async {
            if !self.store_ready.load(Ordering::Acquire) {
                self.service.prepare_store().await?;
                self.store_ready.store(true, Ordering::Release);
            }

            match platform {
                Some(name) => self.service.scan_platform_named(name).await.map(|_| ()),
                None => self.service.scan_all().await.map(|_| ()),
            }
        };

        match tokio::time::timeout(self.scan_timeout, run).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!(
                "Scan run exceeded timeout of {}",
                RunStats::format_uptime(self.scan_timeout.as_secs())
            ),
        }
    }

    /// Run until the shutdown signal is received. Failed runs are logged and
    /// the next run happens on schedule.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "Scheduler starting (scan interval: {})",
            RunStats::format_uptime(self.interval.as_secs())
        );

        loop {
            tokio::select! {
                result = self.run_once(None) => {
                    if let Err(e) = result {
                        error!("Scheduled scan failed: {:#}", e);
                    }
                }

                _ = shutdown_rx.changed() => {
                    info!("Scheduler shutting down during a scan");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}

                _ = shutdown_rx.changed() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Store;
    use crate::platforms::PlatformRegistry;
    use crate::scanner::mocks::{MockDiscovery, MockPlatform, MockProber, MockStore};
    use std::sync::atomic::AtomicUsize;

    fn scheduler(platform: Arc<MockPlatform>, interval: Duration, timeout: Duration) -> Scheduler {
        with_store(platform, Arc::new(MockStore::default()), interval, timeout)
    }

    fn with_store(
        platform: Arc<MockPlatform>,
        store: Arc<dyn Store>,
        interval: Duration,
        timeout: Duration,
    ) -> Scheduler {
        let mut registry = PlatformRegistry::new();
        registry.register(platform);
        let service = ScanService::new(
            registry,
            Arc::new(MockDiscovery::default()),
            Arc::new(MockProber::default()),
            store,
        );

        Scheduler {
            service: Arc::new(service),
            interval,
            scan_timeout: timeout,
            store_ready: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let platform = Arc::new(MockPlatform::new("hackerone"));
        let scheduler = scheduler(
            platform.clone(),
            Duration::from_millis(50),
            Duration::from_secs(5),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(180)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(platform.program_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failed_runs_keep_the_loop_alive() {
        let platform = Arc::new(MockPlatform {
            name: "hackerone".to_string(),
            fail_listing: true,
            ..MockPlatform::default()
        });
        let scheduler = scheduler(
            platform.clone(),
            Duration::from_millis(20),
            Duration::from_secs(5),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(platform.program_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_run_once_for_one_platform() {
        let platform = Arc::new(MockPlatform::new("hackerone"));
        let scheduler = scheduler(platform.clone(), Duration::from_secs(3600), Duration::from_secs(5));

        scheduler.run_once(Some("hackerone")).await.unwrap();
        assert!(scheduler.run_once(Some("bugcrowd")).await.is_err());
        assert_eq!(platform.program_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retried_on_next_run() {
        let platform = Arc::new(MockPlatform::new("hackerone"));
        let store = Arc::new(MockStore {
            migrate_failures: AtomicUsize::new(2),
            ..MockStore::default()
        });
        let scheduler = with_store(
            platform.clone(),
            store.clone(),
            Duration::from_millis(20),
            Duration::from_secs(5),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Two failed migrations, then one that sticks
        assert_eq!(store.migrations.load(Ordering::SeqCst), 3);
        assert!(platform.program_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_once_reports_unreachable_store() {
        let platform = Arc::new(MockPlatform::new("hackerone"));
        let store = Arc::new(MockStore {
            migrate_failures: AtomicUsize::new(1),
            ..MockStore::default()
        });
        let scheduler = with_store(
            platform.clone(),
            store.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        );

        let err = scheduler.run_once(None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Database is not ready"));
        assert_eq!(platform.program_calls.load(Ordering::SeqCst), 0);

        scheduler.run_once(None).await.unwrap();
        scheduler.run_once(None).await.unwrap();
        assert_eq!(store.migrations.load(Ordering::SeqCst), 2);
        assert_eq!(platform.program_calls.load(Ordering::SeqCst), 2);
    }
}
