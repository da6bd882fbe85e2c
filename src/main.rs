// src/main.rs
use clap::Parser;
use colored::Colorize;
use scope_scout::cli::{Cli, Command};
use scope_scout::config::Config;
use scope_scout::database::{PostgresBackend, Store};
use scope_scout::discovery::ChaosClient;
use scope_scout::health;
use scope_scout::platforms::PlatformRegistry;
use scope_scout::probe::HttpProber;
use scope_scout::scanner::ScanService;
use scope_scout::scheduler::Scheduler;
use scope_scout::types::ScanStatus;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn connect(config: &Config) -> anyhow::Result<Arc<PostgresBackend>> {
    let postgres = PostgresBackend::new(&config.database.url, config.database.max_connections)?
        .with_batch_size(config.database.batch_size);
    Ok(Arc::new(postgres))
}

fn build_service(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<ScanService> {
    let platforms = PlatformRegistry::from_config(&config.platforms)?;
    if platforms.is_empty() {
        tracing::warn!("No platforms enabled, scans will fail until one is configured");
    }

    let discovery = Arc::new(ChaosClient::new(&config.chaos)?);
    let prober = Arc::new(HttpProber::new(&config.probe)?);

    Ok(ScanService::new(platforms, discovery, prober, store)
        .with_discovery_timeout(config.scanner.chaos_discovery_timeout()))
}

async fn print_stats(store: &dyn Store, recent: usize) -> anyhow::Result<()> {
    let stats = store.stats(recent).await?;

    println!("{}", "Programs".bold());
    if stats.programs.is_empty() {
        println!("  (none)");
    }
    for p in &stats.programs {
        println!("  {:<12} {} active / {} total", p.platform, p.active.to_string().green(), p.total);
    }

    println!("{}", "Assets".bold());
    println!("  primary:   {}", stats.primary_assets);
    println!("  secondary: {}", stats.secondary_assets);
    println!("  total:     {}", stats.total_assets().to_string().bold());

    println!("{}", "Scans".bold());
    println!("  running:   {}", stats.running_scans.to_string().yellow());
    println!("  completed: {}", stats.completed_scans.to_string().green());
    println!("  failed:    {}", stats.failed_scans.to_string().red());

    if !stats.recent_scans.is_empty() {
        println!("{}", "Recent scans".bold());
        for scan in &stats.recent_scans {
            let status = match scan.status {
                ScanStatus::Completed => scan.status.as_str().green(),
                ScanStatus::Failed => scan.status.as_str().red(),
                ScanStatus::Running => scan.status.as_str().yellow(),
            };
            println!(
                "  #{:<6} program {:<6} {:<10} {:>6} assets  {}  {}",
                scan.id,
                scan.program_id,
                status,
                scan.assets_found,
                scan.started_at.format("%Y-%m-%d %H:%M:%S"),
                scan.error.dimmed()
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Validate arguments
    cli.validate()?;

    // Load config file, environment secrets win over the file
    let config = Config::load(Path::new(&cli.config))?;

    // Initialize logging
    let log_level = cli.log_level_override().unwrap_or(config.logging.level.as_str());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    match cli.command {
        Command::Migrate => {
            let store = connect(&config)?;
            store.migrate().await?;
            println!("{}", "Database migrated".green());
        }

        Command::Scan { platform } => {
            tracing::info!("Starting scope-scout scan...");
            let store = connect(&config)?;

            let service = Arc::new(build_service(&config, store)?);
            let scheduler = Scheduler::new(service.clone(), &config.scanner);

            if let Err(e) = scheduler.run_once(platform.as_deref()).await {
                eprintln!("{} {:#}", "Scan failed:".red().bold(), e);
                std::process::exit(1);
            }

            println!("{} {}", "Scan complete:".green().bold(), service.stats().format_stats());
        }

        Command::Serve => {
            tracing::info!("Starting scope-scout service...");
            // Database outages surface per run and are retried on schedule
            let store = connect(&config)?;

            let service = Arc::new(build_service(&config, store)?);
            let scheduler = Scheduler::new(service, &config.scanner);

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C, shutting down...");
                    shutdown_tx.send(true).ok();
                }
            });

            scheduler.run(shutdown_rx).await;
        }

        Command::Stats { recent } => {
            let store = connect(&config)?;
            print_stats(store.as_ref(), recent).await?;
        }

        Command::Health => {
            let store = match connect(&config) {
                Ok(store) => store,
                Err(e) => {
                    println!("{} database: {:#}", "✗".red(), e);
                    std::process::exit(1);
                }
            };
            let platforms = PlatformRegistry::from_config(&config.platforms)?;
            let discovery = ChaosClient::new(&config.chaos)?;

            let results = health::run_checks(
                store.as_ref(),
                &platforms,
                &discovery,
                config.health.max_memory_mb,
            )
            .await;

            let mut healthy = true;
            for check in &results {
                match &check.error {
                    None => println!("{} {}", "✓".green(), check.name),
                    Some(error) => {
                        healthy = false;
                        println!("{} {}: {}", "✗".red(), check.name, error);
                    }
                }
            }

            if !healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
