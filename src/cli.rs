// src/cli.rs
use clap::{Parser, Subcommand};

/// Scope-Scout: bug bounty asset discovery
///
/// Pulls program scope from bug bounty platforms, expands it through passive
/// DNS, keeps the hosts that answer over HTTP and stores everything in PostgreSQL.
#[derive(Parser, Debug, Clone)]
#[command(name = "scope-scout")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to TOML config file
    #[arg(short = 'c', long = "config", default_value = "config.toml", global = true)]
    pub config: String,

    /// Verbose logging (set log level to debug)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run one scan and exit (non-zero exit if any platform fails)
    Scan {
        /// Only scan this platform (e.g. hackerone, bugcrowd)
        #[arg(short = 'p', long = "platform")]
        platform: Option<String>,
    },

    /// Scan now and then every scan_interval_hours until interrupted
    Serve,

    /// Print stored program, asset and scan counts
    Stats {
        /// Number of recent scans to list
        #[arg(long = "recent", default_value = "10")]
        recent: usize,
    },

    /// Check database, platforms, discovery service and process resources
    Health,

    /// Create database tables and indexes
    Migrate,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        if let Command::Scan { platform: Some(name) } = &self.command {
            if name.trim().is_empty() {
                anyhow::bail!("--platform must not be empty");
            }
        }

        Ok(())
    }

    /// Log level forced by flags, if any
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }
}
