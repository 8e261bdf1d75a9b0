//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;
use crate::infrastructure::config::settings::Config;

#[derive(Debug, Parser)]
#[command(name = "tradehook", version, about = "Trading webhook gateway")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway (default).
    Run,
    /// Validate configuration and report readiness without starting.
    Check,
}

/// Offline configuration check for `tradehook check`.
pub fn check(config: &Config) -> Result<()> {
    config.validate()?;

    println!("configuration ok");
    println!("  server bind        {}", config.server.bind);
    println!("  database           {}", config.database.url);
    println!(
        "  master key         {}",
        if config.master_key_hex.is_some() {
            "present"
        } else {
            "MISSING (set TRADEHOOK_MASTER_KEY)"
        }
    );
    println!("  worker concurrency {}", config.worker.concurrency);
    println!(
        "  reconciler         every {}s (+{}s jitter), concurrency {}",
        config.reconciler.interval_secs,
        config.reconciler.jitter_secs,
        config.reconciler.concurrency
    );
    println!(
        "  breaker            window {}s, threshold {}, cooldown {}s",
        config.breaker.window_secs, config.breaker.failure_threshold, config.breaker.cooldown_secs
    );
    let probes: Vec<&str> = config
        .health
        .probe_exchanges
        .iter()
        .map(|e| e.as_str())
        .collect();
    println!("  health probes      {}", probes.join(", "));
    Ok(())
}
