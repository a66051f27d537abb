//! Command-line interface for the collector.
//!
//! Provides commands for running a collection cycle, flushing the cache,
//! and inspecting the resolved configuration.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config;
use crate::core::{CacheStore, Collector};

/// gip - host-resident grid information collector
#[derive(Parser, Debug)]
#[command(name = "gip")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one collection cycle and print the published records
    Run {
        /// Config file (defaults to ./gip.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Discard all cache files before running
        #[arg(long)]
        flush_cache: bool,
    },

    /// Discard all cache files
    Flush {
        /// Config file (defaults to ./gip.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config {
        /// Config file (defaults to ./gip.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                config,
                flush_cache,
            } => {
                let mut config = config::load(config.as_deref())?;
                if flush_cache {
                    config.flush_cache = true;
                }

                let report = Collector::new(config).run_cycle().await?;

                // Diagnostics go to tracing (stderr); stdout carries only
                // the published records.
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(report.output.as_bytes())?;

                eprintln!(
                    "gip: {} fresh, {} executed, {} failed; {} full / {} partial updates",
                    report.fresh,
                    report.executed,
                    report.failed,
                    report.full_updates,
                    report.partial_updates
                );
                Ok(())
            }

            Commands::Flush { config } => {
                let config = config::load(config.as_deref())?;
                config.validate()?;
                CacheStore::new(config.temp_dir.clone()).flush().await?;
                eprintln!("gip: cache flushed at {}", config.temp_dir.display());
                Ok(())
            }

            Commands::Config { config } => {
                let config = config::load(config.as_deref())?;
                println!("{config:#?}");
                Ok(())
            }
        }
    }
}
