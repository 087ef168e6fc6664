//! Vigil CLI - periodic metric sampling and export
//!
//! Usage:
//!   vigil run                     Start the sentinel scheduler
//!   vigil sample --tasks cpu,sys  Collect one snapshot and print it
//!   vigil sample -t port -p 8080  Report whether port 8080 is listening
//!   vigil validate                Check a configuration file
//!   vigil init [path]             Write a default configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vigil_core::{MetricKind, VigilConfig};
use vigil_export::ReqwestTransport;
use vigil_metrics::{MetricSampler, ProcfsProvider};
use vigil_sentinel::{SchedulerContext, TaskScheduler};

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about = "Periodic metric sampling and export")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "vigil.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the sentinel scheduler and run until Ctrl-C
    Run,

    /// Collect one snapshot and print it as JSON
    Sample {
        /// Metric kinds to collect
        #[arg(short, long, value_delimiter = ',', default_values_t = [MetricKind::Cpu, MetricKind::Sys])]
        tasks: Vec<MetricKind>,

        /// Ports reported by the `port` task
        #[arg(short, long, value_delimiter = ',')]
        ports: Vec<u16>,

        /// Node name (defaults to the configured name)
        #[arg(long)]
        node: Option<String>,
    },

    /// Load and validate the configuration, then print a job summary
    Validate,

    /// Write a default configuration file
    Init {
        /// Destination (defaults to --config)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Init { .. } => VigilConfig::default(),
        Commands::Run => VigilConfig::load(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?,
        _ => VigilConfig::load_or_default(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?,
    };

    init_logging(cli.verbose, &config.log.level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.work_threads.max(2))
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Run => cmd_run(config).await,
            Commands::Sample { tasks, ports, node } => {
                cmd_sample(config, tasks, ports, node).await
            }
            Commands::Validate => cmd_validate(&cli.config, config),
            Commands::Init { path, force } => cmd_init(path.unwrap_or(cli.config), force),
        }
    })
}

/// RUST_LOG wins, then --verbose, then the configured level
fn init_logging(verbose: bool, configured: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(configured)
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn cmd_run(config: VigilConfig) -> Result<()> {
    config.validate()?;

    let transport = ReqwestTransport::new(config.http.timeout())?;
    let context = SchedulerContext::from_config(
        &config,
        Arc::new(ProcfsProvider::new()),
        Arc::new(transport),
    );
    let scheduler = TaskScheduler::new(context);

    let report = scheduler
        .start(&config.sentinel)
        .context("Failed to start sentinel scheduler")?;
    info!(
        "Node {} running {} jobs ({} dropped), tick {:?}",
        config.name, report.jobs, report.dropped, report.tick
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let outcomes = scheduler.stop("interrupted").await;
    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    if failed > 0 {
        info!("{} shutdown listeners reported failures", failed);
    }
    Ok(())
}

async fn cmd_sample(
    config: VigilConfig,
    tasks: Vec<MetricKind>,
    ports: Vec<u16>,
    node: Option<String>,
) -> Result<()> {
    if tasks.is_empty() {
        bail!("No metric kinds requested");
    }

    let sampler = MetricSampler::new(Arc::new(ProcfsProvider::new()))
        .with_delay(config.sampling.delay());
    let node = node.unwrap_or(config.name);

    let snapshot = sampler
        .collect_ports(&node, &tasks, &ports)
        .await
        .context("Failed to collect snapshot")?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_validate(path: &Path, config: VigilConfig) -> Result<()> {
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    let active = config.active_sentinels();

    println!("Vigil Configuration");
    println!("===================");
    println!("File: {}", path.display());
    println!("Node: {}", config.name);
    println!(
        "Breaker: {} failures, {}s cooldown",
        config.breaker.failure_threshold, config.breaker.cooldown_secs
    );
    println!(
        "\nSentinel jobs: {} active, {} dropped",
        active.len(),
        config.sentinel.len() - active.len()
    );

    for (idx, job) in active.iter().enumerate() {
        let tasks: Vec<&str> = job.tasks.iter().map(|t| t.as_str()).collect();
        let count = if job.is_unbounded() {
            "unbounded".to_string()
        } else {
            job.count.to_string()
        };
        println!(
            "  [{}] every {}s, runs: {}, tasks: {}",
            idx,
            job.interval,
            count,
            tasks.join(",")
        );
        if !job.listened_ports.is_empty() {
            let ports: Vec<String> = job.listened_ports.iter().map(|p| p.to_string()).collect();
            println!("      ports: {}", ports.join(","));
        }
        for subscriber in &job.subscribers {
            let auth = if subscriber.enabled_auth().is_some() {
                " (basic auth)"
            } else {
                ""
            };
            println!("      -> {} {}{}", subscriber.kind, subscriber.url, auth);
        }
    }

    if active.is_empty() {
        bail!("No valid sentinel configuration");
    }
    Ok(())
}

fn cmd_init(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    VigilConfig::write_default(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_parses_task_list() {
        let cli = Cli::try_parse_from(["vigil", "sample", "--tasks", "cpu,disk-io,network"]).unwrap();
        match cli.command {
            Commands::Sample { tasks, ports, node } => {
                assert_eq!(
                    tasks,
                    vec![MetricKind::Cpu, MetricKind::DiskIo, MetricKind::Network]
                );
                assert!(ports.is_empty());
                assert!(node.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_sample_defaults_and_bad_kind() {
        let cli = Cli::try_parse_from(["vigil", "-v", "sample"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("vigil.toml"));
        match cli.command {
            Commands::Sample { tasks, .. } => {
                assert_eq!(tasks, vec![MetricKind::Cpu, MetricKind::Sys])
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["vigil", "sample", "--tasks", "heap"]).is_err());
    }

    #[test]
    fn test_sample_parses_ports() {
        let cli =
            Cli::try_parse_from(["vigil", "sample", "-t", "port", "-p", "3306,6379,8080"]).unwrap();
        match cli.command {
            Commands::Sample { tasks, ports, .. } => {
                assert_eq!(tasks, vec![MetricKind::Port]);
                assert_eq!(ports, vec![3306, 6379, 8080]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["vigil", "sample", "-p", "70000"]).is_err());
    }

    #[test]
    fn test_init_then_validate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vigil.toml");

        cmd_init(path.clone(), false).unwrap();
        assert!(cmd_init(path.clone(), false).is_err());
        cmd_init(path.clone(), true).unwrap();

        // The default file has no jobs, which validation reports.
        let config = VigilConfig::load(&path).unwrap();
        assert!(cmd_validate(&path, config).is_err());
    }
}
