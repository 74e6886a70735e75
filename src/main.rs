use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::RateKeeperConfig;
use ratekeeper::ratelimit::RateLimiter;

/// Token-bucket admission control, driven from the command line.
#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about)]
struct Cli {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the configuration and print the registered rules
    Validate,
    /// Issue a burst of checks for one caller and pattern
    Check {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        pattern: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Read "<key> <pattern>" lines from stdin and answer allow/deny
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => RateKeeperConfig::from_file(path)?,
        None => {
            warn!("No configuration file given, every pattern is unrestricted");
            RateKeeperConfig::default()
        }
    };
    info!(rules = config.rules.len(), "Configuration loaded");

    match cli.command {
        Command::Validate => validate(&config),
        Command::Check {
            key,
            pattern,
            count,
        } => check(&config, &key, &pattern, count),
        Command::Run => run(&config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn validate(config: &RateKeeperConfig) -> anyhow::Result<()> {
    let rules = config.build_rule_set()?;
    let mut patterns: Vec<&str> = rules.patterns().collect();
    patterns.sort_unstable();

    for pattern in patterns {
        for (position, rule) in rules.get(pattern).iter().enumerate() {
            println!(
                "{}\t#{}\tlimit={}\tduration={}s",
                pattern,
                position,
                rule.limit(),
                rule.duration().as_secs()
            );
        }
    }
    Ok(())
}

fn check(config: &RateKeeperConfig, key: &str, pattern: &str, count: u32) -> anyhow::Result<()> {
    let limiter = RateLimiter::from_config(config)?;

    let allowed = (0..count).filter(|_| limiter.check_access(key, pattern)).count();
    let denied = count as usize - allowed;

    println!("allowed={} denied={}", allowed, denied);
    if let Some(tokens) = limiter.tokens_remaining(key, pattern) {
        println!("tokens_remaining={:?}", tokens);
    }
    Ok(())
}

async fn run(config: &RateKeeperConfig) -> anyhow::Result<()> {
    let (limiter, sweeper) = ratekeeper::init(config)?;
    info!("Rate limiter initialized, reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                let mut fields = line.split_whitespace();
                match (fields.next(), fields.next()) {
                    (Some(key), Some(pattern)) => {
                        let verdict = if limiter.check_access(key, pattern) { "allow" } else { "deny" };
                        println!("{}", verdict);
                    }
                    (None, _) => continue,
                    _ => warn!(line = %line, "Expected '<key> <pattern>'"),
                }
            }
        }
    }

    sweeper.shutdown().await?;
    info!("Ratekeeper stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
