use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sentinel_limit::{LimitersConfig, RateLimiterFactory};

/// Replay a stream of requests against a configured rate limiter.
#[derive(Debug, Parser)]
#[command(name = "sentinel-limit", version, about)]
struct Args {
    /// Path to the YAML file of named limiter configurations
    #[arg(short, long)]
    config: PathBuf,

    /// Name of the limiter to exercise
    #[arg(short, long)]
    limiter: String,

    /// Client id the requests are attributed to
    #[arg(long, default_value = "anonymous")]
    client: String,

    /// Number of requests to issue
    #[arg(short = 'n', long, default_value_t = 10)]
    requests: u64,

    /// Pause between requests, in milliseconds
    #[arg(short, long, default_value_t = 0)]
    interval_ms: u64,

    /// Print each decision as a JSON line
    #[arg(long)]
    json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Sentinel Limit");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let configs = LimitersConfig::from_file(&args.config)?;
    info!(path = %args.config.display(), limiters = configs.len(), "Configuration loaded");

    let registry = RateLimiterFactory::new().create_from_named_configs(&configs)?;
    let limiter = registry.get(&args.limiter).ok_or_else(|| {
        anyhow::anyhow!(
            "no limiter named '{}' (available: {})",
            args.limiter,
            registry.names().collect::<Vec<_>>().join(", ")
        )
    })?;

    let replay = async {
        let mut admitted = 0u64;
        for i in 0..args.requests {
            let result = limiter.try_acquire(&args.client);
            if result.allowed {
                admitted += 1;
            }

            if args.json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                println!(
                    "#{:<4} {:<6} remaining={:<5} retry_after={:.3}s",
                    i + 1,
                    if result.allowed { "ALLOW" } else { "DENY" },
                    result.remaining,
                    result.retry_after.as_secs_f64()
                );
            }

            if args.interval_ms > 0 {
                tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
            }
        }
        Ok::<_, anyhow::Error>(admitted)
    };

    tokio::select! {
        admitted = replay => {
            let admitted = admitted?;
            info!(
                limiter = %args.limiter,
                client = %args.client,
                admitted,
                denied = args.requests - admitted,
                "Replay finished"
            );
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping replay");
        }
    }

    registry.shutdown().await;
    info!("Sentinel Limit stopped");
    Ok(())
}
