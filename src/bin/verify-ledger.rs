//! Ledger Verification CLI Tool
//!
//! Re-derives every record hash of one or more streams from stored content
//! and reports where a chain breaks. Exits with status 1 if any stream is
//! broken. A `--checkpoint` is always checked against its own stream,
//! whether or not that stream is selected or still registered.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use chain_ledger::config::AppConfig;
use chain_ledger::ledger::audit::{self, StreamAudit};
use chain_ledger::ledger::{Checkpoint, Ledger, StreamId};
use chain_ledger::storage::SqliteStore;

#[derive(Parser)]
#[command(name = "verify-ledger")]
#[command(about = "Verify hash-chain integrity of ledger streams")]
struct Cli {
    /// Database URL (defaults to the configured one)
    #[arg(long)]
    database_url: Option<String>,

    /// Stream to verify; repeat for several. Defaults to every known stream.
    #[arg(short, long = "stream")]
    streams: Vec<String>,

    /// Keep scanning after the first break and list every one
    #[arg(long)]
    all_breaks: bool,

    /// Checkpoint file (JSON) the stream prefix must still match
    #[arg(long)]
    checkpoint: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let results = match run(&cli).await {
        Ok(results) => results,
        Err(e) => {
            error!("Ledger verification failed: {:#}", e);
            std::process::exit(2);
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if !cli.quiet {
        print_results(&results, cli.verbose);
    }

    match audit::exit_code(&results) {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

async fn run(cli: &Cli) -> Result<Vec<StreamAudit>> {
    let mut config = AppConfig::load()?;
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }

    info!("Verifying ledger at {}", config.database_url);
    let store = SqliteStore::new(&config.database_url)
        .await
        .with_context(|| format!("cannot open {}", config.database_url))?;
    let ledger = Ledger::open(store, config.ledger()).await?;

    let checkpoint = match &cli.checkpoint {
        Some(path) => Some(load_checkpoint(path)?),
        None => None,
    };

    let streams = cli
        .streams
        .iter()
        .map(|s| StreamId::new(s.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(audit::audit_streams(&ledger, &streams, cli.all_breaks, checkpoint.as_ref()).await?)
}

fn load_checkpoint(path: &str) -> Result<Checkpoint> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read checkpoint {}", path))?;
    let checkpoint: Checkpoint =
        serde_json::from_str(&content).with_context(|| format!("invalid checkpoint {}", path))?;
    Ok(checkpoint)
}

fn print_results(results: &[StreamAudit], verbose: bool) {
    for result in results {
        println!("{}", result.report.summary());
        if verbose {
            if let Some(head) = &result.report.head {
                println!("  Head: #{} {}", head.sequence, head.hash);
            }
            println!("  Records checked: {}", result.report.records_checked);
        }
        for b in &result.breaks {
            println!("  - sequence {} ({:?}): {}", b.sequence, b.kind, b.message);
        }
        if let Some(cp) = &result.checkpoint {
            println!("  checkpoint: {}", cp.message);
        }
    }

    let broken = results.iter().filter(|r| !r.is_valid()).count();
    if broken == 0 {
        println!("✓ {} streams verified", results.len());
    } else {
        println!("✗ {} of {} streams broken", broken, results.len());
    }
}
