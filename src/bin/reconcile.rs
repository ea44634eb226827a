//! One-shot reconcile CLI.
//!
//! Replays ledger records the downstream never processed. Exit code 0 when
//! every partition completed or was skipped, 1 when any partition failed.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omen_backend::persistence::{LedgerConfig, ReconcileStateStore, SignalLedger};
use omen_backend::reconcile::{
    DownstreamProcessor, HttpDownstream, LocalDownstream, ReconcileJob, ReconcileStatus,
};

#[derive(Parser, Debug)]
#[command(name = "omen-reconcile", about = "Reconcile the OMEN ledger against a downstream")]
struct Args {
    /// Ledger base directory.
    #[arg(long, env = "OMEN_LEDGER_BASE_PATH", default_value = "./omen-ledger")]
    ledger_path: String,

    /// Reconcile state database.
    #[arg(long, env = "OMEN_RECONCILE_STATE_DB", default_value = "./omen-reconcile.db")]
    state_db: String,

    /// Downstream ingest URL. Without it, the local idempotency store is
    /// used instead.
    #[arg(long, env = "OMEN_DOWNSTREAM_INGEST_URL")]
    ingest_url: Option<String>,

    /// Downstream processed-ids URL.
    #[arg(long, env = "OMEN_DOWNSTREAM_PROCESSED_URL")]
    processed_url: Option<String>,

    /// Bearer token for the downstream.
    #[arg(long, env = "OMEN_DOWNSTREAM_API_KEY")]
    api_key: Option<String>,

    /// Reconcile partitions from the last N days.
    #[arg(long, default_value_t = 7)]
    since_days: i64,

    /// Maximum signals replayed per partition per run.
    #[arg(long, default_value_t = 100)]
    max_replay_batch: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omen_backend=info,omen_reconcile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let ledger = Arc::new(
        SignalLedger::new(&args.ledger_path, LedgerConfig::default())
            .context("open signal ledger")?,
    );
    let state = Arc::new(
        ReconcileStateStore::open(&args.state_db).context("open reconcile state store")?,
    );
    let downstream: Arc<dyn DownstreamProcessor> =
        match (&args.ingest_url, &args.processed_url) {
            (Some(ingest), Some(processed)) => Arc::new(HttpDownstream::new(
                ingest.clone(),
                processed.clone(),
                args.api_key.clone(),
            )),
            _ => Arc::new(LocalDownstream::new()),
        };

    let job = ReconcileJob::new(ledger, state, downstream)
        .with_since_days(args.since_days)
        .with_max_replay_batch(args.max_replay_batch);

    let results = job.run(Utc::now()).await;

    for result in &results {
        println!(
            "{:<18} {:<10} ledger={:<5} processed={:<5} missing={:<5} replayed={}",
            result.partition,
            result.status.as_str(),
            result.ledger_count,
            result.processed_count,
            result.missing_count,
            result.replayed_count,
        );
    }

    let failed = results
        .iter()
        .any(|r| r.status == ReconcileStatus::Failed);
    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
