mod decoding;
mod executor;
mod exporters;
mod jobs;
mod recorder;
mod rpc;
mod scheduler;
mod types;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use decoding::transfers::TokenTypeCache;
use executor::BatchWorkExecutor;
use exporters::{ConsoleExporter, ExportSink};
use jobs::{
    CallDecodeJob, InternalTransactionJob, Job, LogDecodeJob, TokenTransferJob, TraceJob,
};
use recorder::{ExceptionRecorder, TracingRecorder};
use rpc::{RpcClient, RpcClientConfig};
use scheduler::JobScheduler;
use types::config::IndexerConfig;
use types::token_transfer::TransferKind;
use types::{BlockRange, DomainKind};

struct CliArgs {
    start_block: u64,
    end_block: u64,
    config_path: PathBuf,
    reorg: bool,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let args: Vec<String> = env::args().collect();
    let mut positional = Vec::new();
    let mut config_path = PathBuf::from("config/config.json");
    let mut reorg = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .context("--config requires a path argument")?;
                config_path = PathBuf::from(value);
            }
            "--reorg" => reorg = true,
            other => positional.push(other.to_string()),
        }
    }

    anyhow::ensure!(
        positional.len() == 2,
        "usage: chain-indexer <start_block> <end_block> [--config path] [--reorg]"
    );
    let start_block: u64 = positional[0]
        .parse()
        .with_context(|| format!("invalid start block '{}'", positional[0]))?;
    let end_block: u64 = positional[1]
        .parse()
        .with_context(|| format!("invalid end block '{}'", positional[1]))?;

    Ok(CliArgs {
        start_block,
        end_block,
        config_path,
        reorg,
    })
}

fn apply_env_overrides(config: &mut IndexerConfig) {
    if let Ok(uri) = env::var("PROVIDER_URI") {
        config.provider_uri = uri;
    }
    if let Ok(uri) = env::var("DEBUG_PROVIDER_URI") {
        config.debug_provider_uri = Some(uri);
    }
    if let Some(batch_size) = env::var("RPC_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        config.batch_size = batch_size;
    }
    if let Some(max_workers) = env::var("MAX_WORKERS").ok().and_then(|s| s.parse().ok()) {
        config.max_workers = max_workers;
    }
}

/// Seed the per-cycle token-type cache from the job options, e.g.
/// `{"known_tokens": {"0x...": "erc721"}}`.
fn build_token_type_cache(options: &serde_json::Value) -> TokenTypeCache {
    let mut cache = TokenTypeCache::new();
    let Some(known) = options.get("known_tokens").and_then(|v| v.as_object()) else {
        return cache;
    };
    for (address, kind) in known {
        let Ok(address) = address.parse() else {
            tracing::warn!(%address, "skipping unparseable address in known_tokens");
            continue;
        };
        let kind = match kind.as_str() {
            Some("erc20") => TransferKind::Erc20,
            Some("erc721") => TransferKind::Erc721,
            other => {
                tracing::warn!(?other, "skipping unknown token kind in known_tokens");
                continue;
            }
        };
        cache.insert(address, kind);
    }
    cache
}

fn build_jobs(
    config: &IndexerConfig,
    required: &[DomainKind],
) -> anyhow::Result<Vec<Arc<dyn Job>>> {
    let mut jobs: Vec<Arc<dyn Job>> = Vec::new();

    jobs.push(Arc::new(
        TokenTransferJob::new(&config.job_options("token_transfer"))
            .context("token_transfer job options")?,
    ));

    if config.jobs.contains_key("log_decode") {
        let job = LogDecodeJob::new(&config.job_options("log_decode"))
            .context("log_decode job options")?;
        tracing::info!(events = job.event_count(), "log decoding enabled");
        jobs.push(Arc::new(job));
    }

    if config.jobs.contains_key("call_decode") {
        let job = CallDecodeJob::new(&config.job_options("call_decode"))
            .context("call_decode job options")?;
        tracing::info!(functions = job.function_count(), "call decoding enabled");
        jobs.push(Arc::new(job));
    }

    let needs_traces = required
        .iter()
        .any(|kind| matches!(kind, DomainKind::Trace | DomainKind::InternalTransaction));
    if needs_traces {
        jobs.push(Arc::new(
            TraceJob::new(&config.job_options("trace")).context("trace job options")?,
        ));
        jobs.push(Arc::new(InternalTransactionJob));
    }

    Ok(jobs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let range = BlockRange::new(args.start_block, args.end_block)
        .context("invalid block range")?;

    // .env is optional; explicit env vars win either way.
    let _ = dotenvy::dotenv();

    let mut config = IndexerConfig::load(Path::new(&args.config_path))?;
    apply_env_overrides(&mut config);
    config.validate().context("invalid configuration")?;
    let required = config.required_kinds().context("invalid configuration")?;

    tracing::info!(
        provider = %config.provider_uri,
        batch_size = config.batch_size,
        max_workers = config.max_workers,
        blocks_per_cycle = config.blocks_per_cycle,
        "configuration loaded"
    );

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let rpc = Arc::new(
        RpcClient::new(
            RpcClientConfig::new(config.provider_uri.as_str())
                .with_timeout(timeout)
                .with_batching(config.batch_size > 1),
        )
        .context("failed to build RPC client")?,
    );
    let debug_rpc = Arc::new(
        RpcClient::new(
            RpcClientConfig::new(config.debug_provider_uri())
                .with_timeout(timeout)
                .with_batching(config.debug_batch_size > 1),
        )
        .context("failed to build debug RPC client")?,
    );

    let recorder: Arc<dyn ExceptionRecorder> = Arc::new(TracingRecorder);
    let executor = Arc::new(BatchWorkExecutor::new(
        config.batch_size,
        config.max_workers,
        config.retry.clone(),
        config.shutdown_mode,
        recorder.clone(),
    ));
    let debug_executor = Arc::new(BatchWorkExecutor::new(
        config.debug_batch_size,
        config.max_workers,
        config.retry.clone(),
        config.shutdown_mode,
        recorder.clone(),
    ));

    let jobs = build_jobs(&config, &required)?;
    let exporters: Vec<Arc<dyn ExportSink>> = vec![Arc::new(ConsoleExporter)];
    let token_types = Arc::new(build_token_type_cache(
        &config.job_options("token_transfer"),
    ));

    let scheduler = JobScheduler::new(
        rpc,
        debug_rpc,
        executor,
        debug_executor,
        jobs,
        exporters,
        recorder,
        required,
        token_types,
    )
    .context("invalid job graph")?;

    let mut failed_cycles = 0usize;
    for cycle_range in range.split(config.blocks_per_cycle) {
        let result = if args.reorg {
            scheduler.run_reorg_cycle(cycle_range).await
        } else {
            scheduler.run_cycle(cycle_range).await
        };
        match result {
            Ok(report) => {
                tracing::info!(
                    range = %report.range,
                    exported = report.exported,
                    failed_jobs = ?report.failed_jobs,
                    "cycle finished"
                );
            }
            // A failed cycle is recorded and skipped; the next range is
            // attempted independently.
            Err(e) => {
                failed_cycles += 1;
                tracing::error!(range = %cycle_range, error = %e, "cycle failed");
            }
        }
    }

    anyhow::ensure!(
        failed_cycles == 0,
        "{failed_cycles} cycle(s) failed; see exception records"
    );
    tracing::info!("all cycles complete for {range}");
    Ok(())
}
