//! Pipeline driver: one scheduling cycle per block range.
//!
//! `Idle → Fetching → Processing → Exporting → Idle`, with `Failed` as the
//! per-cycle terminal state. A failed cycle is recorded and returned as an
//! error; the process moves on to the next range.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::decoding::transfers::TokenTypeCache;
use crate::executor::{BatchWorkExecutor, WorkError};
use crate::exporters::{ExportError, ExportSink};
use crate::jobs::graph::{GraphError, JobGraph};
use crate::jobs::{Job, JobContext, JobError};
use crate::recorder::{ExceptionRecorder, Level};
use crate::rpc::requests::{block_by_number_request, logs_request};
use crate::rpc::{RpcCallResult, RpcClient};
use crate::types::buffer::DataBuffer;
use crate::types::raw::{RawBlock, RawLog};
use crate::types::record::sort_records;
use crate::types::{BlockRange, DomainKind, DomainRecord, RangeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Processing,
    Exporting,
    Failed,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("base data fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Outcome of one completed cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub range: BlockRange,
    pub exported: usize,
    pub failed_jobs: Vec<String>,
}

pub struct JobScheduler {
    rpc: Arc<RpcClient>,
    debug_rpc: Arc<RpcClient>,
    executor: Arc<BatchWorkExecutor>,
    debug_executor: Arc<BatchWorkExecutor>,
    jobs: Vec<Arc<dyn Job>>,
    graph: JobGraph,
    exporters: Vec<Arc<dyn ExportSink>>,
    recorder: Arc<dyn ExceptionRecorder>,
    required_output_types: Vec<DomainKind>,
    token_types: Arc<TokenTypeCache>,
    buffer: Arc<DataBuffer>,
    state: Mutex<CycleState>,
}

impl JobScheduler {
    /// Build the scheduler, validating the job graph. A dependency cycle or
    /// double-produced kind is rejected here, before any RPC traffic.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<RpcClient>,
        debug_rpc: Arc<RpcClient>,
        executor: Arc<BatchWorkExecutor>,
        debug_executor: Arc<BatchWorkExecutor>,
        jobs: Vec<Arc<dyn Job>>,
        exporters: Vec<Arc<dyn ExportSink>>,
        recorder: Arc<dyn ExceptionRecorder>,
        required_output_types: Vec<DomainKind>,
        token_types: Arc<TokenTypeCache>,
    ) -> Result<Self, GraphError> {
        let graph = JobGraph::build(&jobs)?;
        tracing::info!(
            jobs = jobs.len(),
            waves = graph.waves().len(),
            "job graph validated"
        );
        Ok(Self {
            rpc,
            debug_rpc,
            executor,
            debug_executor,
            jobs,
            graph,
            exporters,
            recorder,
            required_output_types,
            token_types,
            buffer: Arc::new(DataBuffer::new()),
            state: Mutex::new(CycleState::Idle),
        })
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: CycleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn data_buff(&self) -> Arc<DataBuffer> {
        self.buffer.clone()
    }

    pub fn clear_data_buff(&self) {
        self.buffer.clear();
    }

    /// Run one full cycle over `range`.
    pub async fn run_cycle(&self, range: BlockRange) -> Result<CycleReport, SchedulerError> {
        self.run(range, false).await
    }

    /// Re-run a range the canonical chain has diverged on: outputs of
    /// reorg-aware jobs are flagged `reorg = true` before export so the sink
    /// supersedes the stale rows instead of deleting them.
    pub async fn run_reorg_cycle(&self, range: BlockRange) -> Result<CycleReport, SchedulerError> {
        self.run(range, true).await
    }

    async fn run(&self, range: BlockRange, reorg: bool) -> Result<CycleReport, SchedulerError> {
        tracing::info!(%range, reorg, "starting cycle");
        self.buffer.clear();
        self.set_state(CycleState::Fetching);

        if let Err(e) = self.fetch(range).await {
            self.recorder.record(
                Some(range.start_block),
                "cycle",
                Level::Error,
                "fetch_failed",
                &e.to_string(),
                json!({"start_block": range.start_block, "end_block": range.end_block}),
            );
            // No partial export: drop everything this cycle produced.
            self.buffer.clear();
            self.set_state(CycleState::Failed);
            return Err(e);
        }

        self.set_state(CycleState::Processing);
        let failed_jobs = self.run_waves(range).await;

        self.set_state(CycleState::Exporting);
        if reorg {
            self.mark_reorg_outputs(range);
        }
        let exported = match self.export().await {
            Ok(count) => count,
            Err(e) => {
                self.recorder.record(
                    Some(range.start_block),
                    "cycle",
                    Level::Error,
                    "export_failed",
                    &e.to_string(),
                    json!({"start_block": range.start_block, "end_block": range.end_block}),
                );
                self.buffer.clear();
                self.set_state(CycleState::Failed);
                return Err(e.into());
            }
        };

        self.buffer.clear();
        self.set_state(CycleState::Idle);
        tracing::info!(%range, exported, failed_jobs = ?failed_jobs, "cycle complete");
        Ok(CycleReport {
            range,
            exported,
            failed_jobs,
        })
    }

    /// Fetching phase: populate the base kinds (blocks, transactions, logs)
    /// through the transport and batch executor. Any terminal failure here
    /// aborts the cycle, since dependent jobs need complete base data.
    async fn fetch(&self, range: BlockRange) -> Result<(), SchedulerError> {
        // Blocks with full transactions.
        let numbers: Vec<u64> = range.blocks().collect();
        let rpc = self.rpc.clone();
        let buffer = self.buffer.clone();
        self.executor
            .execute(range, "block", numbers, move |batch| {
                let rpc = rpc.clone();
                let buffer = buffer.clone();
                async move {
                    let requests = batch
                        .iter()
                        .map(|number| block_by_number_request(rpc.next_id(), *number, true))
                        .collect();
                    let results = rpc.batch_call(requests).await.map_err(WorkError::from)?;

                    let mut records = Vec::new();
                    for (number, result) in batch.iter().zip(results) {
                        match result {
                            RpcCallResult::Result(value) => {
                                let raw: RawBlock =
                                    serde_json::from_value(value).map_err(|e| {
                                        WorkError::Fatal(format!(
                                            "block {number} failed to parse: {e}"
                                        ))
                                    })?;
                                let (block, transactions) = raw.into_records();
                                records.push(DomainRecord::Block(block));
                                records.extend(
                                    transactions.into_iter().map(DomainRecord::Transaction),
                                );
                            }
                            RpcCallResult::Error { code, message } => {
                                return Err(WorkError::Fatal(format!(
                                    "block {number} rejected ({code}): {message}"
                                )))
                            }
                            RpcCallResult::Null => {
                                return Err(WorkError::Retriable(format!(
                                    "node returned no block {number}"
                                )))
                            }
                        }
                    }
                    buffer.append_records(records);
                    Ok(())
                }
            })
            .await
            .map_err(|e| SchedulerError::Fetch(e.to_string()))?;

        // Logs need the block timestamps fetched above.
        let timestamps: HashMap<u64, u64> = self
            .buffer
            .snapshot(DomainKind::Block)
            .into_iter()
            .filter_map(|record| match record {
                DomainRecord::Block(b) => Some((b.number, b.timestamp)),
                _ => None,
            })
            .collect();
        let timestamps = Arc::new(timestamps);

        let sub_ranges = range.split(self.executor.batch_size() as u64);
        let rpc = self.rpc.clone();
        let buffer = self.buffer.clone();
        let recorder = self.recorder.clone();
        self.executor
            .execute(range, "log", sub_ranges, move |batch| {
                let rpc = rpc.clone();
                let buffer = buffer.clone();
                let recorder = recorder.clone();
                let timestamps = timestamps.clone();
                async move {
                    let requests = batch
                        .iter()
                        .map(|sub| logs_request(rpc.next_id(), sub))
                        .collect();
                    let results = rpc.batch_call(requests).await.map_err(WorkError::from)?;

                    let mut records = Vec::new();
                    for (sub, result) in batch.iter().zip(results) {
                        match result {
                            RpcCallResult::Result(value) => {
                                let raw: Vec<RawLog> =
                                    serde_json::from_value(value).map_err(|e| {
                                        WorkError::Fatal(format!(
                                            "logs for {sub} failed to parse: {e}"
                                        ))
                                    })?;
                                for log in raw {
                                    let number = log.block_number.to::<u64>();
                                    let timestamp = match timestamps.get(&number) {
                                        Some(ts) => *ts,
                                        None => {
                                            recorder.record(
                                                Some(number),
                                                "log",
                                                Level::Warn,
                                                "missing_block_timestamp",
                                                "log references a block outside the fetched set",
                                                json!({"block_number": number}),
                                            );
                                            0
                                        }
                                    };
                                    records.push(DomainRecord::Log(log.into_record(timestamp)));
                                }
                            }
                            RpcCallResult::Error { code, message } => {
                                return Err(WorkError::Fatal(format!(
                                    "eth_getLogs for {sub} rejected ({code}): {message}"
                                )))
                            }
                            RpcCallResult::Null => {
                                return Err(WorkError::Retriable(format!(
                                    "null eth_getLogs result for {sub}"
                                )))
                            }
                        }
                    }
                    buffer.append_records(records);
                    Ok(())
                }
            })
            .await
            .map_err(|e| SchedulerError::Fetch(e.to_string()))?;

        tracing::info!(
            blocks = self.buffer.len(DomainKind::Block),
            transactions = self.buffer.len(DomainKind::Transaction),
            logs = self.buffer.len(DomainKind::Log),
            "base data fetched"
        );
        Ok(())
    }

    fn make_context(&self, range: BlockRange) -> JobContext {
        JobContext {
            range,
            buffer: self.buffer.clone(),
            rpc: self.rpc.clone(),
            debug_rpc: self.debug_rpc.clone(),
            executor: self.executor.clone(),
            debug_executor: self.debug_executor.clone(),
            recorder: self.recorder.clone(),
            token_types: self.token_types.clone(),
        }
    }

    /// Processing phase: run waves in order, all jobs of a wave
    /// concurrently, full barrier between waves. A failing job is isolated:
    /// its exception is recorded and its outputs withheld, while siblings
    /// and independent jobs proceed. Returns the failed job names.
    async fn run_waves(&self, range: BlockRange) -> Vec<String> {
        let mut failed = Vec::new();
        for (wave_idx, wave) in self.graph.waves().iter().enumerate() {
            let mut tasks: JoinSet<(usize, Result<(), JobError>)> = JoinSet::new();
            for &job_idx in wave {
                let job = self.jobs[job_idx].clone();
                let ctx = self.make_context(range);
                tasks.spawn(async move {
                    let result = match job.collect(&ctx).await {
                        Ok(()) => job.process(&ctx).await,
                        Err(e) => Err(e),
                    };
                    (job_idx, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(()))) => {}
                    Ok((job_idx, Err(e))) => {
                        let job = &self.jobs[job_idx];
                        self.recorder.record(
                            Some(range.start_block),
                            job.name(),
                            Level::Error,
                            "job_failed",
                            &e.to_string(),
                            json!({
                                "wave": wave_idx,
                                "start_block": range.start_block,
                                "end_block": range.end_block,
                            }),
                        );
                        for kind in job.output_types() {
                            self.buffer.take(*kind);
                        }
                        failed.push(job.name().to_string());
                    }
                    Err(join_err) => {
                        self.recorder.record(
                            Some(range.start_block),
                            "scheduler",
                            Level::Error,
                            "job_panicked",
                            &join_err.to_string(),
                            json!({"wave": wave_idx}),
                        );
                    }
                }
            }
        }
        failed
    }

    fn mark_reorg_outputs(&self, range: BlockRange) {
        for job in &self.jobs {
            if !job.able_to_reorg() {
                continue;
            }
            for kind in job.output_types() {
                self.buffer
                    .mark_reorg(*kind, range.start_block, range.end_block);
            }
        }
    }

    /// Exporting phase: gather the configured kinds, sort by the canonical
    /// key (batch completion order is non-deterministic) and hand the batch
    /// to every sink.
    async fn export(&self) -> Result<usize, ExportError> {
        let mut records = Vec::new();
        for kind in &self.required_output_types {
            records.extend(self.buffer.snapshot(*kind));
        }
        sort_records(&mut records);
        let results =
            futures::future::join_all(self.exporters.iter().map(|sink| sink.export(&records)))
                .await;
        for result in results {
            result?;
        }
        Ok(records.len())
    }
}
