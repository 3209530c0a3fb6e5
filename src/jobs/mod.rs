//! Job abstraction: named units that declare the domain types they read and
//! write, collected into a statically validated dependency graph.

pub mod filter;
pub mod graph;

mod call_decode;
mod internal_transactions;
mod log_decode;
mod token_transfers;
mod traces;

pub use call_decode::CallDecodeJob;
pub use internal_transactions::InternalTransactionJob;
pub use log_decode::LogDecodeJob;
pub use token_transfers::TokenTransferJob;
pub use traces::TraceJob;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::decoding::transfers::TokenTypeCache;
use crate::executor::{BatchWorkExecutor, ExecutorError};
use crate::recorder::ExceptionRecorder;
use crate::rpc::RpcClient;
use crate::types::buffer::DataBuffer;
use crate::types::log::Log;
use crate::types::{BlockRange, DomainKind, DomainRecord};

use filter::LogFilter;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("batch execution failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("invalid job options: {0}")]
    Options(String),

    #[error("{0}")]
    Fatal(String),
}

/// Everything a job may touch during one cycle. The buffer is the only
/// shared mutable state; jobs append their declared output kinds and read
/// their declared dependency kinds.
pub struct JobContext {
    pub range: BlockRange,
    pub buffer: Arc<DataBuffer>,
    pub rpc: Arc<RpcClient>,
    pub debug_rpc: Arc<RpcClient>,
    pub executor: Arc<BatchWorkExecutor>,
    pub debug_executor: Arc<BatchWorkExecutor>,
    pub recorder: Arc<dyn ExceptionRecorder>,
    pub token_types: Arc<TokenTypeCache>,
}

impl JobContext {
    /// Logs from the buffer, narrowed by the job's filter when present.
    pub fn logs(&self, filter: Option<&LogFilter>) -> Vec<Log> {
        self.buffer
            .snapshot(DomainKind::Log)
            .into_iter()
            .filter_map(|record| match record {
                DomainRecord::Log(log) => Some(log),
                _ => None,
            })
            .filter(|log| filter.map(|f| f.matches(log)).unwrap_or(true))
            .collect()
    }
}

/// Parse an optional list of hex addresses out of a job's user-defined
/// options. Absent key (or null options) means an empty allow-list.
pub(crate) fn parse_address_list(
    options: &serde_json::Value,
    key: &str,
) -> Result<Vec<alloy::primitives::Address>, JobError> {
    let Some(values) = options.get(key) else {
        return Ok(Vec::new());
    };
    let entries = values
        .as_array()
        .ok_or_else(|| JobError::Options(format!("'{key}' must be an array of addresses")))?;
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .ok_or_else(|| JobError::Options(format!("'{key}' entries must be strings")))?
                .parse::<alloy::primitives::Address>()
                .map_err(|e| JobError::Options(format!("bad address in '{key}': {e}")))
        })
        .collect()
}

/// Parse an optional list of strings out of a job's user-defined options.
pub(crate) fn parse_string_list(
    options: &serde_json::Value,
    key: &str,
) -> Result<Vec<String>, JobError> {
    let Some(values) = options.get(key) else {
        return Ok(Vec::new());
    };
    let entries = values
        .as_array()
        .ok_or_else(|| JobError::Options(format!("'{key}' must be an array of strings")))?;
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| JobError::Options(format!("'{key}' entries must be strings")))
        })
        .collect()
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Domain types this job reads from the buffer.
    fn dependency_types(&self) -> &[DomainKind];

    /// Domain types this job writes. Each kind has exactly one producer in
    /// the graph.
    fn output_types(&self) -> &[DomainKind];

    /// Whether this job's outputs participate in reorg invalidation.
    fn able_to_reorg(&self) -> bool {
        false
    }

    /// Optional raw-event narrowing; `None` means accept all.
    fn filter(&self) -> Option<LogFilter> {
        None
    }

    /// Gather and decode: the expensive phase, run once per cycle.
    async fn collect(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Derive secondary values (splitting, sorting) without repeating the
    /// collect-phase decoding.
    async fn process(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Ok(())
    }
}
