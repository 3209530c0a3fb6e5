//! Trace collection job: fetches the call tree for each block over the
//! debug endpoint, reconstructs and normalizes it (delegatecall promotion
//! and pruning), and emits flat `Trace` records.

use std::collections::HashMap;

use alloy::primitives::B256;
use async_trait::async_trait;
use serde_json::json;

use crate::decoding::trace_tree::process_transaction_traces;
use crate::executor::WorkError;
use crate::recorder::Level;
use crate::rpc::requests::debug_trace_block_request;
use crate::rpc::RpcCallResult;
use crate::types::raw::RawTrace;
use crate::types::{DomainKind, DomainRecord};

use super::{Job, JobContext, JobError};

const DEFAULT_TRACE_METHOD: &str = "debug_traceBlockByNumber";

pub struct TraceJob {
    method: String,
}

const DEPS: [DomainKind; 1] = [DomainKind::Block];
const OUTPUTS: [DomainKind; 1] = [DomainKind::Trace];

impl TraceJob {
    pub fn new(options: &serde_json::Value) -> Result<Self, JobError> {
        let method = match options.get("method") {
            None => DEFAULT_TRACE_METHOD.to_string(),
            Some(value) => value
                .as_str()
                .ok_or_else(|| JobError::Options("'method' must be a string".to_string()))?
                .to_string(),
        };
        Ok(Self { method })
    }
}

#[async_trait]
impl Job for TraceJob {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn dependency_types(&self) -> &[DomainKind] {
        &DEPS
    }

    fn output_types(&self) -> &[DomainKind] {
        &OUTPUTS
    }

    fn able_to_reorg(&self) -> bool {
        true
    }

    async fn collect(&self, ctx: &JobContext) -> Result<(), JobError> {
        // (number, hash, timestamp) per fetched block.
        let blocks: Vec<(u64, B256, u64)> = ctx
            .buffer
            .snapshot(DomainKind::Block)
            .into_iter()
            .filter_map(|record| match record {
                DomainRecord::Block(b) => Some((b.number, b.hash, b.timestamp)),
                _ => None,
            })
            .collect();

        let debug_rpc = ctx.debug_rpc.clone();
        let buffer = ctx.buffer.clone();
        let recorder = ctx.recorder.clone();
        let method = self.method.clone();

        ctx.debug_executor
            .execute(ctx.range, self.name(), blocks, move |batch| {
                let debug_rpc = debug_rpc.clone();
                let buffer = buffer.clone();
                let recorder = recorder.clone();
                let method = method.clone();
                async move {
                    let requests = batch
                        .iter()
                        .map(|(number, _, _)| {
                            debug_trace_block_request(debug_rpc.next_id(), &method, *number)
                        })
                        .collect();
                    let results = debug_rpc.batch_call(requests).await.map_err(WorkError::from)?;

                    let mut records = Vec::new();
                    for ((number, block_hash, timestamp), result) in
                        batch.iter().zip(results)
                    {
                        match result {
                            RpcCallResult::Result(value) => {
                                let raw: Vec<RawTrace> = match serde_json::from_value(value) {
                                    Ok(raw) => raw,
                                    Err(e) => {
                                        recorder.record(
                                            Some(*number),
                                            "trace",
                                            Level::Error,
                                            "trace_parse_error",
                                            &e.to_string(),
                                            json!({"block_number": number}),
                                        );
                                        continue;
                                    }
                                };

                                let mut by_transaction: HashMap<B256, Vec<RawTrace>> =
                                    HashMap::new();
                                for trace in raw {
                                    by_transaction
                                        .entry(trace.transaction_hash)
                                        .or_default()
                                        .push(trace);
                                }

                                for (transaction_hash, traces) in by_transaction {
                                    match process_transaction_traces(
                                        traces,
                                        *number,
                                        *block_hash,
                                        *timestamp,
                                    ) {
                                        Ok(traces) => records.extend(
                                            traces.into_iter().map(DomainRecord::Trace),
                                        ),
                                        Err(e) => recorder.record(
                                            Some(*number),
                                            "trace",
                                            Level::Warn,
                                            "trace_tree_error",
                                            &e.to_string(),
                                            json!({
                                                "transaction_hash": transaction_hash.to_string(),
                                            }),
                                        ),
                                    }
                                }
                            }
                            // An application-level rejection is isolated to
                            // this block; siblings in the batch proceed.
                            RpcCallResult::Error { code, message } => recorder.record(
                                Some(*number),
                                "trace",
                                Level::Error,
                                "trace_fetch_rejected",
                                &message,
                                json!({"code": code, "method": method.as_str()}),
                            ),
                            RpcCallResult::Null => {
                                return Err(WorkError::Retriable(format!(
                                    "null trace result for block {number}"
                                )))
                            }
                        }
                    }

                    buffer.append_records(records);
                    Ok(())
                }
            })
            .await?;

        Ok(())
    }

    async fn process(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.buffer.sort(DomainKind::Trace);
        Ok(())
    }
}
