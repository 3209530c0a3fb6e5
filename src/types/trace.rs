use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

/// A single call-tree node after reconstruction (delegatecall promotion and
/// pruning already applied). `trace_id` is the upsert identity:
/// `{transaction_hash}` for the root call, `{transaction_hash}-{path}` below it.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub trace_id: String,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub output: Bytes,
    pub trace_type: String,
    pub call_type: Option<String>,
    /// Caller context inherited from a promoted delegatecall child.
    pub delegate_address: Option<Address>,
    pub gas: u64,
    pub gas_used: u64,
    pub subtraces: u32,
    pub trace_address: Vec<u32>,
    pub error: Option<String>,
    pub status: u32,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub transaction_index: u32,
    pub transaction_hash: B256,
    pub reorg: bool,
}

impl Trace {
    pub fn make_trace_id(transaction_hash: &B256, path: &[u32]) -> String {
        if path.is_empty() {
            format!("{transaction_hash}")
        } else {
            let joined: Vec<String> = path.iter().map(|i| i.to_string()).collect();
            format!("{}-{}", transaction_hash, joined.join("-"))
        }
    }
}

/// A value-bearing or contract-creating trace, surfaced as an internal
/// transaction record. Shares its identity with the originating trace.
#[derive(Debug, Clone, Serialize)]
pub struct InternalTransaction {
    pub trace_id: String,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub value: U256,
    pub trace_type: String,
    pub call_type: Option<String>,
    pub gas: u64,
    pub gas_used: u64,
    pub trace_address: Vec<u32>,
    pub error: Option<String>,
    pub status: u32,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub transaction_index: u32,
    pub transaction_hash: B256,
    pub reorg: bool,
}

impl InternalTransaction {
    pub fn from_trace(trace: &Trace) -> Self {
        Self {
            trace_id: trace.trace_id.clone(),
            from_address: trace.from_address,
            to_address: trace.to_address,
            value: trace.value,
            trace_type: trace.trace_type.clone(),
            call_type: trace.call_type.clone(),
            gas: trace.gas,
            gas_used: trace.gas_used,
            trace_address: trace.trace_address.clone(),
            error: trace.error.clone(),
            status: trace.status,
            block_number: trace.block_number,
            block_hash: trace.block_hash,
            block_timestamp: trace.block_timestamp,
            transaction_index: trace.transaction_index,
            transaction_hash: trace.transaction_hash,
            reorg: false,
        }
    }
}
