use alloy::primitives::{Address, Bytes, B256};
use serde::Serialize;

/// A raw event log emitted by a contract.
#[derive(Debug, Clone, Serialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub transaction_index: u32,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub reorg: bool,
}

impl Log {
    /// topic0 (the event signature hash), if the log has any topics.
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}
