use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

/// A canonical-chain block header, as indexed.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub transaction_count: u32,
    pub reorg: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub hash: B256,
    pub transaction_index: u32,
    pub from_address: Address,
    pub to_address: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub reorg: bool,
}
