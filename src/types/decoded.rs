use alloy::primitives::{Address, B256};
use serde::Serialize;

/// One named, JSON-safe decoded argument. Byte values are `0x`-hex strings,
/// tuples are ordered lists of nested params, arrays map element-wise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedParam {
    pub name: String,
    #[serde(rename = "type")]
    pub type_string: String,
    pub value: serde_json::Value,
}

/// Decoding outcome attached to a record. Failure degrades to an explicit
/// `Undecodable` value; it never aborts the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecodedData {
    Decoded { params: Vec<DecodedParam> },
    Undecodable { reason: String },
}

impl DecodedData {
    pub fn is_decoded(&self) -> bool {
        matches!(self, DecodedData::Decoded { .. })
    }
}

/// An event log decoded against a configured event signature.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedEvent {
    pub event_name: String,
    pub signature: String,
    pub address: Address,
    pub data: DecodedData,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub reorg: bool,
}

/// A transaction input decoded against a configured function signature.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedCall {
    pub function_name: String,
    pub signature: String,
    pub to_address: Address,
    pub input: DecodedData,
    pub transaction_hash: B256,
    pub transaction_index: u32,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub reorg: bool,
}
