//! JSON-RPC request generators for the base-data fetch methods.

use serde_json::json;

use crate::types::BlockRange;

use super::envelope::JsonRpcRequest;

pub fn format_block_number(number: u64) -> String {
    format!("0x{number:x}")
}

pub fn block_number_request(id: u64) -> JsonRpcRequest {
    JsonRpcRequest::new(id, "eth_blockNumber", json!([]))
}

pub fn block_by_number_request(id: u64, number: u64, full_transactions: bool) -> JsonRpcRequest {
    JsonRpcRequest::new(
        id,
        "eth_getBlockByNumber",
        json!([format_block_number(number), full_transactions]),
    )
}

pub fn logs_request(id: u64, range: &BlockRange) -> JsonRpcRequest {
    JsonRpcRequest::new(
        id,
        "eth_getLogs",
        json!([{
            "fromBlock": format_block_number(range.start_block),
            "toBlock": format_block_number(range.end_block),
        }]),
    )
}

pub fn debug_trace_block_request(id: u64, method: &str, number: u64) -> JsonRpcRequest {
    JsonRpcRequest::new(id, method, json!([format_block_number(number)]))
}
