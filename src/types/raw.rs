//! Wire-shape structs for raw JSON-RPC results and their conversion into
//! domain records. Quantities arrive as `0x`-hex strings.

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::Deserialize;

use super::block::{Block, Transaction};
use super::log::Log;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: B256,
    pub transaction_index: U64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    pub block_number: U64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub log_index: U64,
}

/// One flat call-tree entry as returned by the debug trace endpoint.
/// `trace_address` is the brace-wrapped path string (`"{}"` for the root,
/// `"{0,2}"` for the third child of the first child).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrace {
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub from: Option<Address>,
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub output: Bytes,
    pub trace_type: String,
    pub call_type: Option<String>,
    #[serde(default)]
    pub gas: U64,
    #[serde(default)]
    pub gas_used: U64,
    #[serde(default)]
    pub subtraces: U64,
    pub trace_address: String,
    pub error: Option<String>,
    #[serde(default = "default_status")]
    pub status: u32,
}

fn default_status() -> u32 {
    1
}

impl RawBlock {
    /// Split into the block header record and its transactions, propagating
    /// block context onto each transaction.
    pub fn into_records(self) -> (Block, Vec<Transaction>) {
        let number = self.number.to::<u64>();
        let timestamp = self.timestamp.to::<u64>();
        let transactions: Vec<Transaction> = self
            .transactions
            .into_iter()
            .map(|tx| Transaction {
                hash: tx.hash,
                transaction_index: tx.transaction_index.to::<u64>() as u32,
                from_address: tx.from,
                to_address: tx.to,
                value: tx.value,
                input: tx.input,
                block_number: number,
                block_hash: self.hash,
                block_timestamp: timestamp,
                reorg: false,
            })
            .collect();
        let block = Block {
            number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp,
            transaction_count: transactions.len() as u32,
            reorg: false,
        };
        (block, transactions)
    }
}

impl RawLog {
    /// `block_timestamp` comes from the already-fetched block headers;
    /// `eth_getLogs` results do not carry it.
    pub fn into_record(self, block_timestamp: u64) -> Log {
        Log {
            address: self.address,
            topics: self.topics,
            data: self.data,
            log_index: self.log_index.to::<u64>(),
            transaction_hash: self.transaction_hash,
            transaction_index: self.transaction_index.to::<u64>() as u32,
            block_number: self.block_number.to::<u64>(),
            block_hash: self.block_hash,
            block_timestamp,
            reorg: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_with_transactions() {
        let json = serde_json::json!({
            "number": "0x10",
            "hash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "parentHash": "0x00000000000000000000000000000000000000000000000000000000000000ab",
            "timestamp": "0x64",
            "transactions": [{
                "hash": "0x00000000000000000000000000000000000000000000000000000000000000cc",
                "transactionIndex": "0x0",
                "from": "0x1111111111111111111111111111111111111111",
                "to": null,
                "value": "0xde0b6b3a7640000",
                "input": "0x6001"
            }]
        });
        let raw: RawBlock = serde_json::from_value(json).unwrap();
        let (block, txs) = raw.into_records();
        assert_eq!(block.number, 16);
        assert_eq!(block.timestamp, 100);
        assert_eq!(block.transaction_count, 1);
        assert_eq!(txs.len(), 1);
        assert!(txs[0].to_address.is_none());
        assert_eq!(txs[0].block_number, 16);
        assert_eq!(txs[0].block_timestamp, 100);
    }

    #[test]
    fn parses_log_and_inherits_timestamp() {
        let json = serde_json::json!({
            "address": "0x2222222222222222222222222222222222222222",
            "topics": ["0x00000000000000000000000000000000000000000000000000000000000000dd"],
            "data": "0x",
            "blockNumber": "0x20",
            "blockHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000cc",
            "transactionIndex": "0x1",
            "logIndex": "0x5"
        });
        let raw: RawLog = serde_json::from_value(json).unwrap();
        let log = raw.into_record(777);
        assert_eq!(log.block_number, 32);
        assert_eq!(log.log_index, 5);
        assert_eq!(log.block_timestamp, 777);
    }

    #[test]
    fn parses_trace_with_defaults() {
        let json = serde_json::json!({
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000cc",
            "transactionIndex": "0x0",
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0x2222222222222222222222222222222222222222",
            "value": "0x0",
            "traceType": "call",
            "callType": "delegatecall",
            "traceAddress": "{0,2}"
        });
        let raw: RawTrace = serde_json::from_value(json).unwrap();
        assert_eq!(raw.trace_address, "{0,2}");
        assert_eq!(raw.call_type.as_deref(), Some("delegatecall"));
        assert_eq!(raw.status, 1);
    }
}
