use std::str::FromStr;

use alloy::primitives::B256;
use serde::Serialize;

use super::block::{Block, Transaction};
use super::decoded::{DecodedCall, DecodedEvent};
use super::log::Log;
use super::token_transfer::{TokenTransfer, TransferKind};
use super::trace::{InternalTransaction, Trace};

/// Tag identifying one domain record family. Keys the typed buffer and the
/// job dependency/output declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    Block,
    Transaction,
    Log,
    Trace,
    Erc20TokenTransfer,
    Erc721TokenTransfer,
    Erc1155TokenTransfer,
    DecodedEvent,
    DecodedCall,
    InternalTransaction,
}

impl DomainKind {
    pub const ALL: [DomainKind; 10] = [
        DomainKind::Block,
        DomainKind::Transaction,
        DomainKind::Log,
        DomainKind::Trace,
        DomainKind::Erc20TokenTransfer,
        DomainKind::Erc721TokenTransfer,
        DomainKind::Erc1155TokenTransfer,
        DomainKind::DecodedEvent,
        DomainKind::DecodedCall,
        DomainKind::InternalTransaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainKind::Block => "block",
            DomainKind::Transaction => "transaction",
            DomainKind::Log => "log",
            DomainKind::Trace => "trace",
            DomainKind::Erc20TokenTransfer => "erc20_token_transfer",
            DomainKind::Erc721TokenTransfer => "erc721_token_transfer",
            DomainKind::Erc1155TokenTransfer => "erc1155_token_transfer",
            DomainKind::DecodedEvent => "decoded_event",
            DomainKind::DecodedCall => "decoded_call",
            DomainKind::InternalTransaction => "internal_transaction",
        }
    }
}

impl FromStr for DomainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown domain kind '{s}'"))
    }
}

impl std::fmt::Display for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed family of records the pipeline produces. Created only by the
/// extraction layer; mutated only by the reorg path (`set_reorg`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum DomainRecord {
    Block(Block),
    Transaction(Transaction),
    Log(Log),
    Trace(Trace),
    TokenTransfer(TokenTransfer),
    DecodedEvent(DecodedEvent),
    DecodedCall(DecodedCall),
    InternalTransaction(InternalTransaction),
}

impl DomainRecord {
    pub fn kind(&self) -> DomainKind {
        match self {
            DomainRecord::Block(_) => DomainKind::Block,
            DomainRecord::Transaction(_) => DomainKind::Transaction,
            DomainRecord::Log(_) => DomainKind::Log,
            DomainRecord::Trace(_) => DomainKind::Trace,
            DomainRecord::TokenTransfer(t) => match t.kind {
                TransferKind::Erc20 => DomainKind::Erc20TokenTransfer,
                TransferKind::Erc721 => DomainKind::Erc721TokenTransfer,
                TransferKind::Erc1155Single | TransferKind::Erc1155Batch => {
                    DomainKind::Erc1155TokenTransfer
                }
            },
            DomainRecord::DecodedEvent(_) => DomainKind::DecodedEvent,
            DomainRecord::DecodedCall(_) => DomainKind::DecodedCall,
            DomainRecord::InternalTransaction(_) => DomainKind::InternalTransaction,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            DomainRecord::Block(b) => b.number,
            DomainRecord::Transaction(t) => t.block_number,
            DomainRecord::Log(l) => l.block_number,
            DomainRecord::Trace(t) => t.block_number,
            DomainRecord::TokenTransfer(t) => t.block_number,
            DomainRecord::DecodedEvent(e) => e.block_number,
            DomainRecord::DecodedCall(c) => c.block_number,
            DomainRecord::InternalTransaction(t) => t.block_number,
        }
    }

    /// Identity sufficient for idempotent upsert at the export sink.
    pub fn identity(&self) -> String {
        match self {
            DomainRecord::Block(b) => format!("block:{}", b.hash),
            DomainRecord::Transaction(t) => format!("transaction:{}", t.hash),
            DomainRecord::Log(l) => {
                format!("log:{}:{}:{}", l.transaction_hash, l.block_hash, l.log_index)
            }
            DomainRecord::Trace(t) => format!("trace:{}", t.trace_id),
            DomainRecord::TokenTransfer(t) => {
                let token_id = t
                    .token_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{}:{}:{}:{}:{}",
                    self.kind(),
                    t.transaction_hash,
                    t.block_hash,
                    t.log_index,
                    token_id
                )
            }
            DomainRecord::DecodedEvent(e) => format!(
                "decoded_event:{}:{}:{}",
                e.transaction_hash, e.block_hash, e.log_index
            ),
            DomainRecord::DecodedCall(c) => {
                format!("decoded_call:{}:{}", c.transaction_hash, c.block_hash)
            }
            DomainRecord::InternalTransaction(t) => {
                format!("internal_transaction:{}", t.trace_id)
            }
        }
    }

    /// Canonical export ordering key: `(block_number, transaction_hash,
    /// log_index, tie_break)`. Concurrent batch completion gives the buffer
    /// no inherent order, so every export path sorts by this key first.
    pub fn sort_key(&self) -> (u64, B256, u64, String) {
        match self {
            DomainRecord::Block(b) => (b.number, B256::ZERO, 0, String::new()),
            DomainRecord::Transaction(t) => {
                (t.block_number, t.hash, t.transaction_index as u64, String::new())
            }
            DomainRecord::Log(l) => {
                (l.block_number, l.transaction_hash, l.log_index, String::new())
            }
            DomainRecord::Trace(t) => (
                t.block_number,
                t.transaction_hash,
                t.transaction_index as u64,
                t.trace_id.clone(),
            ),
            DomainRecord::TokenTransfer(t) => (
                t.block_number,
                t.transaction_hash,
                t.log_index,
                format!("{:010}", t.batch_index.unwrap_or(0)),
            ),
            DomainRecord::DecodedEvent(e) => {
                (e.block_number, e.transaction_hash, e.log_index, String::new())
            }
            DomainRecord::DecodedCall(c) => (
                c.block_number,
                c.transaction_hash,
                c.transaction_index as u64,
                String::new(),
            ),
            DomainRecord::InternalTransaction(t) => (
                t.block_number,
                t.transaction_hash,
                t.transaction_index as u64,
                t.trace_id.clone(),
            ),
        }
    }

    pub fn reorg(&self) -> bool {
        match self {
            DomainRecord::Block(b) => b.reorg,
            DomainRecord::Transaction(t) => t.reorg,
            DomainRecord::Log(l) => l.reorg,
            DomainRecord::Trace(t) => t.reorg,
            DomainRecord::TokenTransfer(t) => t.reorg,
            DomainRecord::DecodedEvent(e) => e.reorg,
            DomainRecord::DecodedCall(c) => c.reorg,
            DomainRecord::InternalTransaction(t) => t.reorg,
        }
    }

    pub fn set_reorg(&mut self, reorg: bool) {
        match self {
            DomainRecord::Block(b) => b.reorg = reorg,
            DomainRecord::Transaction(t) => t.reorg = reorg,
            DomainRecord::Log(l) => l.reorg = reorg,
            DomainRecord::Trace(t) => t.reorg = reorg,
            DomainRecord::TokenTransfer(t) => t.reorg = reorg,
            DomainRecord::DecodedEvent(e) => e.reorg = reorg,
            DomainRecord::DecodedCall(c) => c.reorg = reorg,
            DomainRecord::InternalTransaction(t) => t.reorg = reorg,
        }
    }
}

/// Sort records by the canonical export key.
pub fn sort_records(records: &mut [DomainRecord]) {
    records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}
