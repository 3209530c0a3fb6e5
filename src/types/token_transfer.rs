use alloy::primitives::{Address, B256, U256};
use serde::Serialize;

/// Closed set of transfer shapes the extractor can produce. Every consumer
/// matches exhaustively; adding a standard is a compile-visible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Erc20,
    Erc721,
    Erc1155Single,
    Erc1155Batch,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Erc20 => "ERC20",
            TransferKind::Erc721 => "ERC721",
            TransferKind::Erc1155Single => "ERC1155_SINGLE",
            TransferKind::Erc1155Batch => "ERC1155_BATCH",
        }
    }
}

/// A single token movement decoded from a transfer log. An ERC1155
/// `TransferBatch` log fans out to one record per `(id, value)` pair;
/// `batch_index` preserves the in-log order as the sort tie-break.
#[derive(Debug, Clone, Serialize)]
pub struct TokenTransfer {
    pub kind: TransferKind,
    pub token_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    pub token_id: Option<U256>,
    pub value: U256,
    pub batch_index: Option<u32>,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub block_timestamp: u64,
    pub reorg: bool,
}
