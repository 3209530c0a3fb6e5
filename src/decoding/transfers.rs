//! Token-transfer extraction from raw logs.
//!
//! Pure transforms: a log either yields zero or more typed transfer records
//! or an explicit decode error for the caller to record. ERC20 and ERC721
//! share the `Transfer` topic0 and are told apart by topic count (four
//! topics means an indexed tokenId); the per-cycle token-type cache settles
//! the three-topic case for contracts whose standard is already known.

use std::collections::HashMap;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{b256, Address, B256, U256};
use thiserror::Error;

use crate::types::log::Log;
use crate::types::token_transfer::{TokenTransfer, TransferKind};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// keccak256("TransferSingle(address,address,address,uint256,uint256)")
pub const TRANSFER_SINGLE_TOPIC: B256 =
    b256!("c3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62");

/// keccak256("TransferBatch(address,address,address,uint256[],uint256[])")
pub const TRANSFER_BATCH_TOPIC: B256 =
    b256!("4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb");

#[derive(Debug, Error)]
pub enum TransferDecodeError {
    #[error("transfer data too short: {got} bytes, need {need}")]
    DataTooShort { got: usize, need: usize },

    #[error("erc1155 batch decode failed: {0}")]
    BatchDecode(String),

    #[error("erc1155 batch ids/values length mismatch: {ids} vs {values}")]
    LengthMismatch { ids: usize, values: usize },
}

/// Per-cycle snapshot of already-classified token contracts, passed by
/// reference into extraction. Populated once per cycle (typically from the
/// sink's token table); never a process-wide singleton.
#[derive(Debug, Default)]
pub struct TokenTypeCache {
    known: HashMap<Address, TransferKind>,
}

impl TokenTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Address, TransferKind)>) -> Self {
        Self {
            known: entries.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, address: Address, kind: TransferKind) {
        self.known.insert(address, kind);
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Resolve the kind for a three-topic `Transfer` log: a known contract
    /// keeps its recorded standard, an unknown one keeps the provisional
    /// topic-shape classification.
    pub fn resolve(&self, address: Address, provisional: TransferKind) -> TransferKind {
        match self.known.get(&address) {
            Some(TransferKind::Erc20) => TransferKind::Erc20,
            Some(TransferKind::Erc721) => TransferKind::Erc721,
            _ => provisional,
        }
    }
}

fn address_from_topic(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

fn word_at(data: &[u8], offset: usize) -> Result<U256, TransferDecodeError> {
    let end = offset + 32;
    if data.len() < end {
        return Err(TransferDecodeError::DataTooShort {
            got: data.len(),
            need: end,
        });
    }
    Ok(U256::from_be_slice(&data[offset..end]))
}

/// Extract zero, one or many typed transfers from a log. Non-transfer logs
/// yield an empty vector; malformed transfer logs yield an error for the
/// caller to record.
pub fn extract_transfers_from_log(
    log: &Log,
    cache: &TokenTypeCache,
) -> Result<Vec<TokenTransfer>, TransferDecodeError> {
    let Some(topic0) = log.topic0() else {
        return Ok(Vec::new());
    };

    if topic0 == TRANSFER_TOPIC {
        extract_erc20_or_erc721(log, cache)
    } else if topic0 == TRANSFER_SINGLE_TOPIC {
        extract_erc1155_single(log)
    } else if topic0 == TRANSFER_BATCH_TOPIC {
        extract_erc1155_batch(log)
    } else {
        Ok(Vec::new())
    }
}

fn base_transfer(log: &Log, kind: TransferKind, from: Address, to: Address) -> TokenTransfer {
    TokenTransfer {
        kind,
        token_address: log.address,
        from_address: from,
        to_address: to,
        token_id: None,
        value: U256::ZERO,
        batch_index: None,
        log_index: log.log_index,
        transaction_hash: log.transaction_hash,
        block_number: log.block_number,
        block_hash: log.block_hash,
        block_timestamp: log.block_timestamp,
        reorg: false,
    }
}

fn extract_erc20_or_erc721(
    log: &Log,
    cache: &TokenTypeCache,
) -> Result<Vec<TokenTransfer>, TransferDecodeError> {
    match log.topics.len() {
        // tokenId indexed as the fourth topic: ERC721 by construction.
        4 => {
            let mut transfer = base_transfer(
                log,
                TransferKind::Erc721,
                address_from_topic(&log.topics[1]),
                address_from_topic(&log.topics[2]),
            );
            transfer.token_id = Some(U256::from_be_slice(log.topics[3].as_slice()));
            transfer.value = U256::from(1);
            Ok(vec![transfer])
        }
        // Value (or an unindexed tokenId) in the data section.
        3 => {
            let kind = cache.resolve(log.address, TransferKind::Erc20);
            let word = word_at(&log.data, 0)?;
            let mut transfer = base_transfer(
                log,
                kind,
                address_from_topic(&log.topics[1]),
                address_from_topic(&log.topics[2]),
            );
            match kind {
                TransferKind::Erc721 => {
                    transfer.token_id = Some(word);
                    transfer.value = U256::from(1);
                }
                _ => transfer.value = word,
            }
            Ok(vec![transfer])
        }
        // Unindexed variants are not standard transfer shapes; skip.
        _ => Ok(Vec::new()),
    }
}

fn extract_erc1155_single(log: &Log) -> Result<Vec<TokenTransfer>, TransferDecodeError> {
    if log.topics.len() != 4 {
        return Ok(Vec::new());
    }
    let id = word_at(&log.data, 0)?;
    let value = word_at(&log.data, 32)?;
    let mut transfer = base_transfer(
        log,
        TransferKind::Erc1155Single,
        address_from_topic(&log.topics[2]),
        address_from_topic(&log.topics[3]),
    );
    transfer.token_id = Some(id);
    transfer.value = value;
    Ok(vec![transfer])
}

fn extract_erc1155_batch(log: &Log) -> Result<Vec<TokenTransfer>, TransferDecodeError> {
    if log.topics.len() != 4 {
        return Ok(Vec::new());
    }

    let batch_type = DynSolType::Tuple(vec![
        DynSolType::Array(Box::new(DynSolType::Uint(256))),
        DynSolType::Array(Box::new(DynSolType::Uint(256))),
    ]);
    let decoded = batch_type
        .abi_decode_params(&log.data)
        .map_err(|e| TransferDecodeError::BatchDecode(e.to_string()))?;

    let mut parts = match decoded {
        DynSolValue::Tuple(parts) => parts.into_iter(),
        other => {
            return Err(TransferDecodeError::BatchDecode(format!(
                "unexpected batch shape: {other:?}"
            )))
        }
    };
    let (ids, values) = match (parts.next(), parts.next(), parts.next()) {
        (Some(ids), Some(values), None) => (uint_array(ids)?, uint_array(values)?),
        _ => {
            return Err(TransferDecodeError::BatchDecode(
                "expected exactly two arrays".to_string(),
            ))
        }
    };

    if ids.len() != values.len() {
        return Err(TransferDecodeError::LengthMismatch {
            ids: ids.len(),
            values: values.len(),
        });
    }

    let from = address_from_topic(&log.topics[2]);
    let to = address_from_topic(&log.topics[3]);

    // One record per (id, value) pair, in-log order preserved as the
    // tie-break for otherwise identical sort keys.
    Ok(ids
        .into_iter()
        .zip(values)
        .enumerate()
        .map(|(index, (id, value))| {
            let mut transfer = base_transfer(log, TransferKind::Erc1155Batch, from, to);
            transfer.token_id = Some(id);
            transfer.value = value;
            transfer.batch_index = Some(index as u32);
            transfer
        })
        .collect())
}

fn uint_array(value: DynSolValue) -> Result<Vec<U256>, TransferDecodeError> {
    match value {
        DynSolValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                DynSolValue::Uint(v, _) => Ok(v),
                other => Err(TransferDecodeError::BatchDecode(format!(
                    "expected uint256 element, got {other:?}"
                ))),
            })
            .collect(),
        other => Err(TransferDecodeError::BatchDecode(format!(
            "expected uint256[], got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    fn topic_address(addr: Address) -> B256 {
        B256::left_padding_from(addr.as_slice())
    }

    fn log_with(address: Address, topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            address,
            topics,
            data: Bytes::from(data),
            log_index: 9,
            transaction_hash: B256::repeat_byte(0xcc),
            transaction_index: 2,
            block_number: 100,
            block_hash: B256::repeat_byte(0xbb),
            block_timestamp: 1_700_000_000,
            reorg: false,
        }
    }

    fn encode_batch(ids: &[u64], values: &[u64]) -> Vec<u8> {
        let mut data = Vec::new();
        // Two dynamic array head slots, then both tails.
        data.extend_from_slice(B256::from(U256::from(64u64)).as_slice());
        let second_offset = 64 + 32 + 32 * ids.len();
        data.extend_from_slice(B256::from(U256::from(second_offset as u64)).as_slice());
        data.extend_from_slice(B256::from(U256::from(ids.len() as u64)).as_slice());
        for id in ids {
            data.extend_from_slice(B256::from(U256::from(*id)).as_slice());
        }
        data.extend_from_slice(B256::from(U256::from(values.len() as u64)).as_slice());
        for value in values {
            data.extend_from_slice(B256::from(U256::from(*value)).as_slice());
        }
        data
    }

    #[test]
    fn erc20_transfer_from_three_topics() {
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![TRANSFER_TOPIC, topic_address(from), topic_address(to)],
            B256::from(U256::from(5000u64)).to_vec(),
        );
        let transfers = extract_transfers_from_log(&log, &TokenTypeCache::new()).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].kind, TransferKind::Erc20);
        assert_eq!(transfers[0].value, U256::from(5000u64));
        assert_eq!(transfers[0].token_id, None);
        assert_eq!(transfers[0].from_address, from);
    }

    #[test]
    fn erc721_transfer_from_four_topics() {
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![
                TRANSFER_TOPIC,
                topic_address(Address::repeat_byte(0x11)),
                topic_address(Address::repeat_byte(0x22)),
                B256::from(U256::from(77u64)),
            ],
            Vec::new(),
        );
        let transfers = extract_transfers_from_log(&log, &TokenTypeCache::new()).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].kind, TransferKind::Erc721);
        assert_eq!(transfers[0].token_id, Some(U256::from(77u64)));
        assert_eq!(transfers[0].value, U256::from(1u64));
    }

    #[test]
    fn cache_reclassifies_known_erc721_with_unindexed_token_id() {
        let token = Address::repeat_byte(0x42);
        let cache = TokenTypeCache::from_entries([(token, TransferKind::Erc721)]);
        let log = log_with(
            token,
            vec![
                TRANSFER_TOPIC,
                topic_address(Address::repeat_byte(0x11)),
                topic_address(Address::repeat_byte(0x22)),
            ],
            B256::from(U256::from(12u64)).to_vec(),
        );
        let transfers = extract_transfers_from_log(&log, &cache).unwrap();
        assert_eq!(transfers[0].kind, TransferKind::Erc721);
        assert_eq!(transfers[0].token_id, Some(U256::from(12u64)));
        assert_eq!(transfers[0].value, U256::from(1u64));
    }

    #[test]
    fn erc1155_single_transfer() {
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![
                TRANSFER_SINGLE_TOPIC,
                topic_address(Address::repeat_byte(0x01)),
                topic_address(Address::repeat_byte(0x11)),
                topic_address(Address::repeat_byte(0x22)),
            ],
            [
                B256::from(U256::from(3u64)).to_vec(),
                B256::from(U256::from(40u64)).to_vec(),
            ]
            .concat(),
        );
        let transfers = extract_transfers_from_log(&log, &TokenTypeCache::new()).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].kind, TransferKind::Erc1155Single);
        assert_eq!(transfers[0].token_id, Some(U256::from(3u64)));
        assert_eq!(transfers[0].value, U256::from(40u64));
    }

    #[test]
    fn erc1155_batch_fans_out_preserving_pair_order() {
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![
                TRANSFER_BATCH_TOPIC,
                topic_address(Address::repeat_byte(0x01)),
                topic_address(Address::repeat_byte(0x11)),
                topic_address(Address::repeat_byte(0x22)),
            ],
            encode_batch(&[1, 2], &[10, 20]),
        );
        let transfers = extract_transfers_from_log(&log, &TokenTypeCache::new()).unwrap();
        assert_eq!(transfers.len(), 2);

        assert_eq!(transfers[0].token_id, Some(U256::from(1u64)));
        assert_eq!(transfers[0].value, U256::from(10u64));
        assert_eq!(transfers[0].batch_index, Some(0));

        assert_eq!(transfers[1].token_id, Some(U256::from(2u64)));
        assert_eq!(transfers[1].value, U256::from(20u64));
        assert_eq!(transfers[1].batch_index, Some(1));

        for transfer in &transfers {
            assert_eq!(transfer.transaction_hash, log.transaction_hash);
            assert_eq!(transfer.log_index, log.log_index);
            assert_eq!(transfer.block_number, log.block_number);
        }
    }

    #[test]
    fn erc1155_batch_length_mismatch_is_an_error() {
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![
                TRANSFER_BATCH_TOPIC,
                topic_address(Address::repeat_byte(0x01)),
                topic_address(Address::repeat_byte(0x11)),
                topic_address(Address::repeat_byte(0x22)),
            ],
            encode_batch(&[1, 2, 3], &[10]),
        );
        assert!(matches!(
            extract_transfers_from_log(&log, &TokenTypeCache::new()),
            Err(TransferDecodeError::LengthMismatch { ids: 3, values: 1 })
        ));
    }

    #[test]
    fn short_erc20_data_is_an_error() {
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![
                TRANSFER_TOPIC,
                topic_address(Address::ZERO),
                topic_address(Address::ZERO),
            ],
            vec![0x01],
        );
        assert!(extract_transfers_from_log(&log, &TokenTypeCache::new()).is_err());
    }

    #[test]
    fn unrelated_logs_yield_nothing() {
        let log = log_with(
            Address::repeat_byte(0x42),
            vec![B256::repeat_byte(0x99)],
            Vec::new(),
        );
        assert!(extract_transfers_from_log(&log, &TokenTypeCache::new())
            .unwrap()
            .is_empty());
    }
}
