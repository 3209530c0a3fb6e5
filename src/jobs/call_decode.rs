//! Decodes transaction inputs against configured function signatures into
//! `DecodedCall` records.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use crate::decoding::abi::decode_function_input;
use crate::decoding::signature::ParsedFunction;
use crate::recorder::Level;
use crate::types::decoded::{DecodedCall, DecodedData};
use crate::types::{DomainKind, DomainRecord};

use super::{parse_address_list, parse_string_list, Job, JobContext, JobError};

pub struct CallDecodeJob {
    contract_addresses: Vec<alloy::primitives::Address>,
    by_selector: HashMap<[u8; 4], ParsedFunction>,
}

const DEPS: [DomainKind; 1] = [DomainKind::Transaction];
const OUTPUTS: [DomainKind; 1] = [DomainKind::DecodedCall];

impl CallDecodeJob {
    pub fn new(options: &serde_json::Value) -> Result<Self, JobError> {
        let contract_addresses = parse_address_list(options, "contract_address")?;
        let signatures = parse_string_list(options, "function_signatures")?;

        let mut by_selector = HashMap::with_capacity(signatures.len());
        for sig in &signatures {
            let function = ParsedFunction::from_signature(sig)
                .map_err(|e| JobError::Options(format!("bad function signature '{sig}': {e}")))?;
            by_selector.insert(function.selector, function);
        }

        Ok(Self {
            contract_addresses,
            by_selector,
        })
    }

    pub fn function_count(&self) -> usize {
        self.by_selector.len()
    }
}

#[async_trait]
impl Job for CallDecodeJob {
    fn name(&self) -> &'static str {
        "call_decode"
    }

    fn dependency_types(&self) -> &[DomainKind] {
        &DEPS
    }

    fn output_types(&self) -> &[DomainKind] {
        &OUTPUTS
    }

    async fn collect(&self, ctx: &JobContext) -> Result<(), JobError> {
        let mut records = Vec::new();

        for record in ctx.buffer.snapshot(DomainKind::Transaction) {
            let DomainRecord::Transaction(tx) = record else {
                continue;
            };
            let Some(to) = tx.to_address else {
                continue;
            };
            if !self.contract_addresses.is_empty() && !self.contract_addresses.contains(&to) {
                continue;
            }
            if tx.input.len() < 4 {
                continue;
            }
            let mut selector = [0u8; 4];
            selector.copy_from_slice(&tx.input[..4]);
            let Some(function) = self.by_selector.get(&selector) else {
                continue;
            };

            let input = decode_function_input(function, &tx.input);
            if let DecodedData::Undecodable { reason } = &input {
                ctx.recorder.record(
                    Some(tx.block_number),
                    "decoded_call",
                    Level::Warn,
                    "call_decode_error",
                    reason,
                    json!({
                        "function": function.canonical_signature,
                        "transaction_hash": tx.hash.to_string(),
                    }),
                );
            }

            records.push(DomainRecord::DecodedCall(DecodedCall {
                function_name: function.name.clone(),
                signature: function.canonical_signature.clone(),
                to_address: to,
                input,
                transaction_hash: tx.hash,
                transaction_index: tx.transaction_index,
                block_number: tx.block_number,
                block_hash: tx.block_hash,
                block_timestamp: tx.block_timestamp,
                reorg: false,
            }));
        }

        ctx.buffer.append(DomainKind::DecodedCall, records);
        Ok(())
    }

    async fn process(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.buffer.sort(DomainKind::DecodedCall);
        Ok(())
    }
}
