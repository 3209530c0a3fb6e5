//! Token transfer extraction job: logs in, ERC20/721/1155 transfer records
//! out, split by standard and sorted for export.

use async_trait::async_trait;
use serde_json::json;

use crate::decoding::transfers::{
    extract_transfers_from_log, TRANSFER_BATCH_TOPIC, TRANSFER_SINGLE_TOPIC, TRANSFER_TOPIC,
};
use crate::recorder::Level;
use crate::types::{DomainKind, DomainRecord};

use super::filter::LogFilter;
use super::{parse_address_list, Job, JobContext, JobError};

pub struct TokenTransferJob {
    contract_addresses: Vec<alloy::primitives::Address>,
}

const DEPS: [DomainKind; 1] = [DomainKind::Log];
const OUTPUTS: [DomainKind; 3] = [
    DomainKind::Erc20TokenTransfer,
    DomainKind::Erc721TokenTransfer,
    DomainKind::Erc1155TokenTransfer,
];

impl TokenTransferJob {
    pub fn new(options: &serde_json::Value) -> Result<Self, JobError> {
        Ok(Self {
            contract_addresses: parse_address_list(options, "contract_address")?,
        })
    }
}

#[async_trait]
impl Job for TokenTransferJob {
    fn name(&self) -> &'static str {
        "token_transfer"
    }

    fn dependency_types(&self) -> &[DomainKind] {
        &DEPS
    }

    fn output_types(&self) -> &[DomainKind] {
        &OUTPUTS
    }

    fn able_to_reorg(&self) -> bool {
        true
    }

    fn filter(&self) -> Option<LogFilter> {
        Some(LogFilter::new(
            self.contract_addresses.clone(),
            vec![TRANSFER_TOPIC, TRANSFER_SINGLE_TOPIC, TRANSFER_BATCH_TOPIC],
        ))
    }

    async fn collect(&self, ctx: &JobContext) -> Result<(), JobError> {
        let filter = self.filter();
        let logs = ctx.logs(filter.as_ref());

        let buffer = ctx.buffer.clone();
        let cache = ctx.token_types.clone();
        let recorder = ctx.recorder.clone();

        ctx.executor
            .execute(ctx.range, self.name(), logs, move |batch| {
                let buffer = buffer.clone();
                let cache = cache.clone();
                let recorder = recorder.clone();
                async move {
                    let mut records = Vec::new();
                    for log in &batch {
                        match extract_transfers_from_log(log, &cache) {
                            Ok(transfers) => records.extend(
                                transfers.into_iter().map(DomainRecord::TokenTransfer),
                            ),
                            Err(e) => recorder.record(
                                Some(log.block_number),
                                "token_transfer",
                                Level::Warn,
                                "transfer_decode_error",
                                &e.to_string(),
                                json!({
                                    "transaction_hash": log.transaction_hash.to_string(),
                                    "log_index": log.log_index,
                                }),
                            ),
                        }
                    }
                    buffer.append_records(records);
                    Ok(())
                }
            })
            .await?;

        Ok(())
    }

    async fn process(&self, ctx: &JobContext) -> Result<(), JobError> {
        for kind in OUTPUTS {
            ctx.buffer.sort(kind);
        }
        Ok(())
    }
}
