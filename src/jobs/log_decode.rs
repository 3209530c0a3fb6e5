//! Decodes logs against configured event signatures into `DecodedEvent`
//! records. An undecodable log still produces a record carrying the
//! explicit failure, plus an exception entry.

use std::collections::HashMap;

use alloy::primitives::B256;
use async_trait::async_trait;
use serde_json::json;

use crate::decoding::abi::decode_log;
use crate::decoding::signature::ParsedEvent;
use crate::recorder::Level;
use crate::types::decoded::{DecodedData, DecodedEvent};
use crate::types::{DomainKind, DomainRecord};

use super::filter::LogFilter;
use super::{parse_address_list, parse_string_list, Job, JobContext, JobError};

pub struct LogDecodeJob {
    contract_addresses: Vec<alloy::primitives::Address>,
    events: Vec<ParsedEvent>,
    by_topic0: HashMap<B256, usize>,
}

const DEPS: [DomainKind; 1] = [DomainKind::Log];
const OUTPUTS: [DomainKind; 1] = [DomainKind::DecodedEvent];

impl LogDecodeJob {
    pub fn new(options: &serde_json::Value) -> Result<Self, JobError> {
        let contract_addresses = parse_address_list(options, "contract_address")?;
        let signatures = parse_string_list(options, "event_signatures")?;

        let events: Vec<ParsedEvent> = signatures
            .iter()
            .map(|sig| {
                ParsedEvent::from_signature(sig)
                    .map_err(|e| JobError::Options(format!("bad event signature '{sig}': {e}")))
            })
            .collect::<Result<_, _>>()?;

        let by_topic0 = events
            .iter()
            .enumerate()
            .map(|(idx, event)| (event.topic0, idx))
            .collect();

        Ok(Self {
            contract_addresses,
            events,
            by_topic0,
        })
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl Job for LogDecodeJob {
    fn name(&self) -> &'static str {
        "log_decode"
    }

    fn dependency_types(&self) -> &[DomainKind] {
        &DEPS
    }

    fn output_types(&self) -> &[DomainKind] {
        &OUTPUTS
    }

    fn filter(&self) -> Option<LogFilter> {
        Some(LogFilter::new(
            self.contract_addresses.clone(),
            self.events.iter().map(|e| e.topic0).collect(),
        ))
    }

    async fn collect(&self, ctx: &JobContext) -> Result<(), JobError> {
        let filter = self.filter();
        let mut records = Vec::new();

        for log in ctx.logs(filter.as_ref()) {
            let Some(&event_idx) = log.topic0().and_then(|t| self.by_topic0.get(&t)) else {
                continue;
            };
            let event = &self.events[event_idx];
            let data = decode_log(event, &log);

            if let DecodedData::Undecodable { reason } = &data {
                ctx.recorder.record(
                    Some(log.block_number),
                    "decoded_event",
                    Level::Warn,
                    "event_decode_error",
                    reason,
                    json!({
                        "event": event.canonical_signature,
                        "transaction_hash": log.transaction_hash.to_string(),
                        "log_index": log.log_index,
                    }),
                );
            }

            records.push(DomainRecord::DecodedEvent(DecodedEvent {
                event_name: event.name.clone(),
                signature: event.canonical_signature.clone(),
                address: log.address,
                data,
                log_index: log.log_index,
                transaction_hash: log.transaction_hash,
                block_number: log.block_number,
                block_hash: log.block_hash,
                block_timestamp: log.block_timestamp,
                reorg: false,
            }));
        }

        ctx.buffer.append(DomainKind::DecodedEvent, records);
        Ok(())
    }

    async fn process(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.buffer.sort(DomainKind::DecodedEvent);
        Ok(())
    }
}
