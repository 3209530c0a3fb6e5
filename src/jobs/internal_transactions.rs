//! Derives internal transactions from processed traces: nested calls that
//! move value, plus contract creations and self-destructs.

use alloy::primitives::U256;
use async_trait::async_trait;

use crate::types::trace::InternalTransaction;
use crate::types::{DomainKind, DomainRecord};

use super::{Job, JobContext, JobError};

pub struct InternalTransactionJob;

const DEPS: [DomainKind; 1] = [DomainKind::Trace];
const OUTPUTS: [DomainKind; 1] = [DomainKind::InternalTransaction];

fn is_internal(trace: &crate::types::trace::Trace) -> bool {
    if trace.trace_address.is_empty() {
        // The root call is the transaction itself.
        return false;
    }
    trace.value > U256::ZERO
        || matches!(trace.trace_type.as_str(), "create" | "create2" | "suicide")
}

#[async_trait]
impl Job for InternalTransactionJob {
    fn name(&self) -> &'static str {
        "internal_transaction"
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

    async fn collect(&self, ctx: &JobContext) -> Result<(), JobError> {
        let records: Vec<DomainRecord> = ctx
            .buffer
            .snapshot(DomainKind::Trace)
            .into_iter()
            .filter_map(|record| match record {
                DomainRecord::Trace(trace) if is_internal(&trace) => Some(
                    DomainRecord::InternalTransaction(InternalTransaction::from_trace(&trace)),
                ),
                _ => None,
            })
            .collect();

        ctx.buffer.append(DomainKind::InternalTransaction, records);
        Ok(())
    }

    async fn process(&self, ctx: &JobContext) -> Result<(), JobError> {
        ctx.buffer.sort(DomainKind::InternalTransaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::trace::Trace;
    use alloy::primitives::{Address, Bytes, B256};

    fn trace(path: Vec<u32>, value: u64, trace_type: &str) -> Trace {
        Trace {
            trace_id: Trace::make_trace_id(&B256::repeat_byte(0xaa), &path),
            from_address: Some(Address::repeat_byte(1)),
            to_address: Some(Address::repeat_byte(2)),
            value: U256::from(value),
            input: Bytes::new(),
            output: Bytes::new(),
            trace_type: trace_type.to_string(),
            call_type: Some("call".to_string()),
            delegate_address: None,
            gas: 0,
            gas_used: 0,
            subtraces: 0,
            trace_address: path,
            error: None,
            status: 1,
            block_number: 1,
            block_hash: B256::ZERO,
            block_timestamp: 0,
            transaction_index: 0,
            transaction_hash: B256::repeat_byte(0xaa),
            reorg: false,
        }
    }

    #[test]
    fn only_nested_value_or_create_traces_qualify() {
        assert!(!is_internal(&trace(vec![], 100, "call")));
        assert!(is_internal(&trace(vec![0], 100, "call")));
        assert!(!is_internal(&trace(vec![0], 0, "call")));
        assert!(is_internal(&trace(vec![1, 2], 0, "create")));
        assert!(is_internal(&trace(vec![3], 0, "suicide")));
    }
}
