//! Raw-event narrowing filters declared by jobs.

use alloy::primitives::{Address, B256};

use crate::types::log::Log;

/// Which logs a job wants to be offered. Empty address/topic lists mean
/// "no constraint on that dimension"; a job with no filter at all accepts
/// every log.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topics: Vec<B256>,
}

impl LogFilter {
    pub fn new(addresses: Vec<Address>, topics: Vec<B256>) -> Self {
        Self { addresses, topics }
    }

    pub fn matches(&self, log: &Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        if !self.topics.is_empty() {
            match log.topic0() {
                Some(topic0) if self.topics.contains(&topic0) => {}
                _ => return false,
            }
        }
        true
    }
}
