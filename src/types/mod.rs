pub mod block;
pub mod buffer;
pub mod config;
pub mod decoded;
pub mod log;
pub mod raw;
pub mod record;
pub mod token_transfer;
pub mod trace;

pub use record::{DomainKind, DomainRecord};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RangeError {
    #[error("invalid block range: start {start} > end {end}")]
    StartAfterEnd { start: u64, end: u64 },
}

/// An inclusive block range, immutable once assigned to a scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start_block: u64,
    pub end_block: u64,
}

impl BlockRange {
    pub fn new(start_block: u64, end_block: u64) -> Result<Self, RangeError> {
        if start_block > end_block {
            return Err(RangeError::StartAfterEnd {
                start: start_block,
                end: end_block,
            });
        }
        Ok(Self {
            start_block,
            end_block,
        })
    }

    pub fn len(&self) -> u64 {
        self.end_block - self.start_block + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, block_number: u64) -> bool {
        block_number >= self.start_block && block_number <= self.end_block
    }

    pub fn blocks(&self) -> impl Iterator<Item = u64> {
        self.start_block..=self.end_block
    }

    /// Partition into inclusive sub-ranges of at most `size` blocks.
    /// The last sub-range may be smaller.
    pub fn split(&self, size: u64) -> Vec<BlockRange> {
        let size = size.max(1);
        let mut out = Vec::new();
        let mut start = self.start_block;
        while start <= self.end_block {
            let end = std::cmp::min(start.saturating_add(size - 1), self.end_block);
            out.push(BlockRange {
                start_block: start,
                end_block: end,
            });
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        out
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start_block, self.end_block)
    }
}
