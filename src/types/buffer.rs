use std::collections::HashMap;
use std::sync::Mutex;

use super::record::{sort_records, DomainKind, DomainRecord};

/// Per-cycle typed record buffer. One slot per `DomainKind`, each with its own
/// lock: batches of a single job append to their output kinds concurrently,
/// while distinct jobs never contend on the same kind (a kind has exactly one
/// producer in the graph).
///
/// Created empty at cycle start, cleared at cycle end. Never shared across
/// concurrent cycles.
pub struct DataBuffer {
    slots: HashMap<DomainKind, Mutex<Vec<DomainRecord>>>,
}

impl DataBuffer {
    pub fn new() -> Self {
        let slots = DomainKind::ALL
            .iter()
            .map(|kind| (*kind, Mutex::new(Vec::new())))
            .collect();
        Self { slots }
    }

    fn slot(&self, kind: DomainKind) -> &Mutex<Vec<DomainRecord>> {
        // All kinds are pre-created in `new`.
        &self.slots[&kind]
    }

    pub fn append(&self, kind: DomainKind, records: impl IntoIterator<Item = DomainRecord>) {
        let mut slot = self.slot(kind).lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            debug_assert_eq!(record.kind(), kind);
            slot.push(record);
        }
    }

    /// Append records routed to their own kind's slot.
    pub fn append_records(&self, records: impl IntoIterator<Item = DomainRecord>) {
        let mut by_kind: HashMap<DomainKind, Vec<DomainRecord>> = HashMap::new();
        for record in records {
            by_kind.entry(record.kind()).or_default().push(record);
        }
        for (kind, records) in by_kind {
            self.append(kind, records);
        }
    }

    pub fn snapshot(&self, kind: DomainKind) -> Vec<DomainRecord> {
        self.slot(kind)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self, kind: DomainKind) -> usize {
        self.slot(kind).lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self, kind: DomainKind) -> bool {
        self.len(kind) == 0
    }

    pub fn take(&self, kind: DomainKind) -> Vec<DomainRecord> {
        std::mem::take(&mut *self.slot(kind).lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn sort(&self, kind: DomainKind) {
        let mut slot = self.slot(kind).lock().unwrap_or_else(|e| e.into_inner());
        sort_records(&mut slot);
    }

    pub fn mark_reorg(&self, kind: DomainKind, start_block: u64, end_block: u64) {
        let mut slot = self.slot(kind).lock().unwrap_or_else(|e| e.into_inner());
        for record in slot.iter_mut() {
            let number = record.block_number();
            if number >= start_block && number <= end_block {
                record.set_reorg(true);
            }
        }
    }

    pub fn clear(&self) {
        for slot in self.slots.values() {
            slot.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }
}

impl Default for DataBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::block::Block;
    use alloy::primitives::B256;
    use std::sync::Arc;

    fn block(number: u64) -> DomainRecord {
        DomainRecord::Block(Block {
            number,
            hash: B256::repeat_byte(number as u8),
            parent_hash: B256::ZERO,
            timestamp: 0,
            transaction_count: 0,
            reorg: false,
        })
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let buffer = Arc::new(DataBuffer::new());
        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    buffer.append(DomainKind::Block, [block(worker * 100 + i)]);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(buffer.len(DomainKind::Block), 400);
    }

    #[test]
    fn take_empties_the_slot() {
        let buffer = DataBuffer::new();
        buffer.append(DomainKind::Block, [block(1), block(2)]);
        assert_eq!(buffer.take(DomainKind::Block).len(), 2);
        assert!(buffer.is_empty(DomainKind::Block));
    }

    #[test]
    fn mark_reorg_only_touches_the_range() {
        let buffer = DataBuffer::new();
        buffer.append(DomainKind::Block, [block(1), block(5), block(9)]);
        buffer.mark_reorg(DomainKind::Block, 4, 6);
        let flagged: Vec<bool> = buffer
            .snapshot(DomainKind::Block)
            .iter()
            .map(|r| r.reorg())
            .collect();
        assert_eq!(flagged, vec![false, true, false]);
    }
}
