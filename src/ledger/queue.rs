use std::collections::VecDeque;

use crate::model::TransactionRecord;

/// Records accepted in memory but not yet written to the store, oldest first.
#[derive(Debug, Default)]
pub struct PendingRecordQueue {
    records: VecDeque<TransactionRecord>,
}

impl PendingRecordQueue {
    pub fn append(&mut self, record: TransactionRecord) {
        self.records.push_back(record);
    }

    /// Remove and return up to `max` of the oldest records.
    pub fn take_batch(&mut self, max: usize) -> Vec<TransactionRecord> {
        let count = max.min(self.records.len());
        self.records.drain(..count).collect()
    }

    /// Put a batch that failed to persist back at the head, keeping its order.
    pub fn requeue(&mut self, batch: Vec<TransactionRecord>) {
        for record in batch.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
