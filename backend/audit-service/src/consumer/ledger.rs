use std::collections::BTreeMap;

use crate::error::{AuditError, Result};
use crate::models::{PartitionAssignment, TopicPartition};

/// Partitions one worker currently owns and how far each is committed
///
/// Owned exclusively by its worker task; no cross-worker sharing.
#[derive(Debug)]
pub struct OwnershipLedger {
    worker_id: usize,
    owned: BTreeMap<TopicPartition, Option<i64>>,
}

impl OwnershipLedger {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            owned: BTreeMap::new(),
        }
    }

    /// Take ownership; returns the partitions that were not owned before
    pub fn assign(&mut self, partitions: &[TopicPartition]) -> Vec<TopicPartition> {
        partitions
            .iter()
            .filter(|tp| {
                if self.owned.contains_key(*tp) {
                    false
                } else {
                    self.owned.insert((*tp).clone(), None);
                    true
                }
            })
            .cloned()
            .collect()
    }

    /// Drop ownership; returns the partitions that were actually owned
    pub fn revoke(&mut self, partitions: &[TopicPartition]) -> Vec<TopicPartition> {
        partitions
            .iter()
            .filter(|tp| self.owned.remove(*tp).is_some())
            .cloned()
            .collect()
    }

    pub fn revoke_all(&mut self) -> Vec<TopicPartition> {
        std::mem::take(&mut self.owned).into_keys().collect()
    }

    pub fn owns(&self, tp: &TopicPartition) -> bool {
        self.owned.contains_key(tp)
    }

    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.owned.get(tp).copied().flatten()
    }

    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    /// Fencing gate: may `offset` be committed for `tp` right now?
    pub fn check_commit(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        match self.owned.get(tp) {
            None => Err(AuditError::StaleOwnership {
                topic: tp.topic.clone(),
                partition: tp.partition,
            }),
            Some(Some(committed)) if offset <= *committed => Err(AuditError::OutOfOrderCommit {
                topic: tp.topic.clone(),
                partition: tp.partition,
                offset,
                committed: *committed,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Record a commit the broker accepted
    pub fn record_commit(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.check_commit(tp, offset)?;
        self.owned.insert(tp.clone(), Some(offset));
        Ok(())
    }

    pub fn assignments(&self) -> Vec<PartitionAssignment> {
        self.owned
            .iter()
            .map(|(tp, committed)| PartitionAssignment {
                topic: tp.topic.clone(),
                partition: tp.partition,
                owner_worker_id: self.worker_id,
                committed_offset: *committed,
            })
            .collect()
    }
}
