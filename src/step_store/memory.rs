//! In-memory step store implementation.
//!
//! This module provides [`MemoryStepStore`], a thread-safe in-memory
//! implementation of [`StepStore`] suitable for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChainSnapshot, StepStore};
use crate::{ApprovalError, ApprovalStep, ProposalRecord, ProposalStatus, Result};

/// Internal storage for the memory step store.
#[derive(Debug, Default)]
struct Storage {
    /// Steps indexed by id.
    steps: HashMap<Uuid, ApprovalStep>,
    /// Step ids per proposal, in chain order.
    chains: HashMap<String, Vec<Uuid>>,
    /// Proposal records indexed by proposal id.
    proposals: HashMap<String, ProposalRecord>,
}

impl Storage {
    fn chain(&self, proposal_id: &str) -> Vec<ApprovalStep> {
        let mut chain: Vec<ApprovalStep> = self
            .chains
            .get(proposal_id)
            .map(|ids| ids.iter().filter_map(|id| self.steps.get(id)).cloned().collect())
            .unwrap_or_default();
        chain.sort_by_key(|s| s.order_index);
        chain
    }

    fn sorted(mut steps: Vec<ApprovalStep>) -> Vec<ApprovalStep> {
        steps.sort_by(|a, b| {
            a.proposal_id
                .cmp(&b.proposal_id)
                .then(a.order_index.cmp(&b.order_index))
        });
        steps
    }
}

/// An in-memory implementation of [`StepStore`].
///
/// This implementation uses `Arc<RwLock<...>>` internally, making it safe to
/// clone and share across async tasks. A commit holds the write lock for its
/// whole version check and write, so it is atomic with respect to other
/// commits, and snapshots are read under one read lock.
///
/// # Example
///
/// ```
/// use signoff::{MemoryStepStore, StepStore};
///
/// # async fn example() -> signoff::Result<()> {
/// let store = MemoryStepStore::new();
/// assert!(store.list_proposals().await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStepStore {
    storage: Arc<RwLock<Storage>>,
}

impl MemoryStepStore {
    /// Creates a new, empty in-memory step store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::default())),
        }
    }

    /// Returns the number of proposals currently stored.
    ///
    /// Useful for testing.
    pub async fn proposal_count(&self) -> usize {
        self.storage.read().await.proposals.len()
    }

    /// Returns the total number of steps currently stored.
    ///
    /// Useful for testing.
    pub async fn step_count(&self) -> usize {
        self.storage.read().await.steps.len()
    }

    /// Clears all stored data.
    ///
    /// Useful for resetting state between tests.
    pub async fn clear(&self) {
        let mut storage = self.storage.write().await;
        storage.steps.clear();
        storage.chains.clear();
        storage.proposals.clear();
    }
}

impl Default for MemoryStepStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepStore for MemoryStepStore {
    async fn insert_chain(
        &mut self,
        proposal_id: &str,
        steps: &[ApprovalStep],
        status: ProposalStatus,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;
        if storage.proposals.contains_key(proposal_id) {
            return Err(ApprovalError::ChainAlreadyExists(proposal_id.to_string()));
        }

        storage.chains.insert(
            proposal_id.to_string(),
            steps.iter().map(|s| s.id).collect(),
        );
        for step in steps {
            storage.steps.insert(step.id, step.clone());
        }
        storage
            .proposals
            .insert(proposal_id.to_string(), ProposalRecord::new(status));
        Ok(())
    }

    async fn get_step(&self, step_id: Uuid) -> Result<Option<ApprovalStep>> {
        let storage = self.storage.read().await;
        Ok(storage.steps.get(&step_id).cloned())
    }

    async fn get_chain(&self, proposal_id: &str) -> Result<Vec<ApprovalStep>> {
        let storage = self.storage.read().await;
        Ok(storage.chain(proposal_id))
    }

    async fn load_snapshot(&self, proposal_id: &str) -> Result<Option<ChainSnapshot>> {
        let storage = self.storage.read().await;
        Ok(storage
            .proposals
            .get(proposal_id)
            .map(|record| ChainSnapshot {
                proposal: *record,
                steps: storage.chain(proposal_id),
            }))
    }

    async fn commit(
        &mut self,
        proposal_id: &str,
        expected_version: u64,
        steps: &[ApprovalStep],
        status: ProposalStatus,
    ) -> Result<()> {
        let mut storage = self.storage.write().await;

        // Check everything before writing anything
        let record = storage
            .proposals
            .get(proposal_id)
            .copied()
            .ok_or_else(|| ApprovalError::ProposalNotFound(proposal_id.to_string()))?;
        if record.status.is_closed() {
            return Err(ApprovalError::ProposalClosed(proposal_id.to_string()));
        }
        if record.version != expected_version {
            return Err(ApprovalError::ProposalConflict(proposal_id.to_string()));
        }

        for step in steps {
            match storage.steps.get(&step.id) {
                Some(stored) if stored.proposal_id != proposal_id => {
                    return Err(ApprovalError::StepNotFound(step.id));
                }
                Some(stored) if stored.version != step.version => {
                    return Err(ApprovalError::Conflict(step.id));
                }
                Some(_) => {}
                None => return Err(ApprovalError::StepNotFound(step.id)),
            }
        }

        for step in steps {
            let mut stored = step.clone();
            stored.version += 1;
            storage.steps.insert(stored.id, stored);
        }
        storage.proposals.insert(
            proposal_id.to_string(),
            ProposalRecord {
                status,
                version: record.version + 1,
            },
        );
        Ok(())
    }

    async fn get_proposal(&self, proposal_id: &str) -> Result<Option<ProposalRecord>> {
        let storage = self.storage.read().await;
        Ok(storage.proposals.get(proposal_id).copied())
    }

    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<ApprovalStep>> {
        let storage = self.storage.read().await;
        let steps = storage
            .steps
            .values()
            .filter(|s| s.is_assigned_to(user_id) && s.is_actionable())
            .cloned()
            .collect();
        Ok(Storage::sorted(steps))
    }

    async fn unassigned_steps(&self) -> Result<Vec<ApprovalStep>> {
        let storage = self.storage.read().await;
        let steps = storage
            .steps
            .values()
            .filter(|s| s.is_unassigned() && s.status.is_open())
            .cloned()
            .collect();
        Ok(Storage::sorted(steps))
    }

    async fn delete_proposal(&mut self, proposal_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        if let Some(ids) = storage.chains.remove(proposal_id) {
            for id in ids {
                storage.steps.remove(&id);
            }
        }
        storage.proposals.remove(proposal_id);
        Ok(())
    }

    async fn list_proposals(&self) -> Result<Vec<String>> {
        let storage = self.storage.read().await;
        let mut ids: Vec<String> = storage.proposals.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
