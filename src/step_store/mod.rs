//! Step storage for the signoff approval engine.
//!
//! This module provides the [`StepStore`] trait for persisting approval
//! chains and proposal statuses, along with concrete implementations:
//!
//! - [`MemoryStepStore`]: Thread-safe in-memory storage for testing/development
//! - [`SqliteStepStore`]: SQLite-backed storage (requires the `sqlite` feature)
//!
//! # Consistency
//!
//! The chain of one proposal is the unit of consistency. [`StepStore::commit`]
//! writes a set of changed steps plus the proposal status all-or-nothing, and
//! only if the proposal record and every step still carry the `version` they
//! were read with. Every commit bumps the proposal version, so of two
//! decisions read from the same snapshot only the first can land, even when
//! they touch different steps.
//!
//! # Example
//!
//! ```
//! use signoff::{ApprovalStep, MemoryStepStore, ProposalStatus, RoleKind, StepStore};
//!
//! # async fn example() -> signoff::Result<()> {
//! let mut store = MemoryStepStore::new();
//! let step = ApprovalStep::new("prop-1", 1, Some(RoleKind::Hod), Some("h".into()), false);
//!
//! store
//!     .insert_chain("prop-1", &[step.clone()], ProposalStatus::Submitted)
//!     .await?;
//!
//! let snapshot = store.load_snapshot("prop-1").await?.expect("chain exists");
//! assert_eq!(snapshot.steps.len(), 1);
//! assert_eq!(snapshot.proposal.version, 0);
//! # Ok(())
//! # }
//! ```

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStepStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStepStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{ApprovalStep, ProposalRecord, ProposalStatus, Result};

/// A proposal record and its chain, read together.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSnapshot {
    /// The proposal's status and version at read time.
    pub proposal: ProposalRecord,
    /// The chain ordered by `order_index`.
    pub steps: Vec<ApprovalStep>,
}

/// A trait for persisting approval chains.
///
/// # Object Safety
///
/// This trait is object-safe, so storage backends can be swapped at runtime
/// behind `Box<dyn StepStore>`.
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Persists a freshly built chain and the proposal's initial status in
    /// one operation.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::ChainAlreadyExists`](crate::ApprovalError::ChainAlreadyExists)
    /// if the proposal already has a chain. Existing steps are never
    /// overwritten.
    async fn insert_chain(
        &mut self,
        proposal_id: &str,
        steps: &[ApprovalStep],
        status: ProposalStatus,
    ) -> Result<()>;

    /// Retrieves a single step.
    ///
    /// Returns `Ok(None)` if the step does not exist.
    async fn get_step(&self, step_id: Uuid) -> Result<Option<ApprovalStep>>;

    /// Retrieves a proposal's chain ordered by `order_index`.
    ///
    /// Returns an empty list for unknown proposals.
    async fn get_chain(&self, proposal_id: &str) -> Result<Vec<ApprovalStep>>;

    /// Reads the proposal record and its chain in one consistent view.
    ///
    /// Returns `Ok(None)` if the proposal has no recorded chain.
    async fn load_snapshot(&self, proposal_id: &str) -> Result<Option<ChainSnapshot>>;

    /// Atomically writes changed steps and the proposal status.
    ///
    /// The stored proposal version must equal `expected_version` and each
    /// step's `version` must match the stored one. On success the proposal
    /// version and every written step's version are incremented.
    ///
    /// # Errors
    ///
    /// Nothing is written on any error.
    ///
    /// - [`ApprovalError::ProposalNotFound`](crate::ApprovalError::ProposalNotFound)
    ///   if the proposal has no chain
    /// - [`ApprovalError::ProposalClosed`](crate::ApprovalError::ProposalClosed)
    ///   if the stored proposal is already closed
    /// - [`ApprovalError::ProposalConflict`](crate::ApprovalError::ProposalConflict)
    ///   if another commit landed since `expected_version` was read
    /// - [`ApprovalError::Conflict`](crate::ApprovalError::Conflict) if a
    ///   step changed since it was read
    /// - [`ApprovalError::StepNotFound`](crate::ApprovalError::StepNotFound)
    ///   if a step does not exist for the proposal
    async fn commit(
        &mut self,
        proposal_id: &str,
        expected_version: u64,
        steps: &[ApprovalStep],
        status: ProposalStatus,
    ) -> Result<()>;

    /// Retrieves the stored record of a proposal.
    async fn get_proposal(&self, proposal_id: &str) -> Result<Option<ProposalRecord>>;

    /// Retrieves the recorded status of a proposal.
    async fn get_proposal_status(&self, proposal_id: &str) -> Result<Option<ProposalStatus>> {
        Ok(self.get_proposal(proposal_id).await?.map(|record| record.status))
    }

    /// Lists the steps a user can act on now: assigned to them, pending, and
    /// either mandatory or unlocked.
    async fn pending_for_user(&self, user_id: &str) -> Result<Vec<ApprovalStep>>;

    /// Lists open steps without an assigned approver.
    async fn unassigned_steps(&self) -> Result<Vec<ApprovalStep>>;

    /// Deletes a proposal's chain and status.
    async fn delete_proposal(&mut self, proposal_id: &str) -> Result<()>;

    /// Lists all proposal ids with a recorded chain.
    async fn list_proposals(&self) -> Result<Vec<String>>;
}
