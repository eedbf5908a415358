//! Approval events.
//!
//! This module provides [`ApprovalEvent`] for observing the engine. Events
//! are broadcast through a channel that can be subscribed to for audit
//! trails, notifications, or live dashboards. They are emitted only after
//! the corresponding change has been committed.

use uuid::Uuid;

use crate::ProposalStatus;

/// An event emitted after a committed change to an approval chain.
///
/// Events use `String` for proposal IDs to keep the event type simple
/// and easy to serialize for logging or transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ApprovalEvent {
    /// A chain was built and persisted for a proposal.
    ChainBuilt {
        /// The proposal's identifier.
        proposal_id: String,
        /// Number of steps in the chain.
        steps: usize,
        /// Number of steps without a resolved approver.
        unassigned: usize,
    },

    /// A step was approved by its assignee.
    StepApproved {
        /// The proposal's identifier.
        proposal_id: String,
        /// The approved step.
        step_id: Uuid,
        /// Who approved it.
        approver: String,
    },

    /// A step was approved as a duplicate of another decision.
    StepAutoApproved {
        /// The proposal's identifier.
        proposal_id: String,
        /// The auto-approved step.
        step_id: Uuid,
        /// The approver whose decision was reused.
        approver: String,
    },

    /// A step was rejected.
    StepRejected {
        /// The proposal's identifier.
        proposal_id: String,
        /// The rejected step.
        step_id: Uuid,
        /// Who rejected it.
        approver: String,
        /// The rejection reason.
        reason: String,
    },

    /// An optional step was skipped because nobody forwarded to it.
    StepSkipped {
        /// The proposal's identifier.
        proposal_id: String,
        /// The skipped step.
        step_id: Uuid,
    },

    /// An optional step was unlocked by a forwarding approver.
    StepUnlocked {
        /// The proposal's identifier.
        proposal_id: String,
        /// The unlocked step.
        step_id: Uuid,
    },

    /// A waiting step became pending.
    StepActivated {
        /// The proposal's identifier.
        proposal_id: String,
        /// The activated step.
        step_id: Uuid,
    },

    /// An unassigned step was given an approver.
    ApproverAssigned {
        /// The proposal's identifier.
        proposal_id: String,
        /// The step.
        step_id: Uuid,
        /// The new approver.
        user_id: String,
    },

    /// The proposal's derived status changed.
    ProposalStatusChanged {
        /// The proposal's identifier.
        proposal_id: String,
        /// Status before the change.
        from: ProposalStatus,
        /// Status after the change.
        to: ProposalStatus,
    },
}

impl ApprovalEvent {
    /// Returns the proposal ID for this event.
    pub fn proposal_id(&self) -> &str {
        match self {
            Self::ChainBuilt { proposal_id, .. }
            | Self::StepApproved { proposal_id, .. }
            | Self::StepAutoApproved { proposal_id, .. }
            | Self::StepRejected { proposal_id, .. }
            | Self::StepSkipped { proposal_id, .. }
            | Self::StepUnlocked { proposal_id, .. }
            | Self::StepActivated { proposal_id, .. }
            | Self::ApproverAssigned { proposal_id, .. }
            | Self::ProposalStatusChanged { proposal_id, .. } => proposal_id,
        }
    }

    /// Returns the step this event is about, if applicable.
    pub fn step_id(&self) -> Option<Uuid> {
        match self {
            Self::StepApproved { step_id, .. }
            | Self::StepAutoApproved { step_id, .. }
            | Self::StepRejected { step_id, .. }
            | Self::StepSkipped { step_id, .. }
            | Self::StepUnlocked { step_id, .. }
            | Self::StepActivated { step_id, .. }
            | Self::ApproverAssigned { step_id, .. } => Some(*step_id),
            Self::ChainBuilt { .. } | Self::ProposalStatusChanged { .. } => None,
        }
    }

    /// Returns true if this event closes the proposal.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::ProposalStatusChanged { to, .. } if to.is_closed())
    }

    /// Returns true if someone new now has a step to act on.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            Self::StepActivated { .. } | Self::StepUnlocked { .. } | Self::ApproverAssigned { .. }
        )
    }
}
