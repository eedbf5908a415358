//! Error types for the signoff approval engine.
//!
//! This module defines the error types used throughout the crate, following
//! the non-exhaustive enum pattern to allow future error variants without
//! breaking compatibility.

use thiserror::Error;
use uuid::Uuid;

/// The main error type for signoff operations.
///
/// Variants fall into two groups: request preconditions that a caller should
/// surface to the person who made the request (see
/// [`is_precondition`](Self::is_precondition)), and infrastructure failures
/// (storage, directory, configuration) that should abort the unit of work.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApprovalError {
    /// Error occurred in the step store layer.
    #[error("Step store error: {0}")]
    StepStore(String),

    /// Approval step not found in the step store.
    #[error("Approval step not found: {0}")]
    StepNotFound(Uuid),

    /// Proposal has no recorded approval chain.
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    /// The acting user is not the approver assigned to the step.
    #[error("User {user_id} is not the assigned approver of step {step_id}")]
    NotAssignee {
        /// The step the decision was attempted on.
        step_id: Uuid,
        /// The user who attempted the decision.
        user_id: String,
    },

    /// The step is not awaiting a decision.
    #[error("Step {step_id} is not pending (current status: {status})")]
    StepNotPending {
        /// The step the decision was attempted on.
        step_id: Uuid,
        /// The status the step is actually in.
        status: String,
    },

    /// The step already has an approver.
    #[error("Step {step_id} is already assigned to {user_id}")]
    AlreadyAssigned {
        /// The step.
        step_id: Uuid,
        /// The current approver.
        user_id: String,
    },

    /// A rejection was requested without a reason.
    #[error("A rejection requires a non-empty comment")]
    MissingRejectionReason,

    /// The proposal has already been rejected; the chain is halted.
    #[error("Proposal {0} is closed to further decisions")]
    ProposalClosed(String),

    /// An approval chain already exists for the proposal.
    #[error("Approval chain already exists for proposal {0}")]
    ChainAlreadyExists(String),

    /// A built chain violates an ordering or initial-status invariant.
    #[error("Invalid approval chain: {0}")]
    InvalidChain(String),

    /// A concurrent decision changed the steps between read and commit.
    #[error("Concurrent modification of step {0}")]
    Conflict(Uuid),

    /// Another write to the proposal landed between read and commit.
    #[error("Concurrent modification of proposal {0}")]
    ProposalConflict(String),

    /// A role label has no mapping to a known role kind.
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// Engine or step configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The directory collaborator failed.
    #[error("Directory lookup error: {0}")]
    Directory(String),

    /// The flow template collaborator failed.
    #[error("Flow template error: {0}")]
    Template(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from file or database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Database error (for SQLite step store).
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(String),
}

impl ApprovalError {
    /// Returns true if the error is a rejected decision request rather than
    /// an infrastructure failure.
    ///
    /// Precondition failures never leave partial mutations behind.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::StepNotFound(_)
                | Self::NotAssignee { .. }
                | Self::StepNotPending { .. }
                | Self::AlreadyAssigned { .. }
                | Self::MissingRejectionReason
                | Self::ProposalClosed(_)
                | Self::Conflict(_)
                | Self::ProposalConflict(_)
        )
    }
}

impl From<figment::Error> for ApprovalError {
    fn from(error: figment::Error) -> Self {
        Self::Config(Box::new(error))
    }
}

/// A specialized `Result` type for signoff operations.
pub type Result<T> = std::result::Result<T, ApprovalError>;
