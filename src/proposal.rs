//! The proposal side of the engine boundary.
//!
//! Proposals are owned by the surrounding application. The engine only needs
//! to read a few of their fields and records their review status as a side
//! effect of step transitions.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::ApprovalError;

/// A proposal that can be routed through an approval chain.
///
/// # Object Safety
///
/// This trait is object-safe; the engine accepts `&dyn Proposal`.
///
/// # Examples
///
/// ```
/// use signoff::Proposal;
///
/// #[derive(Debug)]
/// struct EventProposal {
///     id: String,
///     organization: String,
///     faculty: Vec<String>,
/// }
///
/// impl Proposal for EventProposal {
///     fn id(&self) -> &str {
///         &self.id
///     }
///     fn organization_id(&self) -> &str {
///         &self.organization
///     }
///     fn faculty_incharge_ids(&self) -> &[String] {
///         &self.faculty
///     }
/// }
/// ```
pub trait Proposal: Debug + Send + Sync {
    /// Returns the unique identifier of this proposal.
    fn id(&self) -> &str;

    /// Returns the organization that submitted the proposal.
    fn organization_id(&self) -> &str;

    /// Returns the faculty-in-charge user ids, in their stored order.
    fn faculty_incharge_ids(&self) -> &[String];
}

/// Overall review status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Being edited, no chain exists.
    Draft,
    /// Chain built, no decision made yet.
    Submitted,
    /// At least one step is awaiting a decision.
    UnderReview,
    /// Approved outside the chain by the surrounding application.
    Approved,
    /// A step was rejected; the chain is halted.
    Rejected,
    /// No step is awaiting a decision and nothing was rejected.
    Finalized,
}

impl ProposalStatus {
    /// Returns the canonical snake_case name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Finalized => "finalized",
        }
    }

    /// Returns true if no further decisions can change this status.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Rejected | Self::Finalized | Self::Approved)
    }
}

/// The stored review state of a proposal.
///
/// `version` increases with every committed write to the proposal's chain,
/// so a decision can tell whether anything changed since it read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    /// Current review status.
    pub status: ProposalStatus,
    /// Number of commits applied since the chain was built.
    pub version: u64,
}

impl ProposalRecord {
    /// Creates the record of a freshly built chain.
    pub fn new(status: ProposalStatus) -> Self {
        Self { status, version: 0 }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = ApprovalError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "finalized" => Ok(Self::Finalized),
            other => Err(ApprovalError::StepStore(format!(
                "invalid proposal status: {other}"
            ))),
        }
    }
}
