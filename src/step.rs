//! Approval step types.
//!
//! This module defines [`ApprovalStep`], the unit of sign-off within a
//! proposal's chain, and [`StepStatus`], its lifecycle. All status changes go
//! through the `mark_*` methods so that decision metadata is stamped
//! consistently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{ApprovalError, Result, RoleKind};

/// Note stamped on steps resolved by duplicate auto-approval.
pub const AUTO_APPROVED_NOTE: &str = "Auto-approved (duplicate non-optional step for same approver).";

/// Note stamped on optional steps unlocked by a forwarding approver.
pub const UNLOCKED_NOTE: &str = "Unlocked by previous approver.";

/// Default note stamped on optional steps skipped because nobody forwarded.
pub const DEFAULT_SKIP_NOTE: &str = "Automatically skipped (not forwarded to optional approver).";

/// The status of an approval step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet actionable; an upstream step is still open.
    Waiting,

    /// Awaiting a decision from the assigned approver.
    Pending,

    /// Approved, either directly or by cascade.
    Approved,

    /// Rejected with a reason.
    Rejected,

    /// Bypassed without a decision.
    Skipped,
}

impl StepStatus {
    /// Returns true if the step has been resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Skipped)
    }

    /// Returns true if the step is still open (`pending` or `waiting`).
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Waiting)
    }

    /// Returns true if the step was decided by a person or a cascade
    /// approval (`approved` or `rejected`).
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Returns the canonical snake_case name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "skipped" => Ok(Self::Skipped),
            other => Err(ApprovalError::StepStore(format!(
                "invalid step status: {other}"
            ))),
        }
    }
}

/// One unit of required sign-off in a proposal's approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Unique identifier of the step.
    pub id: Uuid,

    /// The owning proposal.
    pub proposal_id: String,

    /// 1-based position in the chain; defines "downstream".
    pub order_index: u32,

    /// The nominal role this step represents.
    pub role_required: Option<RoleKind>,

    /// The resolved approver, if any.
    pub assigned_to: Option<String>,

    /// Whether the step can be bypassed without a decision.
    pub is_optional: bool,

    /// Set once an upstream approver forwards to this optional step. Never
    /// cleared.
    pub optional_unlocked: bool,

    /// Current status.
    pub status: StepStatus,

    /// Who approved the step (directly or by duplicate auto-approval).
    pub approved_by: Option<String>,

    /// Who resolved the step.
    pub decided_by: Option<String>,

    /// When the step was resolved.
    pub decided_at: Option<DateTime<Utc>>,

    /// Approver's free-text comment.
    pub comment: Option<String>,

    /// System-generated annotation.
    pub note: Option<String>,

    /// Optimistic concurrency counter, bumped by the store on every commit.
    pub version: u64,
}

impl ApprovalStep {
    /// Creates a new, unpersisted step.
    ///
    /// The step is `pending` when it is first in the chain and `waiting`
    /// otherwise.
    pub fn new(
        proposal_id: impl Into<String>,
        order_index: u32,
        role_required: Option<RoleKind>,
        assigned_to: Option<String>,
        is_optional: bool,
    ) -> Self {
        let status = if order_index == 1 {
            StepStatus::Pending
        } else {
            StepStatus::Waiting
        };

        Self {
            id: Uuid::new_v4(),
            proposal_id: proposal_id.into(),
            order_index,
            role_required,
            assigned_to,
            is_optional,
            optional_unlocked: false,
            status,
            approved_by: None,
            decided_by: None,
            decided_at: None,
            comment: None,
            note: None,
            version: 0,
        }
    }

    /// Returns true if the step is assigned to the given user.
    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.assigned_to.as_deref() == Some(user_id)
    }

    /// Returns true if the step has no resolved approver.
    pub fn is_unassigned(&self) -> bool {
        self.assigned_to.is_none()
    }

    /// Returns true if this step is after `order_index` in the chain.
    pub fn is_downstream_of(&self, order_index: u32) -> bool {
        self.order_index > order_index
    }

    /// Returns true if the step is optional and has not been forwarded to.
    pub fn is_locked_optional(&self) -> bool {
        self.is_optional && !self.optional_unlocked
    }

    /// Returns true if the step is actionable by its approver: pending and
    /// either mandatory or explicitly unlocked.
    pub fn is_actionable(&self) -> bool {
        self.status == StepStatus::Pending && (!self.is_optional || self.optional_unlocked)
    }

    /// Records a direct approval by `actor`.
    pub fn mark_approved(&mut self, actor: &str, comment: Option<String>, at: DateTime<Utc>) {
        self.status = StepStatus::Approved;
        self.approved_by = Some(actor.to_string());
        self.decided_by = Some(actor.to_string());
        self.decided_at = Some(at);
        self.comment = comment;
    }

    /// Records an approval by duplicate suppression.
    pub fn mark_auto_approved(&mut self, actor: &str, at: DateTime<Utc>) {
        self.status = StepStatus::Approved;
        self.approved_by = Some(actor.to_string());
        self.decided_by = Some(actor.to_string());
        self.decided_at = Some(at);
        self.note = Some(AUTO_APPROVED_NOTE.to_string());
    }

    /// Records a rejection by `actor` with a reason.
    pub fn mark_rejected(&mut self, actor: &str, reason: String, at: DateTime<Utc>) {
        self.status = StepStatus::Rejected;
        self.decided_by = Some(actor.to_string());
        self.decided_at = Some(at);
        self.comment = Some(reason);
    }

    /// Skips the step with a system note.
    pub fn mark_skipped(&mut self, note: &str) {
        self.status = StepStatus::Skipped;
        self.note = Some(note.to_string());
    }

    /// Unlocks an optional step and makes it actionable.
    ///
    /// This is the one sanctioned backward move of the state machine
    /// (`waiting -> pending`).
    pub fn mark_unlocked(&mut self) {
        self.optional_unlocked = true;
        self.status = StepStatus::Pending;
        self.note = Some(UNLOCKED_NOTE.to_string());
    }

    /// Makes a waiting step actionable.
    pub fn mark_pending(&mut self) {
        self.status = StepStatus::Pending;
    }
}
