//! Decision requests and their results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApprovalStep, ProposalStatus, RoleKind};

/// Who is acting, computed once per request by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerContext {
    /// The acting user.
    pub user_id: String,

    /// The review stage the user is acting in, when they hold several.
    pub effective_stage: Option<RoleKind>,
}

impl ReviewerContext {
    /// Creates a context for a user without a stage restriction.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            effective_stage: None,
        }
    }

    /// Restricts the context to one review stage.
    pub fn with_stage(mut self, stage: RoleKind) -> Self {
        self.effective_stage = Some(stage);
        self
    }

    /// Returns true if the step belongs to this reviewer's stage.
    ///
    /// Without an effective stage every step matches.
    pub fn covers(&self, step: &ApprovalStep) -> bool {
        match self.effective_stage {
            Some(stage) => step.role_required == Some(stage),
            None => true,
        }
    }
}

/// What the approver decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Approve the step.
    Approve,
    /// Reject the step and halt the chain.
    Reject,
}

/// A decision on one pending step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Approve or reject.
    pub action: DecisionAction,

    /// Free-text comment; mandatory for rejections.
    #[serde(default)]
    pub comment: Option<String>,

    /// Optional steps to forward to. Empty means "skip all downstream
    /// optional steps".
    #[serde(default)]
    pub forward_to: Vec<Uuid>,
}

impl DecisionRequest {
    /// An approval without comment or forwarding.
    pub fn approve() -> Self {
        Self {
            action: DecisionAction::Approve,
            comment: None,
            forward_to: Vec::new(),
        }
    }

    /// A rejection with a reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Reject,
            comment: Some(reason.into()),
            forward_to: Vec::new(),
        }
    }

    /// Adds a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Forwards to the given optional steps.
    pub fn forward_to(mut self, step_ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.forward_to.extend(step_ids);
        self
    }

    /// Returns the trimmed comment, if it is not blank.
    pub fn reason(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// The state after a decision was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    /// The decided step, as committed.
    pub step: ApprovalStep,

    /// The proposal status after the cascade.
    pub proposal_status: ProposalStatus,

    /// Steps approved as duplicates of the decided one.
    pub auto_approved: Vec<Uuid>,

    /// Optional steps unlocked by forwarding.
    pub unlocked: Vec<Uuid>,

    /// Optional steps skipped because nobody forwarded to them.
    pub skipped: Vec<Uuid>,

    /// The step made pending by forward activation.
    pub activated: Option<Uuid>,
}
