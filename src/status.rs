//! Chain status reporting.
//!
//! This module provides [`ChainStatus`] for inspecting where a proposal is
//! in its approval chain.

use std::fmt;

use crate::{ApprovalStep, ProposalStatus, RoleKind, StepStatus};
use chrono::{DateTime, Utc};

/// Status entry for a single step within a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatusEntry {
    /// Position in the chain.
    pub order_index: u32,
    /// The role the step represents.
    pub role: Option<RoleKind>,
    /// The assigned approver.
    pub assigned_to: Option<String>,
    /// Whether the step is optional.
    pub is_optional: bool,
    /// The current status of this step.
    pub status: StepStatus,
    /// When the step was decided.
    pub decided_at: Option<DateTime<Utc>>,
    /// System annotation, if any.
    pub note: Option<String>,
}

impl StepStatusEntry {
    /// Creates a status entry from a stored step.
    pub fn from_step(step: &ApprovalStep) -> Self {
        Self {
            order_index: step.order_index,
            role: step.role_required,
            assigned_to: step.assigned_to.clone(),
            is_optional: step.is_optional,
            status: step.status,
            decided_at: step.decided_at,
            note: step.note.clone(),
        }
    }

    /// Returns a status indicator character.
    pub fn status_char(&self) -> char {
        match self.status {
            StepStatus::Waiting => '⏳',
            StepStatus::Pending => '👀',
            StepStatus::Approved => '✅',
            StepStatus::Rejected => '❌',
            StepStatus::Skipped => '⏭',
        }
    }
}

/// A snapshot of a proposal's approval chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    /// The proposal's identifier.
    pub proposal_id: String,
    /// The recorded proposal status.
    pub proposal_status: ProposalStatus,
    /// Every step, in chain order, hidden ones included.
    pub steps: Vec<StepStatusEntry>,
}

impl ChainStatus {
    /// Creates a chain status from a proposal's steps.
    pub fn new(
        proposal_id: impl Into<String>,
        proposal_status: ProposalStatus,
        steps: &[ApprovalStep],
    ) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            proposal_status,
            steps: steps.iter().map(StepStatusEntry::from_step).collect(),
        }
    }

    /// Returns true if no step is open.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Returns true if any step was rejected.
    pub fn is_rejected(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Rejected)
    }

    /// Returns the positions of the steps awaiting a decision.
    pub fn pending_positions(&self) -> Vec<u32> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.order_index)
            .collect()
    }

    /// Returns the number of open steps without an approver.
    pub fn unassigned_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.assigned_to.is_none() && s.status.is_open())
            .count()
    }

    /// Returns the share of resolved steps as a percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.steps.is_empty() {
            return 100.0;
        }

        let resolved = self.steps.iter().filter(|s| s.status.is_terminal()).count();

        (resolved as f32 / self.steps.len() as f32) * 100.0
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Approval chain for proposal \"{}\":", self.proposal_id)?;
        writeln!(f)?;

        for step in &self.steps {
            let role = step.role.map(|r| r.as_str()).unwrap_or("-");
            let assignee = step.assigned_to.as_deref().unwrap_or("(unassigned)");
            let time_str = step
                .decided_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());

            write!(
                f,
                "  {} {:>2}. {:<18} {:<16} {:<9} {}",
                step.status_char(),
                step.order_index,
                role,
                assignee,
                step.status.as_str(),
                time_str
            )?;

            if step.is_optional {
                write!(f, "  (optional)")?;
            }

            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Progress: {:.0}%", self.progress_percent())?;
        writeln!(f, "Status: {}", self.proposal_status)?;

        let unassigned = self.unassigned_count();
        if unassigned > 0 {
            writeln!(f, "Unassigned: {} step(s)", unassigned)?;
        }

        Ok(())
    }
}
