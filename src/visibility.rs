//! Which steps end users get to see.
//!
//! Optional steps exist as rows from the moment the chain is built, but most
//! of them only matter if an upstream approver forwards to them. Showing them
//! earlier would surface approvals that may never happen.

use crate::{ApprovalStep, StepStatus};

/// Returns true if the step should be shown to end users.
///
/// Mandatory steps are always visible. An optional step is visible once it
/// was decided (`approved` or `rejected`), or while it is unlocked and
/// awaiting a decision. Waiting and skipped optional steps are hidden.
pub fn is_visible(step: &ApprovalStep) -> bool {
    if !step.is_optional {
        return true;
    }

    match step.status {
        StepStatus::Approved | StepStatus::Rejected => true,
        StepStatus::Pending => step.optional_unlocked,
        StepStatus::Waiting | StepStatus::Skipped => false,
    }
}

/// Filters a proposal's chain down to the user-visible steps, preserving
/// order.
pub fn visible_for_ui(steps: &[ApprovalStep]) -> Vec<&ApprovalStep> {
    steps.iter().filter(|s| is_visible(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::DEFAULT_SKIP_NOTE;
    use crate::RoleKind;
    use chrono::Utc;

    fn optional(order: u32) -> ApprovalStep {
        ApprovalStep::new("p", order, Some(RoleKind::Iqac), Some("q".to_string()), true)
    }

    #[test]
    fn test_mandatory_steps_always_visible() {
        let mut step = ApprovalStep::new("p", 2, Some(RoleKind::Hod), None, false);
        assert!(is_visible(&step));
        step.mark_skipped("n/a");
        assert!(is_visible(&step));
    }

    #[test]
    fn test_locked_optional_hidden() {
        let step = optional(2);
        assert_eq!(step.status, StepStatus::Waiting);
        assert!(!is_visible(&step));
    }

    #[test]
    fn test_unlocked_optional_visible() {
        let mut step = optional(2);
        step.mark_unlocked();
        assert!(is_visible(&step));
    }

    #[test]
    fn test_skipped_after_unlock_hidden() {
        let mut step = optional(2);
        step.mark_unlocked();
        step.mark_skipped(DEFAULT_SKIP_NOTE);
        assert!(!is_visible(&step));
    }

    #[test]
    fn test_decided_optional_visible() {
        let mut approved = optional(2);
        approved.mark_unlocked();
        approved.mark_approved("q", None, Utc::now());
        assert!(is_visible(&approved));

        let mut rejected = optional(3);
        rejected.mark_unlocked();
        rejected.mark_rejected("q", "clash".to_string(), Utc::now());
        assert!(is_visible(&rejected));
    }

    #[test]
    fn test_pending_but_never_unlocked_optional_hidden() {
        let step = optional(1);
        assert_eq!(step.status, StepStatus::Pending);
        assert!(!is_visible(&step));
    }

    #[test]
    fn test_visible_for_ui_preserves_order() {
        let mut unlocked = optional(3);
        unlocked.mark_unlocked();
        let steps = vec![
            ApprovalStep::new("p", 1, Some(RoleKind::Hod), None, false),
            optional(2),
            unlocked,
            ApprovalStep::new("p", 4, Some(RoleKind::Dean), None, false),
        ];

        let visible: Vec<u32> = visible_for_ui(&steps).iter().map(|s| s.order_index).collect();
        assert_eq!(visible, vec![1, 3, 4]);
    }
}
