//! Cascade passes applied after a decision.
//!
//! Every pass works on the full chain of one proposal, in memory, and
//! returns the ids of the steps it changed. The engine runs them in a fixed
//! order and commits the union of the changes atomically:
//!
//! 1. [`auto_approve_non_optional_duplicates`]
//! 2. [`unlock_optionals_after`] or [`skip_all_downstream_optionals`]
//! 3. [`activate_next`]
//! 4. [`recompute_proposal_status`]
//!
//! Passes that find nothing to do return an empty list.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{ApprovalStep, ProposalStatus, StepStatus};

/// Approves every other open, mandatory step assigned to `approver`.
///
/// The same person is never asked twice for a mandatory sign-off on one
/// proposal. Steps are stamped with `actor` and the auto-approval note.
pub fn auto_approve_non_optional_duplicates(
    chain: &mut [ApprovalStep],
    approver: &str,
    actor: &str,
    at: DateTime<Utc>,
) -> Vec<Uuid> {
    chain
        .iter_mut()
        .filter(|s| s.is_assigned_to(approver) && !s.is_optional && s.status.is_open())
        .map(|s| {
            s.mark_auto_approved(actor, at);
            s.id
        })
        .collect()
}

/// Skips every open optional step downstream of `after_order`.
///
/// This runs when an approver does not forward to anyone.
pub fn skip_all_downstream_optionals(
    chain: &mut [ApprovalStep],
    after_order: u32,
    note: &str,
) -> Vec<Uuid> {
    chain
        .iter_mut()
        .filter(|s| s.is_downstream_of(after_order) && s.is_optional && s.status.is_open())
        .map(|s| {
            s.mark_skipped(note);
            s.id
        })
        .collect()
}

/// Unlocks the selected optional steps downstream of `after_order`.
///
/// Ids that do not name an open, still-locked optional step downstream of
/// the acting step are ignored, so a stale selection never fails the
/// approval and never unlocks an ineligible step.
pub fn unlock_optionals_after(
    chain: &mut [ApprovalStep],
    after_order: u32,
    selected: &[Uuid],
) -> Vec<Uuid> {
    chain
        .iter_mut()
        .filter(|s| {
            s.is_downstream_of(after_order)
                && s.is_optional
                && s.status.is_open()
                && !s.optional_unlocked
                && selected.contains(&s.id)
        })
        .map(|s| {
            s.mark_unlocked();
            s.id
        })
        .collect()
}

/// Lists the optional steps an approver at `after_order` may forward to.
pub fn downstream_optional_candidates(chain: &[ApprovalStep], after_order: u32) -> Vec<&ApprovalStep> {
    let mut candidates: Vec<&ApprovalStep> = chain
        .iter()
        .filter(|s| s.is_downstream_of(after_order) && s.is_optional && s.status.is_open())
        .collect();
    candidates.sort_by_key(|s| s.order_index);
    candidates
}

/// Makes the nearest waiting step after `after_order` pending.
///
/// Steps that are no longer waiting are walked past. Optional steps nobody
/// has forwarded to are walked past as well; they stay waiting until a later
/// approver unlocks or skips them.
pub fn activate_next(chain: &mut [ApprovalStep], after_order: u32) -> Option<Uuid> {
    let mut downstream: Vec<&mut ApprovalStep> = chain
        .iter_mut()
        .filter(|s| s.is_downstream_of(after_order))
        .collect();
    downstream.sort_by_key(|s| s.order_index);

    downstream
        .into_iter()
        .find(|s| s.status == StepStatus::Waiting && !s.is_locked_optional())
        .map(|s| {
            s.mark_pending();
            s.id
        })
}

/// Derives the proposal status from the chain.
///
/// Any rejection wins; otherwise the proposal is under review while a step
/// is pending and finalized once none is.
pub fn recompute_proposal_status(chain: &[ApprovalStep]) -> ProposalStatus {
    if chain.iter().any(|s| s.status == StepStatus::Rejected) {
        ProposalStatus::Rejected
    } else if chain.iter().any(|s| s.status == StepStatus::Pending) {
        ProposalStatus::UnderReview
    } else {
        ProposalStatus::Finalized
    }
}
