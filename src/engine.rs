//! The approval engine.
//!
//! This module provides [`ApprovalEngine`] and [`ApprovalEngineBuilder`].
//! The engine owns the collaborators (directory and flow templates) and the
//! event channel; persistence is passed into every call so the same engine
//! can serve any [`StepStore`].

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::cascade::{
    activate_next, auto_approve_non_optional_duplicates, recompute_proposal_status,
    skip_all_downstream_optionals, unlock_optionals_after,
};
use crate::config::{EngineConfig, DEFAULT_EVENT_CHANNEL_CAPACITY};
use crate::step::DEFAULT_SKIP_NOTE;
use crate::visibility::is_visible;
use crate::{
    ApprovalError, ApprovalEvent, ApprovalStep, ChainBuilder, ChainSnapshot, ChainStatus,
    DecisionAction, DecisionOutcome, DecisionRequest, DirectoryLookup, FlowTemplateStore,
    Proposal, ProposalStatus, Result, ReviewerContext, StepStatus, StepStore,
};

/// Drives approval chains: builds them, applies decisions and answers
/// queries about them.
///
/// # Example
///
/// ```
/// use signoff::{
///     ApprovalEngine, DecisionRequest, FlowTemplateEntry, MemoryStepStore, Proposal,
///     ProposalStatus, ReviewerContext, RoleKind, StaticDirectory, StaticFlowTemplates,
/// };
///
/// #[derive(Debug)]
/// struct Event {
///     id: String,
/// }
///
/// impl Proposal for Event {
///     fn id(&self) -> &str {
///         &self.id
///     }
///     fn organization_id(&self) -> &str {
///         "sci"
///     }
///     fn faculty_incharge_ids(&self) -> &[String] {
///         &[]
///     }
/// }
///
/// # async fn example() -> signoff::Result<()> {
/// let engine = ApprovalEngine::builder()
///     .directory(StaticDirectory::new().with_holder("sci", RoleKind::Hod, "hod-1"))
///     .templates(StaticFlowTemplates::new().with_template(
///         "sci",
///         vec![FlowTemplateEntry::role(1, RoleKind::Hod)],
///     ))
///     .build()?;
///
/// let mut store = MemoryStepStore::new();
/// let chain = engine
///     .build_chain(&Event { id: "ev-1".into() }, &mut store)
///     .await?;
///
/// let outcome = engine
///     .decide_step(
///         chain[0].id,
///         &ReviewerContext::new("hod-1"),
///         DecisionRequest::approve(),
///         &mut store,
///     )
///     .await?;
/// assert_eq!(outcome.proposal_status, ProposalStatus::Finalized);
/// # Ok(())
/// # }
/// ```
pub struct ApprovalEngine {
    directory: Arc<dyn DirectoryLookup>,
    templates: Arc<dyn FlowTemplateStore>,
    skip_note: String,
    event_tx: broadcast::Sender<ApprovalEvent>,
}

impl ApprovalEngine {
    /// Creates a new engine builder.
    pub fn builder() -> ApprovalEngineBuilder {
        ApprovalEngineBuilder::new()
    }

    /// Subscribes to approval events.
    ///
    /// Events are not persisted; if the receiver is too slow, events may be
    /// dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.event_tx.subscribe()
    }

    /// Emits an event to all subscribers.
    ///
    /// Ignores send errors (no subscribers).
    fn emit(&self, event: ApprovalEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the note stamped on skipped optional steps.
    pub fn skip_note(&self) -> &str {
        &self.skip_note
    }

    /// Builds and persists the approval chain for a proposal.
    ///
    /// A non-empty chain leaves the proposal `submitted`; an empty chain has
    /// nothing to wait for and finalizes it immediately.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::ChainAlreadyExists`] if the proposal already has a
    ///   chain
    /// - template, configuration and persistence failures
    pub async fn build_chain<S: StepStore + ?Sized>(
        &self,
        proposal: &dyn Proposal,
        store: &mut S,
    ) -> Result<Vec<ApprovalStep>> {
        let span = info_span!("build_chain", proposal_id = %proposal.id());
        async {
            let builder = ChainBuilder::new(self.directory.as_ref(), self.templates.as_ref());
            let steps = builder.build(proposal).await?;

            let status = if steps.is_empty() {
                ProposalStatus::Finalized
            } else {
                ProposalStatus::Submitted
            };
            store.insert_chain(proposal.id(), &steps, status).await?;

            let unassigned = steps.iter().filter(|s| s.is_unassigned()).count();
            info!(steps = steps.len(), unassigned, %status, "approval chain built");

            self.emit(ApprovalEvent::ChainBuilt {
                proposal_id: proposal.id().to_string(),
                steps: steps.len(),
                unassigned,
            });

            Ok(steps)
        }
        .instrument(span)
        .await
    }

    /// Applies a decision to a pending step and runs the cascade.
    ///
    /// An approval runs, in order: duplicate auto-approval for the approver,
    /// the unlock pass (when `forward_to` is non-empty) or the skip pass,
    /// forward activation, and the proposal status recompute. A rejection
    /// halts the chain. Every change is committed in one atomic write.
    ///
    /// # Errors
    ///
    /// Precondition failures leave the store untouched:
    ///
    /// - [`ApprovalError::StepNotFound`] if the step does not exist
    /// - [`ApprovalError::ProposalClosed`] if the proposal is no longer under
    ///   review
    /// - [`ApprovalError::NotAssignee`] if the step belongs to someone else
    /// - [`ApprovalError::StepNotPending`] if the step is not `pending`, or
    ///   is an optional step nobody forwarded to
    /// - [`ApprovalError::MissingRejectionReason`] for a rejection without a
    ///   comment
    /// - [`ApprovalError::ProposalConflict`] or [`ApprovalError::Conflict`]
    ///   if another write to the proposal got there first
    pub async fn decide_step<S: StepStore + ?Sized>(
        &self,
        step_id: Uuid,
        ctx: &ReviewerContext,
        request: DecisionRequest,
        store: &mut S,
    ) -> Result<DecisionOutcome> {
        let span = info_span!(
            "decide_step",
            %step_id,
            user_id = %ctx.user_id,
            action = ?request.action
        );
        self.decide_step_internal(step_id, ctx, request, store)
            .instrument(span)
            .await
    }

    async fn decide_step_internal<S: StepStore + ?Sized>(
        &self,
        step_id: Uuid,
        ctx: &ReviewerContext,
        request: DecisionRequest,
        store: &mut S,
    ) -> Result<DecisionOutcome> {
        let proposal_id = store
            .get_step(step_id)
            .await?
            .ok_or(ApprovalError::StepNotFound(step_id))?
            .proposal_id;

        // Preconditions are checked against the snapshot the commit is
        // versioned on, so any write that lands in between voids them.
        let ChainSnapshot {
            proposal,
            steps: mut chain,
        } = store
            .load_snapshot(&proposal_id)
            .await?
            .ok_or_else(|| ApprovalError::ProposalNotFound(proposal_id.clone()))?;
        let previous_status = proposal.status;
        if previous_status.is_closed() {
            return Err(ApprovalError::ProposalClosed(proposal_id));
        }

        let position = chain
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(ApprovalError::StepNotFound(step_id))?;

        let step = &chain[position];
        if !step.is_assigned_to(&ctx.user_id) {
            return Err(ApprovalError::NotAssignee {
                step_id,
                user_id: ctx.user_id.clone(),
            });
        }
        if step.status != StepStatus::Pending {
            return Err(ApprovalError::StepNotPending {
                step_id,
                status: step.status.to_string(),
            });
        }
        if step.is_locked_optional() {
            return Err(ApprovalError::StepNotPending {
                step_id,
                status: "locked".to_string(),
            });
        }

        let after = step.order_index;
        let actor = ctx.user_id.as_str();
        let now = Utc::now();

        let mut outcome_ids = OutcomeIds::default();
        let mut events = Vec::new();

        match request.action {
            DecisionAction::Reject => {
                let reason = request
                    .reason()
                    .ok_or(ApprovalError::MissingRejectionReason)?
                    .to_string();
                chain[position].mark_rejected(actor, reason.clone(), now);
                events.push(ApprovalEvent::StepRejected {
                    proposal_id: proposal_id.clone(),
                    step_id,
                    approver: actor.to_string(),
                    reason,
                });
            }
            DecisionAction::Approve => {
                let comment = request.reason().map(str::to_string);
                chain[position].mark_approved(actor, comment, now);
                events.push(ApprovalEvent::StepApproved {
                    proposal_id: proposal_id.clone(),
                    step_id,
                    approver: actor.to_string(),
                });

                outcome_ids.auto_approved =
                    auto_approve_non_optional_duplicates(&mut chain, actor, actor, now);
                debug!(count = outcome_ids.auto_approved.len(), "duplicate auto-approval pass");

                if request.forward_to.is_empty() {
                    outcome_ids.skipped =
                        skip_all_downstream_optionals(&mut chain, after, &self.skip_note);
                    debug!(count = outcome_ids.skipped.len(), "skip pass");
                } else {
                    outcome_ids.unlocked =
                        unlock_optionals_after(&mut chain, after, &request.forward_to);
                    debug!(
                        requested = request.forward_to.len(),
                        count = outcome_ids.unlocked.len(),
                        "unlock pass"
                    );
                }

                outcome_ids.activated = activate_next(&mut chain, after);
                debug!(activated = ?outcome_ids.activated, "forward activation");

                for id in &outcome_ids.auto_approved {
                    events.push(ApprovalEvent::StepAutoApproved {
                        proposal_id: proposal_id.clone(),
                        step_id: *id,
                        approver: actor.to_string(),
                    });
                }
                for id in &outcome_ids.unlocked {
                    events.push(ApprovalEvent::StepUnlocked {
                        proposal_id: proposal_id.clone(),
                        step_id: *id,
                    });
                }
                for id in &outcome_ids.skipped {
                    events.push(ApprovalEvent::StepSkipped {
                        proposal_id: proposal_id.clone(),
                        step_id: *id,
                    });
                }
                if let Some(id) = outcome_ids.activated {
                    events.push(ApprovalEvent::StepActivated {
                        proposal_id: proposal_id.clone(),
                        step_id: id,
                    });
                }
            }
        }

        let new_status = recompute_proposal_status(&chain);

        let touched = outcome_ids.touched(step_id);
        let changed: Vec<ApprovalStep> = chain
            .iter()
            .filter(|s| touched.contains(&s.id))
            .cloned()
            .collect();
        store
            .commit(&proposal_id, proposal.version, &changed, new_status)
            .await?;

        let mut committed = chain[position].clone();
        committed.version += 1;

        info!(
            changed = changed.len(),
            from = %previous_status,
            to = %new_status,
            "decision committed"
        );

        for event in events {
            self.emit(event);
        }
        if new_status != previous_status {
            self.emit(ApprovalEvent::ProposalStatusChanged {
                proposal_id,
                from: previous_status,
                to: new_status,
            });
        }

        Ok(DecisionOutcome {
            step: committed,
            proposal_status: new_status,
            auto_approved: outcome_ids.auto_approved,
            unlocked: outcome_ids.unlocked,
            skipped: outcome_ids.skipped,
            activated: outcome_ids.activated,
        })
    }

    /// Lists the steps a user can act on now.
    pub async fn pending_steps_for_user<S: StepStore + ?Sized>(
        &self,
        user_id: &str,
        store: &S,
    ) -> Result<Vec<ApprovalStep>> {
        store.pending_for_user(user_id).await
    }

    /// Lists the steps a reviewer can act on now, narrowed to their
    /// effective stage when one is set.
    pub async fn pending_steps_for<S: StepStore + ?Sized>(
        &self,
        ctx: &ReviewerContext,
        store: &S,
    ) -> Result<Vec<ApprovalStep>> {
        let steps = store.pending_for_user(&ctx.user_id).await?;
        Ok(steps.into_iter().filter(|s| ctx.covers(s)).collect())
    }

    /// Returns the user-visible steps of a proposal's chain, in order.
    pub async fn visible_steps<S: StepStore + ?Sized>(
        &self,
        proposal_id: &str,
        store: &S,
    ) -> Result<Vec<ApprovalStep>> {
        let chain = store.get_chain(proposal_id).await?;
        Ok(chain.into_iter().filter(is_visible).collect())
    }

    /// Lists the optional steps the approver of `step_id` may forward to.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::StepNotFound`] if the step does not exist.
    pub async fn downstream_optional_candidates<S: StepStore + ?Sized>(
        &self,
        step_id: Uuid,
        store: &S,
    ) -> Result<Vec<ApprovalStep>> {
        let step = store
            .get_step(step_id)
            .await?
            .ok_or(ApprovalError::StepNotFound(step_id))?;
        let chain = store.get_chain(&step.proposal_id).await?;

        Ok(crate::cascade::downstream_optional_candidates(&chain, step.order_index)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Lists open steps whose approver could not be resolved.
    pub async fn unassigned_steps<S: StepStore + ?Sized>(&self, store: &S) -> Result<Vec<ApprovalStep>> {
        store.unassigned_steps().await
    }

    /// Assigns an approver to an open, unassigned step.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::StepNotFound`] if the step does not exist
    /// - [`ApprovalError::AlreadyAssigned`] if the step has an approver
    /// - [`ApprovalError::StepNotPending`] if the step is already resolved
    /// - [`ApprovalError::ProposalClosed`] if the proposal is closed
    /// - [`ApprovalError::ProposalConflict`] or [`ApprovalError::Conflict`]
    ///   if the proposal changed while assigning
    pub async fn assign_approver<S: StepStore + ?Sized>(
        &self,
        step_id: Uuid,
        user_id: &str,
        store: &mut S,
    ) -> Result<ApprovalStep> {
        let mut step = store
            .get_step(step_id)
            .await?
            .ok_or(ApprovalError::StepNotFound(step_id))?;

        if let Some(current) = &step.assigned_to {
            return Err(ApprovalError::AlreadyAssigned {
                step_id,
                user_id: current.clone(),
            });
        }
        if step.status.is_terminal() {
            return Err(ApprovalError::StepNotPending {
                step_id,
                status: step.status.to_string(),
            });
        }

        let proposal = store
            .get_proposal(&step.proposal_id)
            .await?
            .ok_or_else(|| ApprovalError::ProposalNotFound(step.proposal_id.clone()))?;
        if proposal.status.is_closed() {
            return Err(ApprovalError::ProposalClosed(step.proposal_id));
        }

        // The status is written back unchanged; the version check keeps a
        // newer status from being overwritten.
        step.assigned_to = Some(user_id.to_string());
        store
            .commit(
                &step.proposal_id,
                proposal.version,
                std::slice::from_ref(&step),
                proposal.status,
            )
            .await?;
        step.version += 1;

        info!(%step_id, user_id, "approver assigned");
        self.emit(ApprovalEvent::ApproverAssigned {
            proposal_id: step.proposal_id.clone(),
            step_id,
            user_id: user_id.to_string(),
        });

        Ok(step)
    }

    /// Returns the recorded status of a proposal.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::ProposalNotFound`] if no chain was built.
    pub async fn proposal_status<S: StepStore + ?Sized>(
        &self,
        proposal_id: &str,
        store: &S,
    ) -> Result<ProposalStatus> {
        store
            .get_proposal_status(proposal_id)
            .await?
            .ok_or_else(|| ApprovalError::ProposalNotFound(proposal_id.to_string()))
    }

    /// Returns a status report of a proposal's full chain.
    pub async fn status<S: StepStore + ?Sized>(&self, proposal_id: &str, store: &S) -> Result<ChainStatus> {
        let proposal_status = self.proposal_status(proposal_id, store).await?;
        let chain = store.get_chain(proposal_id).await?;
        Ok(ChainStatus::new(proposal_id, proposal_status, &chain))
    }
}

impl std::fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("skip_note", &self.skip_note)
            .field("subscribers", &self.event_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Step ids changed by one decision, per pass.
#[derive(Default)]
struct OutcomeIds {
    auto_approved: Vec<Uuid>,
    unlocked: Vec<Uuid>,
    skipped: Vec<Uuid>,
    activated: Option<Uuid>,
}

impl OutcomeIds {
    fn touched(&self, decided: Uuid) -> Vec<Uuid> {
        let mut ids = vec![decided];
        ids.extend(&self.auto_approved);
        ids.extend(&self.unlocked);
        ids.extend(&self.skipped);
        ids.extend(self.activated);
        ids
    }
}

/// Builder for constructing [`ApprovalEngine`] instances.
///
/// Both collaborators are required.
pub struct ApprovalEngineBuilder {
    directory: Option<Arc<dyn DirectoryLookup>>,
    templates: Option<Arc<dyn FlowTemplateStore>>,
    skip_note: String,
    event_capacity: usize,
}

impl ApprovalEngineBuilder {
    fn new() -> Self {
        Self {
            directory: None,
            templates: None,
            skip_note: DEFAULT_SKIP_NOTE.to_string(),
            event_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Sets the directory used to resolve approvers.
    pub fn directory(mut self, directory: impl DirectoryLookup + 'static) -> Self {
        self.directory = Some(Arc::new(directory));
        self
    }

    /// Sets a directory shared with other components.
    pub fn shared_directory(mut self, directory: Arc<dyn DirectoryLookup>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Sets the flow template source.
    pub fn templates(mut self, templates: impl FlowTemplateStore + 'static) -> Self {
        self.templates = Some(Arc::new(templates));
        self
    }

    /// Sets a flow template source shared with other components.
    pub fn shared_templates(mut self, templates: Arc<dyn FlowTemplateStore>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Overrides the note stamped on skipped optional steps.
    pub fn skip_note(mut self, note: impl Into<String>) -> Self {
        self.skip_note = note.into();
        self
    }

    /// Sets the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Applies the engine-level settings of a loaded configuration.
    pub fn config(self, config: &EngineConfig) -> Self {
        self.skip_note(config.notes.skip_note.clone())
            .event_capacity(config.events.channel_capacity)
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidConfiguration`] if a collaborator is
    /// missing, the skip note is blank or the event capacity is zero.
    pub fn build(self) -> Result<ApprovalEngine> {
        let directory = self.directory.ok_or_else(|| {
            ApprovalError::InvalidConfiguration("a directory lookup is required".to_string())
        })?;
        let templates = self.templates.ok_or_else(|| {
            ApprovalError::InvalidConfiguration("a flow template store is required".to_string())
        })?;
        if self.skip_note.trim().is_empty() {
            return Err(ApprovalError::InvalidConfiguration(
                "skip note must not be empty".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ApprovalError::InvalidConfiguration(
                "event capacity must be greater than zero".to_string(),
            ));
        }

        let (event_tx, _) = broadcast::channel(self.event_capacity);

        Ok(ApprovalEngine {
            directory,
            templates,
            skip_note: self.skip_note,
            event_tx,
        })
    }
}

impl Default for ApprovalEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{AUTO_APPROVED_NOTE, UNLOCKED_NOTE};
    use crate::{
        FlowConfig, FlowTemplateEntry, MemoryStepStore, RoleKind, StaticDirectory,
        StaticFlowTemplates,
    };

    #[derive(Debug)]
    struct TestProposal {
        id: String,
        organization: String,
        faculty: Vec<String>,
    }

    impl TestProposal {
        fn new(id: &str, organization: &str) -> Self {
            Self {
                id: id.to_string(),
                organization: organization.to_string(),
                faculty: Vec::new(),
            }
        }

        fn with_faculty(mut self, faculty: &[&str]) -> Self {
            self.faculty = faculty.iter().map(|f| f.to_string()).collect();
            self
        }
    }

    impl Proposal for TestProposal {
        fn id(&self) -> &str {
            &self.id
        }

        fn organization_id(&self) -> &str {
            &self.organization
        }

        fn faculty_incharge_ids(&self) -> &[String] {
            &self.faculty
        }
    }

    /// HOD mandatory, DIRECTOR optional.
    fn sci_engine() -> ApprovalEngine {
        ApprovalEngine::builder()
            .directory(
                StaticDirectory::new()
                    .with_holder("sci", RoleKind::Hod, "hod-sci")
                    .with_holder("sci", RoleKind::Director, "director"),
            )
            .templates(StaticFlowTemplates::new().with_template(
                "sci",
                vec![
                    FlowTemplateEntry::role(1, RoleKind::Hod),
                    FlowTemplateEntry::role(2, RoleKind::Director).optional(),
                ],
            ))
            .build()
            .unwrap()
    }

    /// HOD, IQAC (optional), DEAN, DIRECTOR (optional), PRINCIPAL.
    fn long_engine() -> ApprovalEngine {
        ApprovalEngine::builder()
            .directory(
                StaticDirectory::new()
                    .with_holder("eng", RoleKind::Hod, "hod")
                    .with_holder("eng", RoleKind::Iqac, "iqac")
                    .with_holder("eng", RoleKind::Dean, "dean")
                    .with_holder("eng", RoleKind::Director, "director")
                    .with_holder("eng", RoleKind::Principal, "principal"),
            )
            .templates(StaticFlowTemplates::new().with_template(
                "eng",
                vec![
                    FlowTemplateEntry::role(1, RoleKind::Hod),
                    FlowTemplateEntry::role(2, RoleKind::Iqac).optional(),
                    FlowTemplateEntry::role(3, RoleKind::Dean),
                    FlowTemplateEntry::role(4, RoleKind::Director).optional(),
                    FlowTemplateEntry::role(5, RoleKind::Principal),
                ],
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = ApprovalEngine::builder().build();
        assert!(matches!(result, Err(ApprovalError::InvalidConfiguration(_))));

        let result = ApprovalEngine::builder()
            .directory(StaticDirectory::new())
            .build();
        assert!(matches!(result, Err(ApprovalError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_builder_rejects_zero_capacity() {
        let result = ApprovalEngine::builder()
            .directory(StaticDirectory::new())
            .templates(StaticFlowTemplates::new())
            .event_capacity(0)
            .build();
        assert!(matches!(result, Err(ApprovalError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_builder_applies_config() {
        let mut config = EngineConfig::default();
        config.notes.skip_note = "Not needed.".to_string();

        let engine = ApprovalEngine::builder()
            .directory(StaticDirectory::new())
            .templates(StaticFlowTemplates::new())
            .config(&config)
            .build()
            .unwrap();
        assert_eq!(engine.skip_note(), "Not needed.");
    }

    #[tokio::test]
    async fn test_build_chain_persists_and_submits() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();

        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(store.get_chain("p1").await.unwrap(), chain);
        assert_eq!(
            engine.proposal_status("p1", &store).await.unwrap(),
            ProposalStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_build_chain_twice_is_refused() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        let proposal = TestProposal::new("p1", "sci");

        engine.build_chain(&proposal, &mut store).await.unwrap();
        let result = engine.build_chain(&proposal, &mut store).await;

        assert!(matches!(result, Err(ApprovalError::ChainAlreadyExists(_))));
        assert_eq!(store.step_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_chain_finalizes() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();

        let chain = engine
            .build_chain(&TestProposal::new("p1", "unknown-org"), &mut store)
            .await
            .unwrap();

        assert!(chain.is_empty());
        assert_eq!(
            engine.proposal_status("p1", &store).await.unwrap(),
            ProposalStatus::Finalized
        );
    }

    #[tokio::test]
    async fn test_sci_without_forwarding() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        // The optional step is not in anyone's inbox yet
        assert!(engine
            .pending_steps_for_user("director", &store)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(engine.visible_steps("p1", &store).await.unwrap().len(), 1);

        let outcome = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod-sci"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.skipped, vec![chain[1].id]);
        assert_eq!(outcome.activated, None);
        assert_eq!(outcome.proposal_status, ProposalStatus::Finalized);

        let director = store.get_step(chain[1].id).await.unwrap().unwrap();
        assert_eq!(director.status, StepStatus::Skipped);
        assert_eq!(director.note.as_deref(), Some(DEFAULT_SKIP_NOTE));

        let visible = engine.visible_steps("p1", &store).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].role_required, Some(RoleKind::Hod));
    }

    #[tokio::test]
    async fn test_sci_with_forwarding() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        let candidates = engine
            .downstream_optional_candidates(chain[0].id, &store)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, chain[1].id);

        let outcome = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod-sci"),
                DecisionRequest::approve().forward_to([chain[1].id]),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.unlocked, vec![chain[1].id]);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.proposal_status, ProposalStatus::UnderReview);

        let inbox = engine.pending_steps_for_user("director", &store).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].note.as_deref(), Some(UNLOCKED_NOTE));
        assert_eq!(engine.visible_steps("p1", &store).await.unwrap().len(), 2);

        let outcome = engine
            .decide_step(
                chain[1].id,
                &ReviewerContext::new("director"),
                DecisionRequest::approve().with_comment("Approved."),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.proposal_status, ProposalStatus::Finalized);
        assert_eq!(outcome.step.comment.as_deref(), Some("Approved."));
        assert_eq!(engine.visible_steps("p1", &store).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_forwarding_leaves_unselected_optionals_waiting() {
        let engine = long_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "eng"), &mut store)
            .await
            .unwrap();
        let director = chain[3].id;

        // HOD forwards to DIRECTOR only; IQAC stays locked
        let outcome = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod"),
                DecisionRequest::approve().forward_to([director]),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.unlocked, vec![director]);
        assert_eq!(outcome.activated, Some(chain[2].id));

        let stored = store.get_chain("p1").await.unwrap();
        assert_eq!(stored[1].status, StepStatus::Waiting);
        assert!(!stored[1].optional_unlocked);
        assert_eq!(stored[2].status, StepStatus::Pending);
        assert_eq!(stored[3].status, StepStatus::Pending);
        assert_eq!(stored[4].status, StepStatus::Waiting);
    }

    #[tokio::test]
    async fn test_unlock_chains_relative_to_acting_step() {
        let engine = long_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "eng"), &mut store)
            .await
            .unwrap();

        engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod"),
                DecisionRequest::approve().forward_to([chain[1].id]),
                &mut store,
            )
            .await
            .unwrap();

        // IQAC forwards on to DIRECTOR
        let outcome = engine
            .decide_step(
                chain[1].id,
                &ReviewerContext::new("iqac"),
                DecisionRequest::approve().forward_to([chain[3].id]),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.unlocked, vec![chain[3].id]);
        let stored = store.get_step(chain[3].id).await.unwrap().unwrap();
        assert!(stored.optional_unlocked);
        assert_eq!(stored.status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_skip_after_unlock_hides_step() {
        let engine = long_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "eng"), &mut store)
            .await
            .unwrap();

        engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod"),
                DecisionRequest::approve().forward_to([chain[3].id]),
                &mut store,
            )
            .await
            .unwrap();

        // DEAN does not forward; the unlocked DIRECTOR step downstream is skipped
        let outcome = engine
            .decide_step(
                chain[2].id,
                &ReviewerContext::new("dean"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();

        assert!(outcome.skipped.contains(&chain[3].id));
        assert_eq!(outcome.activated, Some(chain[4].id));

        let visible: Vec<Uuid> = engine
            .visible_steps("p1", &store)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert!(!visible.contains(&chain[3].id));
    }

    #[tokio::test]
    async fn test_duplicate_steps_are_auto_approved() {
        let engine = ApprovalEngine::builder()
            .directory(
                StaticDirectory::new()
                    .with_holder("org", RoleKind::Hod, "same")
                    .with_holder("org", RoleKind::Dean, "dean")
                    .with_holder("org", RoleKind::Principal, "same"),
            )
            .templates(StaticFlowTemplates::new().with_template(
                "org",
                vec![
                    FlowTemplateEntry::role(1, RoleKind::Hod),
                    FlowTemplateEntry::role(2, RoleKind::Dean),
                    FlowTemplateEntry::role(3, RoleKind::Principal),
                ],
            ))
            .build()
            .unwrap();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "org"), &mut store)
            .await
            .unwrap();

        let outcome = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("same"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.auto_approved, vec![chain[2].id]);
        assert_eq!(outcome.activated, Some(chain[1].id));

        let principal = store.get_step(chain[2].id).await.unwrap().unwrap();
        assert_eq!(principal.status, StepStatus::Approved);
        assert_eq!(principal.note.as_deref(), Some(AUTO_APPROVED_NOTE));

        let outcome = engine
            .decide_step(
                chain[1].id,
                &ReviewerContext::new("dean"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();
        assert_eq!(outcome.activated, None);
        assert_eq!(outcome.proposal_status, ProposalStatus::Finalized);
    }

    #[tokio::test]
    async fn test_faculty_incharge_first() {
        let engine = ApprovalEngine::builder()
            .directory(StaticDirectory::new().with_holder("org", RoleKind::Hod, "hod"))
            .templates(
                StaticFlowTemplates::new()
                    .with_template(
                        "org",
                        vec![
                            FlowTemplateEntry::role(1, RoleKind::FacultyIncharge),
                            FlowTemplateEntry::role(2, RoleKind::Hod),
                        ],
                    )
                    .with_config(
                        "org",
                        FlowConfig {
                            require_faculty_incharge_first: true,
                        },
                    ),
            )
            .build()
            .unwrap();
        let mut store = MemoryStepStore::new();

        let chain = engine
            .build_chain(
                &TestProposal::new("p1", "org").with_faculty(&["f1", "f2"]),
                &mut store,
            )
            .await
            .unwrap();

        let roles: Vec<Option<RoleKind>> = chain.iter().map(|s| s.role_required).collect();
        assert_eq!(
            roles,
            vec![
                Some(RoleKind::FacultyIncharge),
                Some(RoleKind::FacultyIncharge),
                Some(RoleKind::Hod)
            ]
        );

        let outcome = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("f1"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();
        assert_eq!(outcome.activated, Some(chain[1].id));
    }

    #[tokio::test]
    async fn test_reject_halts_chain() {
        let engine = long_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "eng"), &mut store)
            .await
            .unwrap();

        let outcome = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod"),
                DecisionRequest::reject("  Venue unavailable. "),
                &mut store,
            )
            .await
            .unwrap();

        assert_eq!(outcome.proposal_status, ProposalStatus::Rejected);
        assert_eq!(outcome.step.comment.as_deref(), Some("Venue unavailable."));
        assert_eq!(outcome.activated, None);

        let stored = store.get_chain("p1").await.unwrap();
        assert!(stored[1..].iter().all(|s| s.status == StepStatus::Waiting));
        assert!(engine
            .pending_steps_for_user("dean", &store)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reject_requires_reason() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        let result = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod-sci"),
                DecisionRequest::reject("   "),
                &mut store,
            )
            .await;

        assert!(matches!(result, Err(ApprovalError::MissingRejectionReason)));
        let stored = store.get_step(chain[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, StepStatus::Pending);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_decision_preconditions() {
        let engine = long_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "eng"), &mut store)
            .await
            .unwrap();

        let result = engine
            .decide_step(
                Uuid::new_v4(),
                &ReviewerContext::new("hod"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::StepNotFound(_))));

        let result = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("dean"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::NotAssignee { .. })));

        let result = engine
            .decide_step(
                chain[2].id,
                &ReviewerContext::new("dean"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::StepNotPending { .. })));
    }

    #[tokio::test]
    async fn test_locked_optional_step_cannot_be_decided() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        let steps = vec![
            ApprovalStep::new("p1", 1, Some(RoleKind::Iqac), Some("iqac".to_string()), true),
            ApprovalStep::new("p1", 2, Some(RoleKind::Hod), Some("hod-sci".to_string()), false),
        ];
        store
            .insert_chain("p1", &steps, ProposalStatus::Submitted)
            .await
            .unwrap();

        assert!(engine
            .pending_steps_for_user("iqac", &store)
            .await
            .unwrap()
            .is_empty());

        let result = engine
            .decide_step(
                steps[0].id,
                &ReviewerContext::new("iqac"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await;
        assert!(
            matches!(result, Err(ApprovalError::StepNotPending { ref status, .. }) if status == "locked")
        );
        assert_eq!(store.get_step(steps[0].id).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_assignment_bumps_proposal_version() {
        let engine = ApprovalEngine::builder()
            .directory(StaticDirectory::new().with_holder("org", RoleKind::Hod, "hod"))
            .templates(StaticFlowTemplates::new().with_template(
                "org",
                vec![
                    FlowTemplateEntry::role(1, RoleKind::Hod),
                    FlowTemplateEntry::role(2, RoleKind::Registrar),
                ],
            ))
            .build()
            .unwrap();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "org"), &mut store)
            .await
            .unwrap();

        engine
            .assign_approver(chain[1].id, "registrar", &mut store)
            .await
            .unwrap();

        let record = store.get_proposal("p1").await.unwrap().unwrap();
        assert_eq!(record.status, ProposalStatus::Submitted);
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_decision_after_rejection_is_refused() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod-sci"),
                DecisionRequest::reject("No."),
                &mut store,
            )
            .await
            .unwrap();

        let result = engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod-sci"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::ProposalClosed(_))));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_one_wins() {
        let engine = Arc::new(sci_engine());
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();
        let step_id = chain[0].id;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            let mut store = store.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .decide_step(
                        step_id,
                        &ReviewerContext::new("hod-sci"),
                        DecisionRequest::approve(),
                        &mut store,
                    )
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(e.is_precondition(), "unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.get_step(step_id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_unassigned_step_and_assignment() {
        let engine = ApprovalEngine::builder()
            .directory(StaticDirectory::new().with_holder("org", RoleKind::Hod, "hod"))
            .templates(StaticFlowTemplates::new().with_template(
                "org",
                vec![
                    FlowTemplateEntry::role(1, RoleKind::Hod),
                    FlowTemplateEntry::role(2, RoleKind::Registrar),
                ],
            ))
            .build()
            .unwrap();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "org"), &mut store)
            .await
            .unwrap();

        let unassigned = engine.unassigned_steps(&store).await.unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].id, chain[1].id);

        let assigned = engine
            .assign_approver(chain[1].id, "registrar", &mut store)
            .await
            .unwrap();
        assert_eq!(assigned.assigned_to.as_deref(), Some("registrar"));
        assert!(engine.unassigned_steps(&store).await.unwrap().is_empty());

        let result = engine
            .assign_approver(chain[1].id, "someone-else", &mut store)
            .await;
        assert!(matches!(result, Err(ApprovalError::AlreadyAssigned { .. })));

        engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();
        let inbox = engine.pending_steps_for_user("registrar", &store).await.unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_steps_for_filters_by_stage() {
        let engine = ApprovalEngine::builder()
            .directory(
                StaticDirectory::new()
                    .with_holder("a", RoleKind::Hod, "multi")
                    .with_holder("b", RoleKind::Dean, "multi"),
            )
            .templates(
                StaticFlowTemplates::new()
                    .with_template("a", vec![FlowTemplateEntry::role(1, RoleKind::Hod)])
                    .with_template("b", vec![FlowTemplateEntry::role(1, RoleKind::Dean)]),
            )
            .build()
            .unwrap();
        let mut store = MemoryStepStore::new();
        engine
            .build_chain(&TestProposal::new("p-a", "a"), &mut store)
            .await
            .unwrap();
        engine
            .build_chain(&TestProposal::new("p-b", "b"), &mut store)
            .await
            .unwrap();

        let all = engine
            .pending_steps_for(&ReviewerContext::new("multi"), &store)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let dean_only = engine
            .pending_steps_for(&ReviewerContext::new("multi").with_stage(RoleKind::Dean), &store)
            .await
            .unwrap();
        assert_eq!(dean_only.len(), 1);
        assert_eq!(dean_only[0].proposal_id, "p-b");
    }

    #[tokio::test]
    async fn test_events_emitted_after_commit() {
        let engine = sci_engine();
        let mut events = engine.subscribe();
        let mut store = MemoryStepStore::new();
        let chain = engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        engine
            .decide_step(
                chain[0].id,
                &ReviewerContext::new("hod-sci"),
                DecisionRequest::approve(),
                &mut store,
            )
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }

        assert!(matches!(received[0], ApprovalEvent::ChainBuilt { steps: 2, .. }));
        assert!(received.iter().any(
            |e| matches!(e, ApprovalEvent::StepSkipped { step_id, .. } if *step_id == chain[1].id)
        ));
        assert!(matches!(
            received.last(),
            Some(ApprovalEvent::ProposalStatusChanged {
                to: ProposalStatus::Finalized,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_status_report() {
        let engine = sci_engine();
        let mut store = MemoryStepStore::new();
        engine
            .build_chain(&TestProposal::new("p1", "sci"), &mut store)
            .await
            .unwrap();

        let status = engine.status("p1", &store).await.unwrap();
        assert_eq!(status.steps.len(), 2);
        assert_eq!(status.proposal_status, ProposalStatus::Submitted);

        let missing = engine.status("nope", &store).await;
        assert!(matches!(missing, Err(ApprovalError::ProposalNotFound(_))));
    }
}
