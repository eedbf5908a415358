//! Approval chain construction.
//!
//! [`ChainBuilder`] turns a proposal, its organization's flow template and
//! its faculty-in-charge list into an ordered, validated list of
//! [`ApprovalStep`]s. Persisting the chain is the engine's job.

use tracing::{debug, warn};

use crate::{
    ApprovalError, ApprovalStep, DirectoryLookup, FlowTemplateStore, Proposal, Result, RoleKind,
    StepStatus,
};

/// Builds approval chains from templates and directory lookups.
pub struct ChainBuilder<'a> {
    directory: &'a dyn DirectoryLookup,
    templates: &'a dyn FlowTemplateStore,
}

impl<'a> ChainBuilder<'a> {
    /// Creates a builder over the given collaborators.
    pub fn new(directory: &'a dyn DirectoryLookup, templates: &'a dyn FlowTemplateStore) -> Self {
        Self {
            directory,
            templates,
        }
    }

    /// Builds the chain for a proposal without persisting it.
    ///
    /// Faculty-in-charge steps are synthesized first when the organization
    /// requires it, followed by the template entries in `step_order`.
    ///
    /// # Errors
    ///
    /// Template and flow-config read failures propagate. Directory failures
    /// for a single role do not: the step is created unassigned.
    pub async fn build(&self, proposal: &dyn Proposal) -> Result<Vec<ApprovalStep>> {
        let organization_id = proposal.organization_id();
        let fic_first = self
            .templates
            .flow_config(organization_id)
            .await?
            .map(|config| config.require_faculty_incharge_first)
            .unwrap_or(false);

        let mut entries = self.templates.flow_template(organization_id).await?;
        entries.sort_by_key(|entry| entry.step_order);

        let mut steps = Vec::with_capacity(entries.len() + proposal.faculty_incharge_ids().len());
        let mut idx: u32 = 1;

        if fic_first {
            for user_id in proposal.faculty_incharge_ids() {
                steps.push(ApprovalStep::new(
                    proposal.id(),
                    idx,
                    Some(RoleKind::FacultyIncharge),
                    Some(user_id.clone()),
                    false,
                ));
                idx += 1;
            }
        }

        for entry in entries {
            if fic_first && entry.role_required == Some(RoleKind::FacultyIncharge) {
                debug!(step_order = entry.step_order, "faculty-incharge entry already synthesized");
                continue;
            }

            let assigned_to = match (&entry.fixed_user, entry.role_required) {
                (Some(user_id), _) => Some(user_id.clone()),
                (None, Some(role)) => self.resolve(organization_id, role).await,
                (None, None) => None,
            };

            if assigned_to.is_none() {
                warn!(
                    proposal_id = %proposal.id(),
                    order_index = idx,
                    role = ?entry.role_required,
                    "no approver resolved; step will be unassigned"
                );
            }

            steps.push(ApprovalStep::new(
                proposal.id(),
                idx,
                entry.role_required,
                assigned_to,
                entry.optional,
            ));
            idx += 1;
        }

        // No approver sits upstream of the first step to forward to it
        if let Some(first) = steps.first_mut() {
            if first.is_optional {
                first.optional_unlocked = true;
            }
        }

        validate_chain(&steps)?;
        Ok(steps)
    }

    async fn resolve(&self, organization_id: &str, role: RoleKind) -> Option<String> {
        match self
            .directory
            .find_approver_for_role(organization_id, role)
            .await
        {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(error = %e, %role, "directory lookup failed");
                None
            }
        }
    }
}

/// Checks the structural invariants of a freshly built chain.
///
/// `order_index` must run exactly `1..=N`, the first step must be `pending`
/// and every other step `waiting`.
///
/// # Errors
///
/// Returns [`ApprovalError::InvalidChain`] describing the first violation.
pub fn validate_chain(steps: &[ApprovalStep]) -> Result<()> {
    for (position, step) in steps.iter().enumerate() {
        let expected = position as u32 + 1;
        if step.order_index != expected {
            return Err(ApprovalError::InvalidChain(format!(
                "expected order_index {expected}, found {}",
                step.order_index
            )));
        }

        let expected_status = if expected == 1 {
            StepStatus::Pending
        } else {
            StepStatus::Waiting
        };
        if step.status != expected_status {
            return Err(ApprovalError::InvalidChain(format!(
                "step {expected} starts as {} instead of {expected_status}",
                step.status
            )));
        }
    }

    if let Some(first) = steps.first() {
        if steps.iter().any(|s| s.proposal_id != first.proposal_id) {
            return Err(ApprovalError::InvalidChain(
                "steps belong to different proposals".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlowConfig, FlowTemplateEntry, StaticDirectory, StaticFlowTemplates};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct TestProposal {
        id: String,
        organization: String,
        faculty: Vec<String>,
    }

    impl TestProposal {
        fn new(organization: &str, faculty: &[&str]) -> Self {
            Self {
                id: "prop-1".to_string(),
                organization: organization.to_string(),
                faculty: faculty.iter().map(|f| f.to_string()).collect(),
            }
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

    struct FailingDirectory;

    #[async_trait]
    impl DirectoryLookup for FailingDirectory {
        async fn find_approver_for_role(
            &self,
            _organization_id: &str,
            _role: RoleKind,
        ) -> Result<Option<String>> {
            Err(ApprovalError::Directory("ldap unreachable".to_string()))
        }
    }

    struct FailingTemplates;

    #[async_trait]
    impl FlowTemplateStore for FailingTemplates {
        async fn flow_template(&self, _organization_id: &str) -> Result<Vec<FlowTemplateEntry>> {
            Err(ApprovalError::Template("table missing".to_string()))
        }

        async fn flow_config(&self, _organization_id: &str) -> Result<Option<FlowConfig>> {
            Ok(None)
        }
    }

    fn sci_directory() -> StaticDirectory {
        StaticDirectory::new()
            .with_holder("sci", RoleKind::Hod, "h")
            .with_holder("sci", RoleKind::Director, "d")
            .with_holder("sci", RoleKind::FacultyIncharge, "fic-from-directory")
    }

    #[tokio::test]
    async fn test_build_basic_chain() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new().with_template(
            "sci",
            vec![
                FlowTemplateEntry::role(1, RoleKind::Hod),
                FlowTemplateEntry::role(2, RoleKind::Director).optional(),
            ],
        );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &[])).await.unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].order_index, 1);
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert_eq!(steps[0].assigned_to.as_deref(), Some("h"));
        assert!(!steps[0].is_optional);
        assert_eq!(steps[1].order_index, 2);
        assert_eq!(steps[1].status, StepStatus::Waiting);
        assert_eq!(steps[1].assigned_to.as_deref(), Some("d"));
        assert!(steps[1].is_optional);
    }

    #[tokio::test]
    async fn test_first_optional_step_starts_unlocked() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new().with_template(
            "sci",
            vec![
                FlowTemplateEntry::role(1, RoleKind::Director).optional(),
                FlowTemplateEntry::role(2, RoleKind::Hod),
            ],
        );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &[])).await.unwrap();

        assert!(steps[0].is_optional);
        assert!(steps[0].optional_unlocked);
        assert!(steps[0].is_actionable());
        assert!(!steps[1].optional_unlocked);
    }

    #[tokio::test]
    async fn test_build_sorts_template_by_step_order() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new().with_template(
            "sci",
            vec![
                FlowTemplateEntry::role(20, RoleKind::Director),
                FlowTemplateEntry::role(10, RoleKind::Hod),
            ],
        );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &[])).await.unwrap();

        assert_eq!(steps[0].role_required, Some(RoleKind::Hod));
        assert_eq!(steps[1].role_required, Some(RoleKind::Director));
        assert_eq!(
            steps.iter().map(|s| s.order_index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_faculty_incharge_first() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new()
            .with_template(
                "sci",
                vec![
                    FlowTemplateEntry::role(1, RoleKind::FacultyIncharge),
                    FlowTemplateEntry::role(2, RoleKind::Hod),
                ],
            )
            .with_config(
                "sci",
                FlowConfig {
                    require_faculty_incharge_first: true,
                },
            );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder
            .build(&TestProposal::new("sci", &["f1", "f2"]))
            .await
            .unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].assigned_to.as_deref(), Some("f1"));
        assert_eq!(steps[0].status, StepStatus::Pending);
        assert_eq!(steps[1].assigned_to.as_deref(), Some("f2"));
        assert_eq!(steps[1].status, StepStatus::Waiting);
        assert_eq!(steps[2].role_required, Some(RoleKind::Hod));
        assert!(steps
            .iter()
            .all(|s| s.assigned_to.as_deref() != Some("fic-from-directory")));
    }

    #[tokio::test]
    async fn test_faculty_template_entry_kept_without_fic_first() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new().with_template(
            "sci",
            vec![
                FlowTemplateEntry::role(1, RoleKind::FacultyIncharge),
                FlowTemplateEntry::role(2, RoleKind::Hod),
            ],
        );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &["f1"])).await.unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].assigned_to.as_deref(), Some("fic-from-directory"));
    }

    #[tokio::test]
    async fn test_fixed_user_overrides_directory() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new().with_template(
            "sci",
            vec![FlowTemplateEntry::role(1, RoleKind::Hod).with_fixed_user("acting-hod")],
        );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &[])).await.unwrap();
        assert_eq!(steps[0].assigned_to.as_deref(), Some("acting-hod"));
    }

    #[tokio::test]
    async fn test_unresolved_role_creates_unassigned_step() {
        let directory = sci_directory();
        let templates = StaticFlowTemplates::new().with_template(
            "sci",
            vec![
                FlowTemplateEntry::role(1, RoleKind::Hod),
                FlowTemplateEntry::role(2, RoleKind::Registrar),
            ],
        );
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &[])).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps[1].is_unassigned());
        assert_eq!(steps[1].role_required, Some(RoleKind::Registrar));
    }

    #[tokio::test]
    async fn test_directory_failure_degrades_to_unassigned() {
        let templates = StaticFlowTemplates::new()
            .with_template("sci", vec![FlowTemplateEntry::role(1, RoleKind::Hod)]);
        let builder = ChainBuilder::new(&FailingDirectory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &[])).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_unassigned());
    }

    #[tokio::test]
    async fn test_template_failure_propagates() {
        let directory = sci_directory();
        let builder = ChainBuilder::new(&directory, &FailingTemplates);

        let result = builder.build(&TestProposal::new("sci", &[])).await;
        assert!(matches!(result, Err(ApprovalError::Template(_))));
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let directory = StaticDirectory::new();
        let templates = StaticFlowTemplates::new();
        let builder = ChainBuilder::new(&directory, &templates);

        let steps = builder.build(&TestProposal::new("sci", &["f1"])).await.unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_validate_chain_rejects_gap() {
        let steps = vec![
            ApprovalStep::new("p", 1, Some(RoleKind::Hod), None, false),
            ApprovalStep::new("p", 3, Some(RoleKind::Dean), None, false),
        ];
        assert!(matches!(
            validate_chain(&steps),
            Err(ApprovalError::InvalidChain(_))
        ));
    }

    #[test]
    fn test_validate_chain_rejects_second_pending() {
        let mut second = ApprovalStep::new("p", 2, Some(RoleKind::Dean), None, false);
        second.status = StepStatus::Pending;
        let steps = vec![
            ApprovalStep::new("p", 1, Some(RoleKind::Hod), None, false),
            second,
        ];
        assert!(validate_chain(&steps).is_err());
    }

    #[test]
    fn test_validate_chain_rejects_mixed_proposals() {
        let steps = vec![
            ApprovalStep::new("p", 1, Some(RoleKind::Hod), None, false),
            ApprovalStep::new("q", 2, Some(RoleKind::Dean), None, false),
        ];
        assert!(validate_chain(&steps).is_err());
    }

    #[test]
    fn test_validate_empty_chain() {
        assert!(validate_chain(&[]).is_ok());
    }
}
