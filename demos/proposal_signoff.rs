//! Proposal sign-off example.
//!
//! This example demonstrates:
//! - Loading configuration and initializing logging
//! - Building an approval chain from a configured flow with role labels
//! - Forwarding to an optional approver
//! - Duplicate auto-approval for an approver holding two roles
//! - Checking chain status and the user-visible steps
//! - Observing approval events
//!
//! Run with: `cargo run --example proposal_signoff`

use signoff::{
    load_config, logging, ApprovalEngine, ApprovalEvent, DecisionRequest, Proposal, Result,
    ReviewerContext, RoleKind, StaticDirectory,
};

/// An event proposal from the science department.
#[derive(Debug, Clone)]
struct EventProposal {
    id: String,
    title: String,
    department: String,
}

impl Proposal for EventProposal {
    fn id(&self) -> &str {
        &self.id
    }

    fn organization_id(&self) -> &str {
        &self.department
    }

    fn faculty_incharge_ids(&self) -> &[String] {
        &[]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/signoff.toml");
    let config = load_config(Some(&config_path))?;
    logging::init_logging(&config.logging);

    println!("╔═══════════════════════════════════════════╗");
    println!("║  Signoff Proposal Example                 ║");
    println!("╚═══════════════════════════════════════════╝\n");

    // The dean also chairs the optional IQAC review
    let directory = StaticDirectory::new()
        .with_holder("sci", RoleKind::Hod, "hod-sci")
        .with_holder("sci", RoleKind::Iqac, "dean-sci")
        .with_holder("sci", RoleKind::Dean, "dean-sci")
        .with_holder("sci", RoleKind::Director, "director");

    // HOD, IQAC (optional), Dean, Director (optional), from demos/signoff.toml
    let engine = ApprovalEngine::builder()
        .directory(directory)
        .templates(config.flow_templates()?)
        .config(&config)
        .build()?;

    let mut event_receiver = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_receiver.recv().await {
            match event {
                ApprovalEvent::StepApproved { approver, .. } => {
                    println!("   [Event] Approved by '{}'", approver);
                }
                ApprovalEvent::StepAutoApproved { approver, .. } => {
                    println!("   [Event] Duplicate step auto-approved for '{}'", approver);
                }
                ApprovalEvent::StepUnlocked { step_id, .. } => {
                    println!("   [Event] Optional step {} unlocked", step_id);
                }
                ApprovalEvent::StepSkipped { step_id, .. } => {
                    println!("   [Event] Optional step {} skipped", step_id);
                }
                ApprovalEvent::ProposalStatusChanged { from, to, .. } => {
                    println!("   [Event] Proposal {} -> {}", from, to);
                }
                _ => {}
            }
        }
    });

    let mut store = config.store.open().await?;
    let proposal = EventProposal {
        id: "sci-fest".to_string(),
        title: "Science Exhibition".to_string(),
        department: "sci".to_string(),
    };

    println!("📋 Submitting '{}'", proposal.title);
    let chain = engine.build_chain(&proposal, store.as_mut()).await?;
    println!("{}", engine.status(proposal.id(), store.as_ref()).await?);

    // HOD looks at the optional reviewers and forwards to IQAC only
    let hod = ReviewerContext::new("hod-sci");
    let candidates = engine
        .downstream_optional_candidates(chain[0].id, store.as_ref())
        .await?;
    println!("👤 HOD can forward to {} optional step(s)", candidates.len());

    let iqac = candidates
        .iter()
        .find(|s| s.role_required == Some(RoleKind::Iqac))
        .map(|s| s.id);
    engine
        .decide_step(
            chain[0].id,
            &hod,
            DecisionRequest::approve()
                .with_comment("Looks good.")
                .forward_to(iqac),
            store.as_mut(),
        )
        .await?;

    // The dean signs the IQAC review; their dean step follows automatically
    let dean = ReviewerContext::new("dean-sci");
    let inbox = engine.pending_steps_for(&dean, store.as_ref()).await?;
    println!("👤 Dean has {} step(s) waiting", inbox.len());
    if let Some(step) = inbox.first() {
        engine
            .decide_step(step.id, &dean, DecisionRequest::approve(), store.as_mut())
            .await?;
    }
    println!(
        "   Dean inbox afterwards: {} step(s)",
        engine.pending_steps_for(&dean, store.as_ref()).await?.len()
    );

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    println!("\n📊 Final Status:");
    println!("─────────────────────────────────────────");
    println!("{}", engine.status(proposal.id(), store.as_ref()).await?);

    let visible = engine.visible_steps(proposal.id(), store.as_ref()).await?;
    println!("👁  {} of {} steps visible to users", visible.len(), chain.len());

    Ok(())
}
