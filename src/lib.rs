//! # Signoff
//!
//! A persistent, multi-stage approval chain engine for proposals that need
//! sign-off from several people in a fixed order.
//!
//! Each proposal gets an ordered chain of [`ApprovalStep`]s built from its
//! organization's flow template. Approvers decide one step at a time; every
//! decision runs a fixed cascade inside one atomic write:
//!
//! - other mandatory steps of the same approver are auto-approved, so no one
//!   signs twice
//! - optional steps are either unlocked (the approver forwarded to them) or
//!   skipped
//! - the next waiting step becomes pending
//! - the proposal status is recomputed
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use signoff::{ApprovalEngine, DecisionRequest, MemoryStepStore, ReviewerContext};
//!
//! let engine = ApprovalEngine::builder()
//!     .directory(directory)
//!     .templates(templates)
//!     .build()?;
//!
//! let mut store = MemoryStepStore::new();
//! let chain = engine.build_chain(&proposal, &mut store).await?;
//!
//! // The head of department approves and forwards to the optional director step
//! engine
//!     .decide_step(
//!         chain[0].id,
//!         &ReviewerContext::new("hod-sci"),
//!         DecisionRequest::approve().forward_to([chain[1].id]),
//!         &mut store,
//!     )
//!     .await?;
//! ```
//!
//! ## Persistence
//!
//! Storage is behind the [`StepStore`] trait. [`MemoryStepStore`] is always
//! available; [`SqliteStepStore`] requires the `sqlite` feature (enabled by
//! default).

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod cascade;
mod chain;
pub mod config;
mod decision;
mod directory;
mod engine;
pub mod error;
mod event;
pub mod logging;
mod proposal;
mod role;
pub mod status;
pub mod step;
pub mod step_store;
pub mod visibility;

pub use chain::{validate_chain, ChainBuilder};
pub use config::{load_config, EngineConfig, StoreBackend};
pub use decision::{DecisionAction, DecisionOutcome, DecisionRequest, ReviewerContext};
pub use directory::{
    DirectoryLookup, FlowConfig, FlowTemplateEntry, FlowTemplateStore, StaticDirectory,
    StaticFlowTemplates,
};
pub use engine::{ApprovalEngine, ApprovalEngineBuilder};
pub use error::{ApprovalError, Result};
pub use event::ApprovalEvent;
pub use proposal::{Proposal, ProposalRecord, ProposalStatus};
pub use role::{RoleKind, RoleMapping};
pub use status::{ChainStatus, StepStatusEntry};
pub use step::{ApprovalStep, StepStatus};
pub use step_store::{ChainSnapshot, MemoryStepStore, StepStore};
pub use visibility::visible_for_ui;

#[cfg(feature = "sqlite")]
pub use step_store::SqliteStepStore;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
