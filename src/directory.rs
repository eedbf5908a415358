//! Read-only collaborators consulted while building a chain.
//!
//! [`DirectoryLookup`] answers "who holds this role in this organization" and
//! [`FlowTemplateStore`] supplies each organization's approval template. Both
//! are owned by the surrounding application; [`StaticDirectory`] and
//! [`StaticFlowTemplates`] are in-memory implementations for tests, demos and
//! small deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Result, RoleKind, RoleMapping};

/// One entry of an organization's approval template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTemplateEntry {
    /// Position of the entry within the template.
    pub step_order: u32,

    /// Role that must approve at this position.
    pub role_required: Option<RoleKind>,

    /// A fixed approver that overrides role resolution.
    #[serde(default)]
    pub fixed_user: Option<String>,

    /// Whether the step may be bypassed unless forwarded to.
    #[serde(default)]
    pub optional: bool,
}

impl FlowTemplateEntry {
    /// Creates a mandatory, role-resolved entry.
    pub fn role(step_order: u32, role: RoleKind) -> Self {
        Self {
            step_order,
            role_required: Some(role),
            fixed_user: None,
            optional: false,
        }
    }

    /// Creates a mandatory entry from an organization role label.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownRole`](crate::ApprovalError::UnknownRole)
    /// if `mapping` cannot resolve the label.
    pub fn labelled(step_order: u32, label: &str, mapping: &RoleMapping) -> Result<Self> {
        Ok(Self::role(step_order, mapping.resolve(label)?))
    }

    /// Marks the entry optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Pins the entry to a fixed approver.
    pub fn with_fixed_user(mut self, user_id: impl Into<String>) -> Self {
        self.fixed_user = Some(user_id.into());
        self
    }
}

/// Organization-level flow configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Insert one mandatory step per faculty-in-charge ahead of the template.
    #[serde(default)]
    pub require_faculty_incharge_first: bool,
}

/// Resolves which user occupies a role within an organization.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// Returns the user holding `role` in `organization_id`.
    ///
    /// `Ok(None)` is a normal outcome; the chain builder creates the step
    /// unassigned.
    async fn find_approver_for_role(
        &self,
        organization_id: &str,
        role: RoleKind,
    ) -> Result<Option<String>>;
}

/// Supplies approval templates and flow configuration per organization.
#[async_trait]
pub trait FlowTemplateStore: Send + Sync {
    /// Returns the organization's template entries.
    ///
    /// Entries need not be sorted; the chain builder orders them by
    /// `step_order`.
    async fn flow_template(&self, organization_id: &str) -> Result<Vec<FlowTemplateEntry>>;

    /// Returns the organization's flow configuration, if one exists.
    async fn flow_config(&self, organization_id: &str) -> Result<Option<FlowConfig>>;
}

/// An in-memory [`DirectoryLookup`].
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    holders: HashMap<(String, RoleKind), String>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `user_id` holds `role` in `organization_id`.
    pub fn with_holder(
        mut self,
        organization_id: impl Into<String>,
        role: RoleKind,
        user_id: impl Into<String>,
    ) -> Self {
        self.holders
            .insert((organization_id.into(), role), user_id.into());
        self
    }
}

#[async_trait]
impl DirectoryLookup for StaticDirectory {
    async fn find_approver_for_role(
        &self,
        organization_id: &str,
        role: RoleKind,
    ) -> Result<Option<String>> {
        Ok(self
            .holders
            .get(&(organization_id.to_string(), role))
            .cloned())
    }
}

/// An in-memory [`FlowTemplateStore`].
#[derive(Debug, Clone, Default)]
pub struct StaticFlowTemplates {
    templates: HashMap<String, Vec<FlowTemplateEntry>>,
    configs: HashMap<String, FlowConfig>,
}

impl StaticFlowTemplates {
    /// Creates an empty template store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the template for an organization.
    pub fn with_template(
        mut self,
        organization_id: impl Into<String>,
        entries: Vec<FlowTemplateEntry>,
    ) -> Self {
        self.templates.insert(organization_id.into(), entries);
        self
    }

    /// Sets the flow configuration for an organization.
    pub fn with_config(mut self, organization_id: impl Into<String>, config: FlowConfig) -> Self {
        self.configs.insert(organization_id.into(), config);
        self
    }
}

#[async_trait]
impl FlowTemplateStore for StaticFlowTemplates {
    async fn flow_template(&self, organization_id: &str) -> Result<Vec<FlowTemplateEntry>> {
        Ok(self
            .templates
            .get(organization_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn flow_config(&self, organization_id: &str) -> Result<Option<FlowConfig>> {
        Ok(self.configs.get(organization_id).copied())
    }
}
