//! Layered engine configuration.
//!
//! Configuration is merged from compiled-in defaults, an optional TOML file
//! and `SIGNOFF_` environment variables, in that order. Nested keys use a
//! double underscore, so `SIGNOFF_NOTES__SKIP_NOTE` sets `notes.skip_note`.
//!
//! ```toml
//! [events]
//! channel_capacity = 512
//!
//! [notes]
//! skip_note = "Not required for this event."
//!
//! [store]
//! backend = "sqlite"
//! sqlite_path = "signoff.db"
//!
//! [logging]
//! level = "signoff=debug"
//! json = true
//!
//! [roles]
//! "Head of Department" = "hod"
//! "IQAC Coordinator" = "iqac"
//!
//! [flows.sci]
//! require_faculty_incharge_first = true
//! steps = [
//!     { role = "Head of Department" },
//!     { role = "IQAC Coordinator", optional = true },
//!     { role = "principal" },
//! ]
//! ```

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::step::DEFAULT_SKIP_NOTE;
use crate::{
    ApprovalError, FlowConfig, FlowTemplateEntry, MemoryStepStore, Result, RoleMapping,
    StaticFlowTemplates, StepStore,
};

#[cfg(feature = "sqlite")]
use crate::SqliteStepStore;

/// Default channel capacity for approval events.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SIGNOFF_";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Event channel settings.
    pub events: EventsConfig,
    /// System note texts.
    pub notes: NotesConfig,
    /// Step store selection.
    pub store: StoreConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Organization role labels mapped to canonical role names.
    pub roles: BTreeMap<String, String>,
    /// Approval flows per organization id.
    pub flows: BTreeMap<String, OrganizationFlowConfig>,
}

impl EngineConfig {
    /// Builds the role mapping from the `roles` table.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownRole`] if a label maps to a name that
    /// is not a known role.
    pub fn role_mapping(&self) -> Result<RoleMapping> {
        RoleMapping::from_labels(&self.roles)
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.events.channel_capacity == 0 {
            return Err(ApprovalError::InvalidConfiguration(
                "events.channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.notes.skip_note.trim().is_empty() {
            return Err(ApprovalError::InvalidConfiguration(
                "notes.skip_note must not be empty".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.sqlite_path.is_none() {
            return Err(ApprovalError::InvalidConfiguration(
                "store.sqlite_path is required for the sqlite backend".to_string(),
            ));
        }
        self.flow_templates().map(|_| ())
    }

    /// Builds a template store from the `flows` table.
    ///
    /// Role labels are resolved through [`role_mapping`](Self::role_mapping)
    /// and steps are numbered in the order they are listed.
    ///
    /// # Errors
    ///
    /// - [`ApprovalError::UnknownRole`] for a label that does not resolve
    /// - [`ApprovalError::InvalidConfiguration`] for a step with neither a
    ///   role nor a fixed user
    pub fn flow_templates(&self) -> Result<StaticFlowTemplates> {
        let mapping = self.role_mapping()?;
        let mut templates = StaticFlowTemplates::new();

        for (organization_id, flow) in &self.flows {
            let mut entries = Vec::with_capacity(flow.steps.len());
            for (step_order, step) in (1u32..).zip(&flow.steps) {
                let mut entry = match (&step.role, &step.fixed_user) {
                    (Some(label), _) => FlowTemplateEntry::labelled(step_order, label, &mapping)?,
                    (None, Some(_)) => FlowTemplateEntry {
                        step_order,
                        role_required: None,
                        fixed_user: None,
                        optional: false,
                    },
                    (None, None) => {
                        return Err(ApprovalError::InvalidConfiguration(format!(
                            "flows.{organization_id} step {step_order} needs a role or a fixed_user"
                        )));
                    }
                };
                if let Some(user_id) = &step.fixed_user {
                    entry = entry.with_fixed_user(user_id.clone());
                }
                if step.optional {
                    entry = entry.optional();
                }
                entries.push(entry);
            }

            templates = templates
                .with_template(organization_id.clone(), entries)
                .with_config(
                    organization_id.clone(),
                    FlowConfig {
                        require_faculty_incharge_first: flow.require_faculty_incharge_first,
                    },
                );
        }

        Ok(templates)
    }
}

/// One organization's approval flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationFlowConfig {
    /// Put the proposal's faculty-in-charge ahead of the listed steps.
    pub require_faculty_incharge_first: bool,
    /// The steps, in approval order.
    pub steps: Vec<FlowStepConfig>,
}

/// One step of a configured flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowStepConfig {
    /// Role label, resolved through the `roles` table.
    pub role: Option<String>,
    /// Approver that overrides directory resolution.
    pub fixed_user: Option<String>,
    /// Whether the step only runs when forwarded to.
    pub optional: bool,
}

/// Event channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of the broadcast channel. Slow subscribers past this lag
    /// lose events.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// System note texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Note stamped on optional steps skipped because nobody forwarded.
    pub skip_note: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            skip_note: DEFAULT_SKIP_NOTE.to_string(),
        }
    }
}

/// Which step store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Volatile in-process storage.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Step store selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The backend.
    pub backend: StoreBackend,
    /// Database file for the SQLite backend.
    pub sqlite_path: Option<PathBuf>,
}

impl StoreConfig {
    /// Opens the configured step store.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::InvalidConfiguration`] if the SQLite backend
    /// has no path or the crate was built without the `sqlite` feature, and
    /// any error from opening the database.
    pub async fn open(&self) -> Result<Box<dyn StepStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Box::new(MemoryStepStore::new())),
            #[cfg(feature = "sqlite")]
            StoreBackend::Sqlite => {
                let path = self.sqlite_path.as_deref().ok_or_else(|| {
                    ApprovalError::InvalidConfiguration(
                        "store.sqlite_path is required for the sqlite backend".to_string(),
                    )
                })?;
                Ok(Box::new(SqliteStepStore::open(path).await?))
            }
            #[cfg(not(feature = "sqlite"))]
            StoreBackend::Sqlite => Err(ApprovalError::InvalidConfiguration(
                "the sqlite backend requires the `sqlite` feature".to_string(),
            )),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive. `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Loads configuration from defaults, an optional TOML file and the
/// environment.
///
/// A missing file is not an error; a malformed one is.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: EngineConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}
