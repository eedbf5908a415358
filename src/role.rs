//! Approver role kinds and organization label mapping.
//!
//! Organizations name their roles freely ("Head of Department", "IQAC
//! Coordinator", ...). The engine only ever reasons about the closed
//! [`RoleKind`] set; labels are translated once, when configuration is
//! loaded, through a [`RoleMapping`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{ApprovalError, Result};

/// The kinds of approver roles the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// A faculty member in charge of the proposing organization.
    FacultyIncharge,
    /// Head of department.
    Hod,
    /// Internal quality assurance cell.
    Iqac,
    /// Dean of a school or faculty.
    Dean,
    /// Director of the institution or a centre.
    Director,
    /// Principal of a college.
    Principal,
    /// Registrar.
    Registrar,
    /// Student-body or club coordinator.
    Coordinator,
}

impl RoleKind {
    /// All role kinds, in a stable order.
    pub const ALL: [RoleKind; 8] = [
        RoleKind::FacultyIncharge,
        RoleKind::Hod,
        RoleKind::Iqac,
        RoleKind::Dean,
        RoleKind::Director,
        RoleKind::Principal,
        RoleKind::Registrar,
        RoleKind::Coordinator,
    ];

    /// Returns the canonical snake_case name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FacultyIncharge => "faculty_incharge",
            Self::Hod => "hod",
            Self::Iqac => "iqac",
            Self::Dean => "dean",
            Self::Director => "director",
            Self::Principal => "principal",
            Self::Registrar => "registrar",
            Self::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoleKind {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self> {
        RoleKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ApprovalError::UnknownRole(s.to_string()))
    }
}

/// A table from organization-defined role labels to [`RoleKind`]s.
///
/// Lookups are exact after trimming and lowercasing the label. Canonical
/// names (`"hod"`, `"faculty_incharge"`, ...) always resolve, so a mapping
/// only needs entries for labels that differ from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    labels: HashMap<String, RoleKind>,
}

impl RoleMapping {
    /// Creates an empty mapping that only resolves canonical names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label for a role kind.
    pub fn with_label(mut self, label: impl AsRef<str>, kind: RoleKind) -> Self {
        self.insert(label, kind);
        self
    }

    /// Adds a label for a role kind in place.
    pub fn insert(&mut self, label: impl AsRef<str>, kind: RoleKind) {
        self.labels.insert(normalize(label.as_ref()), kind);
    }

    /// Builds a mapping from `label -> canonical role name` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownRole`] if a target is not a canonical
    /// role name. Invalid configuration is rejected here rather than when a
    /// decision is being made.
    pub fn from_labels<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut mapping = Self::new();
        for (label, target) in pairs {
            let kind: RoleKind = normalize(target.as_ref()).parse()?;
            mapping.insert(label, kind);
        }
        Ok(mapping)
    }

    /// Resolves a label to its role kind.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownRole`] if the label is neither mapped
    /// nor a canonical role name.
    pub fn resolve(&self, label: &str) -> Result<RoleKind> {
        let key = normalize(label);
        if let Some(kind) = self.labels.get(&key) {
            return Ok(*kind);
        }
        key.parse()
            .map_err(|_| ApprovalError::UnknownRole(label.to_string()))
    }

    /// Returns the number of explicit labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if no explicit labels are defined.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}
