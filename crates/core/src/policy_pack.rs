// SPDX-License-Identifier: MIT

//! PolicyPack: the versioned JSON document evaluated by `forge-policy`
//! (§3, §4.F, §6 "Policy pack JSON schema").

use crate::define_int_id;
use serde::{Deserialize, Serialize};

define_int_id!(
    /// Store-assigned identifier for a [`PolicyPack`].
    pub struct PolicyPackId;
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPackStatus {
    Active,
    Draft,
    Deprecated,
}

/// A versioned, named policy document. `(key, version)` unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyPack {
    pub id: PolicyPackId,
    pub key: String,
    pub version: String,
    pub name: String,
    pub description: Option<String>,
    pub status: PolicyPackStatus,
    pub pack: PolicyPackDocument,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Enforcement posture embedded in a pack's `enforcement` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementBlock {
    pub mode: crate::project::EnforcementMode,
    #[serde(default)]
    pub block_codes: Vec<String>,
}

/// CI defaults embedded in a pack's `defaults.ci` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiDefaults {
    #[serde(default)]
    pub required_checks: Vec<String>,
}

/// `defaults` block: project-wide defaults a pack contributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackDefaults {
    #[serde(default)]
    pub models: Option<serde_json::Value>,
    #[serde(default)]
    pub ci: Option<CiDefaults>,
}

/// `requirements` block: structural rules the evaluator checks against steps
/// and protocol files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackRequirements {
    #[serde(default)]
    pub step_sections: Vec<String>,
    #[serde(default)]
    pub protocol_files: Vec<String>,
}

/// `meta` block: identity fields that must match the owning row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackMeta {
    pub key: String,
    pub version: String,
    pub name: String,
}

/// The full JSON document stored in `PolicyPack.pack` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyPackDocument {
    pub meta: PackMeta,
    #[serde(default)]
    pub defaults: PackDefaults,
    #[serde(default)]
    pub requirements: PackRequirements,
    #[serde(default)]
    pub clarifications: Vec<serde_json::Value>,
    pub enforcement: EnforcementBlock,
}
