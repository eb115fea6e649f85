// SPDX-License-Identifier: MIT

//! Project: the tenant-scoped root entity. Owns protocol runs, clarifications,
//! and project-scoped events; deletion cascades (§3 "Ownership").

use crate::define_int_id;
use serde::{Deserialize, Serialize};

define_int_id!(
    /// Store-assigned identifier for a [`Project`].
    pub struct ProjectId;
);

/// Policy enforcement posture for a project: `warn` records findings as
/// events only, `block` escalates block-listed warnings to hard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Warn,
    Block,
}

crate::simple_display!(EnforcementMode {
    Warn => "warn",
    Block => "block",
});

/// A registered git project under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub git_url: String,
    pub local_path: Option<String>,
    pub base_branch: String,
    pub ci_provider: Option<String>,
    pub secrets_enc: Option<String>,
    pub default_models: Option<serde_json::Value>,
    pub policy_pack_key: Option<String>,
    pub policy_pack_version: Option<String>,
    pub policy_overrides: Option<serde_json::Value>,
    pub policy_repo_local_enabled: bool,
    pub policy_effective_hash: Option<String>,
    pub policy_enforcement_mode: EnforcementMode,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields accepted by `create_project`. `name` is the uniqueness key.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub git_url: String,
    pub local_path: Option<String>,
    pub base_branch: String,
    pub ci_provider: Option<String>,
    pub secrets_enc: Option<String>,
    pub default_models: Option<serde_json::Value>,
    pub policy_pack_key: Option<String>,
    pub policy_pack_version: Option<String>,
    pub policy_overrides: Option<serde_json::Value>,
    pub policy_repo_local_enabled: bool,
    pub policy_enforcement_mode: EnforcementMode,
}

impl Default for EnforcementMode {
    fn default() -> Self {
        EnforcementMode::Warn
    }
}

/// Fields accepted by `update_project_policy`. Caller must not set both
/// `policy_pack_version` and `clear_policy_pack_version` (store raises
/// `Conflict` with message `ConflictingOptions`).
#[derive(Debug, Clone, Default)]
pub struct PolicyUpdate {
    pub policy_pack_key: Option<String>,
    pub policy_pack_version: Option<String>,
    pub clear_policy_pack_version: bool,
    pub policy_overrides: Option<serde_json::Value>,
    pub policy_repo_local_enabled: Option<bool>,
    pub policy_enforcement_mode: Option<EnforcementMode>,
}

impl PolicyUpdate {
    pub fn is_conflicting(&self) -> bool {
        self.policy_pack_version.is_some() && self.clear_policy_pack_version
    }
}
