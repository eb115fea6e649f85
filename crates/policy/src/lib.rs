// SPDX-License-Identifier: MIT

//! Policy Evaluator (§4.F): loads packs, deep-merges pack < project <
//! repo-local overrides into one effective policy document, hashes it, and
//! emits findings that escalate to `block` per the project's enforcement mode.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use forge_core::policy_pack::PolicyPackDocument;
use forge_core::project::EnforcementMode;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const CODE_MISSING_SECTION: &str = "policy.step.missing_section";
pub const CODE_CI_CHECK_MISSING: &str = "policy.ci.required_check_missing";
pub const CODE_CI_CHECK_NOT_EXECUTABLE: &str = "policy.ci.required_check_not_executable";
pub const CODE_REPO_LOCAL_NO_PATH: &str = "policy.repo_local.no_local_path";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingScope {
    Project,
    Protocol,
    Step,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Finding {
    pub code: String,
    pub severity: Severity,
    pub scope: FindingScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Finding {
    fn new(code: &str, severity: Severity, scope: FindingScope, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), severity, scope, subject_id: None, message: message.into(), metadata: None }
    }
}

/// Where the effective policy's value for a given top-level key came from,
/// most-specific-wins order: pack < project < repo-local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    Pack,
    Project,
    RepoLocal,
}

/// Deep-merges two JSON objects; scalars and arrays from `overlay` replace
/// `base`, nested objects merge key-by-key.
fn deep_merge(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            serde_json::Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Merges `(pack, project overrides, repo-local overrides)` in that order
/// and returns the effective policy JSON, its SHA-256 hex hash, and which
/// sources contributed.
pub fn compute_effective(
    pack: &PolicyPackDocument,
    project_overrides: Option<&serde_json::Value>,
    repo_local: Option<&serde_json::Value>,
) -> (serde_json::Value, String, Vec<PolicySource>) {
    #[allow(clippy::expect_used)]
    let mut effective = serde_json::to_value(pack).expect("PolicyPackDocument is plain data and always serializes");
    let mut sources = vec![PolicySource::Pack];
    if let Some(overrides) = project_overrides {
        effective = deep_merge(&effective, overrides);
        sources.push(PolicySource::Project);
    }
    if let Some(local) = repo_local {
        effective = deep_merge(&effective, local);
        sources.push(PolicySource::RepoLocal);
    }
    #[allow(clippy::expect_used)]
    let canonical = serde_json::to_vec(&effective).expect("merged policy is plain JSON and always serializes");
    let hash = hex::encode(Sha256::digest(&canonical));
    (effective, hash, sources)
}

/// `policy.repo_local.no_local_path` — repo-local policy enabled but the
/// project has no local path configured (§4.F).
pub fn findings_for_project(repo_local_enabled: bool, local_path: Option<&str>) -> Vec<Finding> {
    let mut findings = Vec::new();
    if repo_local_enabled && local_path.is_none() {
        findings.push(Finding::new(
            CODE_REPO_LOCAL_NO_PATH,
            Severity::Warning,
            FindingScope::Project,
            "repo-local policy is enabled but the project has no local_path configured",
        ));
    }
    findings
}

/// `policy.ci.required_check_missing` / `..._not_executable` — every file
/// named in `defaults.ci.required_checks` must exist under `local_path` and
/// be executable (§4.F).
pub fn findings_for_protocol(pack: &PolicyPackDocument, local_path: Option<&Path>) -> Vec<Finding> {
    let mut findings = Vec::new();
    let Some(ci) = &pack.defaults.ci else { return findings };
    let Some(local_path) = local_path else {
        for check in &ci.required_checks {
            findings.push(finding_check_missing(check));
        }
        return findings;
    };
    for check in &ci.required_checks {
        let resolved = local_path.join(check);
        if !resolved.exists() {
            findings.push(finding_check_missing(check));
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let executable = std::fs::metadata(&resolved).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false);
            if !executable {
                findings.push(Finding::new(
                    CODE_CI_CHECK_NOT_EXECUTABLE,
                    Severity::Warning,
                    FindingScope::Protocol,
                    format!("required check {check} exists but is not executable"),
                ));
            }
        }
    }
    findings
}

fn finding_check_missing(check: &str) -> Finding {
    Finding::new(CODE_CI_CHECK_MISSING, Severity::Warning, FindingScope::Protocol, format!("required check {check} does not exist"))
}

/// `policy.step.missing_section` — every heading in `requirements.step_sections`
/// must appear verbatim in the step's markdown source (§4.F).
pub fn findings_for_step(pack: &PolicyPackDocument, step_name: &str, step_markdown: &str) -> Vec<Finding> {
    pack.requirements
        .step_sections
        .iter()
        .filter(|section| !step_markdown.contains(section.as_str()))
        .map(|section| {
            let mut finding = Finding::new(
                CODE_MISSING_SECTION,
                Severity::Warning,
                FindingScope::Step,
                format!("step {step_name} is missing required section {section}"),
            );
            finding.subject_id = Some(step_name.to_string());
            finding
        })
        .collect()
}

/// Escalates every `warning` finding whose code is in `enforcement.block_codes`
/// to `block`, but only when the project's enforcement mode is `block`.
/// Warnings outside `block_codes` are never escalated (§4.F).
pub fn escalate(findings: Vec<Finding>, pack: &PolicyPackDocument, project_mode: EnforcementMode) -> Vec<Finding> {
    if project_mode != EnforcementMode::Block {
        return findings;
    }
    findings
        .into_iter()
        .map(|mut finding| {
            if finding.severity == Severity::Warning && pack.enforcement.block_codes.iter().any(|c| c == &finding.code) {
                finding.severity = Severity::Block;
            }
            finding
        })
        .collect()
}
