// SPDX-License-Identifier: MIT

//! Spec Resolver (§4.E): normalizes two input shapes — a directory of step
//! markdown files, or an external agent-configuration object — into one
//! `ProtocolSpec`, then resolves and validates individual steps against it.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use forge_core::{CoreError, CoreResult, StepType};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn infer_step_type_from_name(name: &str) -> StepType {
    let lower = name.to_lowercase();
    if lower.starts_with("00-") || lower.contains("setup") {
        StepType::Setup
    } else if lower.contains("qa") {
        StepType::Qa
    } else {
        StepType::Work
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaPolicyKind {
    Skip,
    Full,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QaSpec {
    pub policy: Option<QaPolicyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StepOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub aux: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepSpec {
    pub id: String,
    pub name: String,
    pub engine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt_ref: PathBuf,
    #[serde(default)]
    pub outputs: StepOutputs,
    pub step_type: StepType,
    #[serde(default)]
    pub policies: Vec<serde_json::Value>,
    #[serde(default)]
    pub qa: QaSpec,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ids of sibling `StepSpec`s that must complete first (§9 "Cyclic
    /// references": edges stored as an array of ids, never object
    /// pointers). Directory-built specs never populate this — filename
    /// order is the only dependency a `NN-*.md` layout expresses.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ProtocolSpec {
    pub steps: Vec<StepSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholders: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<serde_json::Value>,
}

/// Builds a `ProtocolSpec` from Codex/Devgodzilla-generated `NN-*.md` step
/// files under `protocol_root` — one step per file, ordered by filename.
pub fn build_spec_from_directory(
    protocol_root: &Path,
    default_engine_id: &str,
    default_qa_policy: QaPolicyKind,
    default_qa_prompt: &str,
) -> CoreResult<ProtocolSpec> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(protocol_root)
        .map_err(|e| CoreError::Dependency(format!("cannot read {}: {e}", protocol_root.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().map(|ext| ext == "md").unwrap_or(false)
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();

    let steps = files
        .into_iter()
        .enumerate()
        .map(|(idx, path)| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            let id = path.file_stem().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            StepSpec {
                step_type: infer_step_type_from_name(&name),
                id,
                engine_id: default_engine_id.to_string(),
                model: None,
                prompt_ref: path.clone(),
                outputs: StepOutputs { protocol: Some(path), aux: HashMap::new() },
                policies: Vec::new(),
                qa: QaSpec { policy: Some(default_qa_policy), prompt: Some(default_qa_prompt.to_string()), model: None },
                order: idx as i64,
                description: None,
                depends_on: Vec::new(),
                name,
            }
        })
        .collect();

    Ok(ProtocolSpec { steps, placeholders: None, template: None })
}

/// One entry in an external agent-configuration object (§4.E).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExternalAgent {
    pub id: String,
    pub engine_id: String,
    #[serde(default)]
    pub model: Option<String>,
    pub prompt_path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub policies: Vec<serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExternalAgentConfig {
    #[serde(default)]
    pub main_agents: Vec<ExternalAgent>,
    #[serde(default)]
    pub placeholders: Option<serde_json::Value>,
    #[serde(default)]
    pub template: Option<serde_json::Value>,
}

/// Builds a `ProtocolSpec` from an external agent configuration. QA
/// defaults to `skip` to mirror the behavior this config shape was
/// originally read for (§4.E).
pub fn build_spec_from_external_config(cfg: &ExternalAgentConfig) -> ProtocolSpec {
    let steps = cfg
        .main_agents
        .iter()
        .enumerate()
        .map(|(idx, agent)| {
            let name = format!("{idx:02}-{}", agent.id);
            StepSpec {
                step_type: infer_step_type_from_name(&name),
                id: agent.id.clone(),
                name,
                engine_id: agent.engine_id.clone(),
                model: agent.model.clone(),
                prompt_ref: agent.prompt_path.clone(),
                outputs: StepOutputs::default(),
                policies: agent.policies.clone(),
                qa: QaSpec { policy: Some(QaPolicyKind::Skip), prompt: None, model: None },
                order: idx as i64,
                description: agent.description.clone(),
                depends_on: agent.depends_on.clone(),
            }
        })
        .collect();
    ProtocolSpec { steps, placeholders: cfg.placeholders.clone(), template: cfg.template.clone() }
}

/// A `StepRun` row ready to be persisted, per `create_step_run`'s argument
/// list — the spec resolver builds this; the caller (`forge-lifecycle`)
/// writes it through the store.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: String,
    pub step_index: i64,
    pub step_name: String,
    pub step_type: StepType,
    pub model: Option<String>,
    pub engine_id: Option<String>,
    pub policy: Option<serde_json::Value>,
    pub summary: Option<String>,
    /// `StepSpec.id` values of sibling steps this one depends on.
    pub depends_on: Vec<String>,
}

/// Materializes the steps a `ProtocolSpec` describes, skipping any whose
/// name is already present (idempotent re-plan).
pub fn create_steps_from_spec(spec: &ProtocolSpec, existing_names: &std::collections::HashSet<String>) -> Vec<PlannedStep> {
    spec.steps
        .iter()
        .enumerate()
        .filter(|(_, step)| !existing_names.contains(&step.name))
        .map(|(idx, step)| PlannedStep {
            id: step.id.clone(),
            step_index: idx as i64,
            step_name: step.name.clone(),
            step_type: step.step_type,
            model: step.model.clone(),
            engine_id: Some(step.engine_id.clone()),
            policy: (!step.policies.is_empty()).then(|| serde_json::Value::Array(step.policies.clone())),
            summary: step.description.clone(),
            depends_on: step.depends_on.clone(),
        })
        .collect()
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Validates every step's `prompt_ref` resolves to an existing file under
/// `base`. An empty vec means the spec is valid.
pub fn validate_protocol_spec(base: &Path, spec: &ProtocolSpec) -> Vec<String> {
    let mut errors = Vec::new();
    for step in &spec.steps {
        let resolved = resolve_relative(base, &step.prompt_ref);
        if !resolved.exists() {
            errors.push(format!("{}: prompt_ref missing: {}", step.name, resolved.display()));
        }
    }
    errors
}

#[derive(Debug, Clone)]
pub struct ResolvedOutputs {
    pub protocol: Option<PathBuf>,
    pub aux: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StepResolution {
    pub prompt_path: PathBuf,
    pub outputs: ResolvedOutputs,
    pub prompt_version: String,
    pub spec_hash: String,
    pub engine_id: String,
    pub model: Option<String>,
    pub qa: QaSpec,
    pub workdir: PathBuf,
}

/// 12-hex-char SHA-256 fingerprint of a file's bytes (§4.E).
pub fn fingerprint_file(path: &Path) -> CoreResult<String> {
    let bytes = std::fs::read(path).map_err(|e| CoreError::Dependency(format!("cannot read {}: {e}", path.display())))?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest)[..12].to_string())
}

/// SHA-256 hex digest of a spec's canonical JSON serialization.
pub fn spec_hash(spec: &ProtocolSpec) -> String {
    #[allow(clippy::expect_used)]
    let canonical = serde_json::to_vec(spec).expect("ProtocolSpec is plain data and always serializes");
    hex::encode(Sha256::digest(&canonical))
}

/// Resolves one `StepSpec` into absolute paths, a content fingerprint, and
/// the engine/model/QA block the lifecycle controller dispatches on.
pub fn resolve_step(
    step: &StepSpec,
    protocol_root: &Path,
    workspace_root: &Path,
    protocol_spec: &ProtocolSpec,
    default_engine_id: &str,
) -> CoreResult<StepResolution> {
    let prompt_path = resolve_relative(protocol_root, &step.prompt_ref);
    if !prompt_path.exists() {
        return Err(CoreError::ValidationError(format!("prompt_ref missing: {}", prompt_path.display())));
    }
    let prompt_version = fingerprint_file(&prompt_path)?;
    let outputs = ResolvedOutputs {
        protocol: step.outputs.protocol.as_ref().map(|p| resolve_relative(protocol_root, p)),
        aux: step.outputs.aux.iter().map(|(k, v)| (k.clone(), resolve_relative(protocol_root, v))).collect(),
    };
    Ok(StepResolution {
        prompt_path,
        outputs,
        prompt_version,
        spec_hash: spec_hash(protocol_spec),
        engine_id: if step.engine_id.is_empty() { default_engine_id.to_string() } else { step.engine_id.clone() },
        model: step.model.clone(),
        qa: step.qa.clone(),
        workdir: workspace_root.to_path_buf(),
    })
}
