// SPDX-License-Identifier: MIT

//! S6 — repo-local policy merge: a repo-local `.forge/policy.json` override
//! replaces the pack's required CI check, so the step is evaluated against
//! the merged check, not the pack's original one.

use crate::common::Harness;
use forge_core::{
    CiDefaults, EnforcementBlock, EnforcementMode, JobType, PackDefaults, PackMeta, PackRequirements, PolicyPack, PolicyPackDocument, PolicyPackId, PolicyPackStatus, PolicyUpdate, StepStatus,
};
use forge_wire::{JobPayload, PlanProtocolPayload};
use serde_json::json;

#[tokio::test]
async fn repo_local_override_replaces_the_pack_required_check() {
    let h = Harness::new().await;

    h.store
        .upsert_policy_pack(PolicyPack {
            id: PolicyPackId::new(0),
            key: "beginner-guided".into(),
            version: "1.0.0".into(),
            name: "Beginner Guided".into(),
            description: None,
            status: PolicyPackStatus::Active,
            pack: PolicyPackDocument {
                meta: PackMeta { key: "beginner-guided".into(), version: "1.0.0".into(), name: "Beginner Guided".into() },
                defaults: PackDefaults { models: None, ci: Some(CiDefaults { required_checks: vec!["scripts/ci/test.sh".into()] }) },
                requirements: PackRequirements { step_sections: vec![], protocol_files: vec![] },
                clarifications: vec![],
                enforcement: EnforcementBlock { mode: EnforcementMode::Block, block_codes: vec!["policy.ci.required_check_missing".into()] },
            },
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let mut project = h.project("demo").await;
    project = h
        .store
        .update_project_policy(
            project.id,
            PolicyUpdate {
                policy_pack_key: Some("beginner-guided".into()),
                policy_pack_version: Some("1.0.0".into()),
                policy_enforcement_mode: Some(EnforcementMode::Block),
                policy_repo_local_enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(project.policy_repo_local_enabled);

    // the pack's own check, scripts/ci/test.sh, is never created — only the
    // repo-local override's check is. If the merge didn't happen, the step
    // would be blocked on the pack's unmet check instead of completing.
    std::fs::create_dir_all(h.repo_dir.join(".forge")).unwrap();
    std::fs::write(
        h.repo_dir.join(".forge").join("policy.json"),
        json!({"defaults": {"ci": {"required_checks": ["scripts/ci/custom.sh"]}}}).to_string(),
    )
    .unwrap();
    std::fs::create_dir_all(h.repo_dir.join("scripts").join("ci")).unwrap();
    std::fs::write(h.repo_dir.join("scripts").join("ci").join("custom.sh"), "#!/bin/sh\nexit 0\n").unwrap();
    crate::common::make_executable(&h.repo_dir.join("scripts").join("ci").join("custom.sh"));

    let run_id = h.protocol_run(&project, "0006-demo").await;
    h.write_step("0006-demo", "00-setup.md", "## Goal\nset things up");

    h.queue
        .enqueue(JobType::PlanProtocol, JobPayload::PlanProtocol(PlanProtocolPayload { protocol_run_id: run_id }).encode(), forge_lifecycle::DEFAULT_QUEUE)
        .await
        .unwrap();
    h.push_ok();
    h.push_ok_with("ok");

    h.drain().await;

    let steps = h.store.list_step_runs(run_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Completed, "step should pass against the repo-local-merged check, not be blocked on the pack's own check");
}
