// SPDX-License-Identifier: MIT

//! S2 — policy block: a required CI check file is missing, so the first
//! step must be blocked before the engine ever runs.

use crate::common::{event_types, Harness};
use forge_core::{
    CiDefaults, EnforcementBlock, EnforcementMode, JobType, PackDefaults, PackMeta, PackRequirements, PolicyPack, PolicyPackDocument, PolicyPackId, PolicyPackStatus, PolicyUpdate,
    ProtocolStatus, StepStatus,
};
use forge_storage::EventFilter;
use forge_wire::{JobPayload, PlanProtocolPayload};

#[tokio::test]
async fn missing_required_ci_check_blocks_the_step_without_running_the_engine() {
    let h = Harness::new().await;

    let pack = h
        .store
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
    assert_eq!(pack.key, "beginner-guided");

    let mut project = h.project("demo").await;
    project = h
        .store
        .update_project_policy(
            project.id,
            PolicyUpdate {
                policy_pack_key: Some("beginner-guided".into()),
                policy_pack_version: Some("1.0.0".into()),
                policy_enforcement_mode: Some(EnforcementMode::Block),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(project.policy_enforcement_mode, EnforcementMode::Block);

    let run_id = h.protocol_run(&project, "0001-demo").await;
    h.write_step("0001-demo", "00-setup.md", "## Goal\nset things up");

    // scripts/ci/test.sh is never created under repo_dir, so the required
    // check is missing.

    h.queue
        .enqueue(JobType::PlanProtocol, JobPayload::PlanProtocol(PlanProtocolPayload { protocol_run_id: run_id }).encode(), forge_lifecycle::DEFAULT_QUEUE)
        .await
        .unwrap();

    h.drain().await;

    let run = h.store.get_protocol_run(run_id).await.unwrap();
    assert_eq!(run.status, ProtocolStatus::Blocked);

    let steps = h.store.list_step_runs(run_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Blocked);

    // the engine was never invoked: nothing was pushed onto the stub's
    // result queue, so a call would have fallen through to its default
    // success stub — the step being blocked instead of completed/needs_qa
    // is itself evidence the engine dispatch was skipped.
    let events = h.store.list_events(EventFilter { protocol_run_id: Some(run_id), ..Default::default() }).await.unwrap();
    let types = event_types(&events);
    assert!(types.contains(&"policy_blocked"), "events: {types:?}");

    let blocked_event = events.iter().find(|e| e.event_type == "policy_blocked").unwrap();
    let metadata = blocked_event.metadata.as_ref().unwrap();
    assert_eq!(metadata["code"], "policy.ci.required_check_missing");
}
