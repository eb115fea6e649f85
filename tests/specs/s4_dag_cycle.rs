// SPDX-License-Identifier: MIT

//! S4 — dependency graph cycle: an external agent-configuration object whose
//! steps form a cycle (A -> B -> C -> A) must fail planning instead of ever
//! persisting a `StepRun`.

use crate::common::{event_types, Harness};
use forge_core::ProtocolStatus;
use serde_json::json;

#[tokio::test]
async fn cyclic_depends_on_fails_planning_before_any_step_is_created() {
    let h = Harness::new().await;
    let project = h.project("demo").await;

    let template_config = json!({
        "main_agents": [
            {"id": "a", "engine_id": "codex", "prompt_path": "a.md", "depends_on": ["c"]},
            {"id": "b", "engine_id": "codex", "prompt_path": "b.md", "depends_on": ["a"]},
            {"id": "c", "engine_id": "codex", "prompt_path": "c.md", "depends_on": ["b"]},
        ]
    });
    let run_id = h.protocol_run_with_template(&project, "0004-demo", Some(template_config)).await;

    let err = h.controller.plan_protocol_job(run_id).await.unwrap_err();
    assert!(err.to_string().contains("cycle"), "error: {err}");

    let run = h.store.get_protocol_run(run_id).await.unwrap();
    assert_eq!(run.status, ProtocolStatus::Failed);

    let steps = h.store.list_step_runs(run_id).await.unwrap();
    assert!(steps.is_empty(), "no step should ever be persisted for a cyclic spec");

    let events = h.store.list_events(forge_storage::EventFilter { protocol_run_id: Some(run_id), ..Default::default() }).await.unwrap();
    assert_eq!(event_types(&events), vec!["planning_started", "planning_failed"]);
}
