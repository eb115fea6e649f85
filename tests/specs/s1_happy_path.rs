// SPDX-License-Identifier: MIT

//! S1 — happy path: plan a two-step protocol, run both steps through QA,
//! and check the protocol completes with the exact event sequence spec'd.

use crate::common::{event_types, Harness};
use forge_core::{JobType, ProtocolStatus, StepStatus};
use forge_storage::EventFilter;
use forge_wire::{JobPayload, PlanProtocolPayload};

#[tokio::test]
async fn happy_path_completes_with_expected_event_sequence() {
    let h = Harness::new().await;
    let project = h.project("demo").await;
    let run_id = h.protocol_run(&project, "0001-demo").await;

    h.write_step("0001-demo", "00-setup.md", "## Goal\nset things up");
    h.write_step("0001-demo", "01-impl.md", "## Goal\ndo the work");

    h.queue
        .enqueue(JobType::PlanProtocol, JobPayload::PlanProtocol(PlanProtocolPayload { protocol_run_id: run_id }).encode(), forge_lifecycle::DEFAULT_QUEUE)
        .await
        .unwrap();

    // plan -> open_pr -> two execute_step_job/run_quality_job pairs -> done.
    let ran = h.drain().await;
    assert!(ran >= 5, "expected at least plan + 2x(execute, qa); ran {ran}");

    let run = h.store.get_protocol_run(run_id).await.unwrap();
    assert_eq!(run.status, ProtocolStatus::Completed);

    let steps = h.store.list_step_runs(run_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    let events = h.store.list_events(EventFilter { protocol_run_id: Some(run_id), ..Default::default() }).await.unwrap();
    assert_eq!(
        event_types(&events),
        vec!["planning_started", "planned", "step_completed", "qa_passed", "step_completed", "qa_passed", "protocol_completed"]
    );
}
