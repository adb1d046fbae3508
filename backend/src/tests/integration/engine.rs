use autoflow_shared::{Action, Condition, ExecutionStatus, Trigger};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pagination::PaginationParams;
use crate::services::NoopStorage;
use crate::tests::fixtures::{file_event, pdf_workflow, single_action_workflow, WorkflowFixture, FILE_CREATED};
use crate::tests::helpers::{
    engine_with, gate, registry_with, release, scripted, wait_for_status, wait_idle, wait_until, Behavior,
};
use crate::workflows::{ExecutionFilter, OutcomeStatus, WorkflowEngine};

#[tokio::test]
async fn test_pdf_trigger_runs_matching_workflow() {
    let (handler, tally) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("record", handler)]);
    let workflow = assert_ok!(engine.create_workflow(pdf_workflow()).await);

    let outcomes = engine.process_trigger(FILE_CREATED, file_event("report.pdf")).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].workflow_id, workflow.id);
    assert_eq!(outcomes[0].status, OutcomeStatus::Accepted);

    let execution_id = outcomes[0].execution_id.unwrap();
    let execution = wait_idle(&engine, execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.action_results[&0].success);
    assert_eq!(execution.action_results[&0].attempts, 1);
    assert!(execution.completed_at.is_some());
    assert_eq!(tally.calls(), 1);

    assert!(engine.process_trigger(FILE_CREATED, file_event("report.docx")).await.is_empty());
    assert!(engine.process_trigger("file_deleted", file_event("report.pdf")).await.is_empty());
    assert_eq!(tally.calls(), 1);
}

#[tokio::test]
async fn test_concurrency_limit_and_manual_bypass() {
    let hold = gate();
    let (handler, _) = scripted(Behavior::Gate(hold.clone()));
    let engine = engine_with(vec![("record", handler)]);
    let workflow = engine
        .create_workflow(WorkflowFixture::new().with_max_concurrent_runs(1).build())
        .await
        .unwrap();

    let first = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    wait_for_status(&engine, first, ExecutionStatus::Running).await;

    let err = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap_err();
    assert!(matches!(err, EngineError::ConcurrencyLimit { running: 1, limit: 1, .. }));
    assert_eq!(engine.get_engine_stats().await.active_executions, 1);

    let manual = engine.execute_workflow(workflow.id, json!({}), true).await.unwrap();
    assert!(engine.get_execution(manual).await.unwrap().manual);

    release(&hold);
    assert_eq!(wait_idle(&engine, first).await.status, ExecutionStatus::Completed);
    assert_eq!(engine.get_execution(manual).await.unwrap().status, ExecutionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fail_the_execution() {
    let (handler, tally) = scripted(Behavior::Fail("remote share offline"));
    let engine = engine_with(vec![("flaky", handler)]);
    let workflow = engine
        .create_workflow(single_action_workflow(Action::new("flaky", json!({})).with_retry(2, 1.0)))
        .await
        .unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    let execution = wait_idle(&engine, id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(tally.calls(), 3);
    assert_eq!(execution.action_results[&0].attempts, 3);
    assert_eq!(execution.failed_action, Some(0));
    let error = execution.error.unwrap();
    assert!(error.starts_with("action 0 (flaky) failed"), "{}", error);
    assert!(error.contains("(after 3 attempts)"), "{}", error);
}

#[tokio::test]
async fn test_cancelling_a_completed_execution_is_invalid() {
    let (handler, _) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("record", handler)]);
    let workflow = engine.create_workflow(WorkflowFixture::new().build()).await.unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    let done = wait_idle(&engine, id).await;
    assert_eq!(done.status, ExecutionStatus::Completed);

    let err = engine.cancel_execution(id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { status: ExecutionStatus::Completed, .. }));

    let after = engine.get_execution(id).await.unwrap();
    assert_eq!(after.status, ExecutionStatus::Completed);
    assert_eq!(after.completed_at, done.completed_at);
    assert_eq!(after.duration_ms, done.duration_ms);

    assert!(matches!(
        engine.cancel_execution(uuid::Uuid::new_v4()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_cancels_running_executions_first() {
    let hold = gate();
    let (blocking, _) = scripted(Behavior::Gate(hold.clone()));
    let (after, after_tally) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("block", blocking), ("after", after)]);
    let workflow = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_actions(vec![Action::new("block", json!({})), Action::new("after", json!({}))])
                .build(),
        )
        .await
        .unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    wait_for_status(&engine, id, ExecutionStatus::Running).await;

    engine.delete_workflow(workflow.id).await.unwrap();
    assert_eq!(engine.get_execution(id).await.unwrap().status, ExecutionStatus::Cancelled);
    assert!(matches!(engine.get_workflow(workflow.id).await, Err(EngineError::NotFound(_))));

    release(&hold);
    let execution = wait_idle(&engine, id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(after_tally.calls(), 0);

    assert!(matches!(engine.delete_workflow(workflow.id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_right_after_admission_still_cancels() {
    let hold = gate();
    let (handler, _) = scripted(Behavior::Gate(hold.clone()));
    let engine = engine_with(vec![("record", handler)]);
    let workflow = engine.create_workflow(WorkflowFixture::new().build()).await.unwrap();

    // Whether the run loop has started yet or not, deletion wins
    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    engine.delete_workflow(workflow.id).await.unwrap();
    release(&hold);

    let execution = wait_idle(&engine, id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_running_execution_skips_remaining_actions() {
    let hold = gate();
    let (blocking, _) = scripted(Behavior::Gate(hold.clone()));
    let (after, after_tally) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("block", blocking), ("after", after)]);
    let workflow = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_actions(vec![Action::new("block", json!({})), Action::new("after", json!({}))])
                .build(),
        )
        .await
        .unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    wait_for_status(&engine, id, ExecutionStatus::Running).await;

    assert_ok!(engine.cancel_execution(id).await);
    let cancelled = engine.get_execution(id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    release(&hold);
    let execution = wait_idle(&engine, id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.completed_at, cancelled.completed_at);
    assert_eq!(after_tally.calls(), 0);

    assert!(matches!(
        engine.cancel_execution(id).await,
        Err(EngineError::InvalidState { status: ExecutionStatus::Cancelled, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_workflow_timeout_bounds_the_whole_run() {
    let (handler, _) = scripted(Behavior::Sleep(Duration::from_secs(10)));
    let engine = engine_with(vec![("slow", handler)]);
    let workflow = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_actions(vec![Action::new("slow", json!({})).with_timeout(60.0)])
                .with_timeout(2.0)
                .build(),
        )
        .await
        .unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    let execution = wait_idle(&engine, id).await;

    assert_eq!(execution.status, ExecutionStatus::Timeout);
    assert!(execution.error.unwrap().contains("timed out after 2s"));
    assert_eq!(engine.get_engine_stats().await.timed_out_executions, 1);
}

#[tokio::test]
async fn test_handler_panic_is_recorded_as_failure() {
    let (handler, _) = scripted(Behavior::Panic);
    let (ok, _) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("explode", handler), ("record", ok)]);
    let broken = engine
        .create_workflow(single_action_workflow(Action::new("explode", json!({}))))
        .await
        .unwrap();
    let healthy = engine.create_workflow(WorkflowFixture::new().build()).await.unwrap();

    let id = engine.execute_workflow(broken.id, json!({}), false).await.unwrap();
    let execution = wait_idle(&engine, id).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("internal engine error: handler exploded"));

    // The engine keeps working afterwards
    let id = engine.execute_workflow(healthy.id, json!({}), false).await.unwrap();
    assert_eq!(wait_idle(&engine, id).await.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_disabled_workflow_only_runs_manually() {
    let (handler, _) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("record", handler)]);
    let mut definition = WorkflowFixture::new().build();
    definition.enabled = false;
    let workflow = engine.create_workflow(definition).await.unwrap();

    assert!(matches!(
        engine.execute_workflow(workflow.id, json!({}), false).await,
        Err(EngineError::WorkflowDisabled(_))
    ));
    assert!(engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await.is_empty());

    let id = engine.execute_workflow(workflow.id, json!({}), true).await.unwrap();
    assert_eq!(wait_idle(&engine, id).await.status, ExecutionStatus::Completed);

    assert!(matches!(
        engine.execute_workflow(uuid::Uuid::new_v4(), json!({}), true).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_workflow_matches_at_most_once_per_event() {
    let (handler, tally) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("record", handler)]);
    let mut definition = pdf_workflow();
    definition.triggers.push(Trigger::new(FILE_CREATED));
    let workflow = engine.create_workflow(definition).await.unwrap();

    let outcomes = engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await;
    assert_eq!(outcomes.len(), 1);

    wait_idle(&engine, outcomes[0].execution_id.unwrap()).await;
    assert_eq!(tally.calls(), 1);
    assert_eq!(engine.get_engine_stats().await.total_executions, 1);
    assert_eq!(outcomes[0].workflow_name, workflow.name);
}

#[tokio::test]
async fn test_rejected_outcome_when_limit_reached() {
    let hold = gate();
    let (handler, _) = scripted(Behavior::Gate(hold.clone()));
    let engine = engine_with(vec![("record", handler)]);
    engine.create_workflow(WorkflowFixture::new().build()).await.unwrap();

    let first = engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await;
    assert_eq!(first[0].status, OutcomeStatus::Accepted);

    let second = engine.process_trigger(FILE_CREATED, file_event("b.pdf")).await;
    assert_eq!(second[0].status, OutcomeStatus::Rejected);
    assert!(second[0].execution_id.is_none());
    assert_eq!(second[0].error.as_ref().unwrap().code, "CONCURRENCY_LIMIT");

    release(&hold);
    wait_idle(&engine, first[0].execution_id.unwrap()).await;
}

#[tokio::test(start_paused = true)]
async fn test_debounce_admits_one_execution_per_window() {
    let (handler, _) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("record", handler)]);
    engine
        .create_workflow(
            WorkflowFixture::new()
                .with_trigger(Trigger::new(FILE_CREATED).with_debounce(5.0))
                .with_max_concurrent_runs(10)
                .build(),
        )
        .await
        .unwrap();

    let first = engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await;
    let second = engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await;
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());

    tokio::time::advance(Duration::from_secs(6)).await;
    let third = engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await;
    assert_eq!(third.len(), 1);
}

#[tokio::test]
async fn test_oversized_debounce_is_accepted_and_suppresses() {
    let (handler, _) = scripted(Behavior::Succeed);
    let engine = engine_with(vec![("record", handler)]);
    assert_ok!(
        engine
            .create_workflow(
                WorkflowFixture::new()
                    .with_trigger(Trigger::new(FILE_CREATED).with_debounce(1e20))
                    .with_max_concurrent_runs(10)
                    .build(),
            )
            .await
    );

    let first = engine.process_trigger(FILE_CREATED, file_event("a.pdf")).await;
    let second = engine.process_trigger(FILE_CREATED, file_event("b.pdf")).await;
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_count_never_exceeds_limit_under_load() {
    let hold = gate();
    let (handler, tally) = scripted(Behavior::Gate(hold.clone()));
    let engine = engine_with(vec![("record", handler)]);
    let workflow = engine
        .create_workflow(WorkflowFixture::new().with_max_concurrent_runs(3).build())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..25 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.process_trigger(FILE_CREATED, file_event(&format!("{}.pdf", i))).await
        }));
    }

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for task in tasks {
        for outcome in task.await.unwrap() {
            match outcome.status {
                OutcomeStatus::Accepted => accepted.push(outcome.execution_id.unwrap()),
                OutcomeStatus::Rejected => rejected += 1,
                OutcomeStatus::Error => panic!("unexpected error outcome"),
            }
        }
    }

    assert_eq!(accepted.len(), 3);
    assert_eq!(rejected, 22);
    assert!(engine.get_engine_stats().await.running_executions <= 3);

    release(&hold);
    for id in &accepted {
        wait_until(&engine, *id, |e| e.is_terminal()).await;
    }
    assert!(tally.max_in_flight() <= workflow.max_concurrent_runs as usize);
}

#[tokio::test]
async fn test_status_only_moves_forward() {
    fn rank(status: ExecutionStatus) -> u8 {
        match status {
            ExecutionStatus::Pending => 0,
            ExecutionStatus::Running => 1,
            _ => 2,
        }
    }

    let (handler, _) = scripted(Behavior::Sleep(Duration::from_millis(30)));
    let engine = engine_with(vec![("record", handler)]);
    let workflow = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_actions(vec![Action::new("record", json!({})), Action::new("record", json!({}))])
                .build(),
        )
        .await
        .unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    let mut seen = Vec::new();
    loop {
        let execution = engine.get_execution(id).await.unwrap();
        seen.push(execution.status);
        if execution.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(seen.windows(2).all(|pair| rank(pair[0]) <= rank(pair[1])));
    assert_eq!(seen.last(), Some(&ExecutionStatus::Completed));

    let first = wait_idle(&engine, id).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.get_execution(id).await.unwrap(), first);
}

#[tokio::test]
async fn test_disabled_actions_are_skipped_and_outputs_flow_forward() {
    let (echo, _) = scripted(Behavior::Echo);
    let (skipped, skipped_tally) = scripted(Behavior::Fail("should not run"));
    let engine = engine_with(vec![("echo", echo), ("skipped", skipped)]);
    let workflow = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_actions(vec![
                    Action::new("echo", json!({"value": "{{name}}"})),
                    Action::new("skipped", json!({})).disabled(),
                    Action::new("echo", json!({"previous": "{{outputs.0.value}}"})),
                ])
                .build(),
        )
        .await
        .unwrap();

    let id = engine
        .execute_workflow(workflow.id, json!({"name": "scan.pdf"}), false)
        .await
        .unwrap();
    let execution = wait_idle(&engine, id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(skipped_tally.calls(), 0);
    assert!(!execution.action_results.contains_key(&1));
    assert_eq!(execution.action_results[&2].data.as_ref().unwrap()["previous"], "scan.pdf");
}

#[tokio::test]
async fn test_stats_and_bounded_history() {
    let (ok, _) = scripted(Behavior::Succeed);
    let (bad, _) = scripted(Behavior::Fail("nope"));
    let engine = WorkflowEngine::new(
        EngineConfig {
            history_limit: 2,
            ..EngineConfig::default()
        },
        registry_with(vec![("record", ok), ("bad", bad)]),
        Arc::new(NoopStorage),
    );
    let good = engine.create_workflow(WorkflowFixture::new().build()).await.unwrap();
    let failing = engine
        .create_workflow(single_action_workflow(Action::new("bad", json!({}))))
        .await
        .unwrap();

    for workflow_id in [good.id, good.id, failing.id] {
        let id = engine.execute_workflow(workflow_id, json!({}), false).await.unwrap();
        wait_idle(&engine, id).await;
    }

    let stats = engine.get_engine_stats().await;
    assert_eq!(stats.total_workflows, 2);
    assert_eq!(stats.enabled_workflows, 2);
    assert_eq!(stats.total_executions, 3);
    assert_eq!(stats.completed_executions, 2);
    assert_eq!(stats.failed_executions, 1);
    assert_eq!(stats.history_size, 2);
    assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);

    let listed = engine
        .list_executions(&ExecutionFilter::default(), PaginationParams::default())
        .await;
    assert_eq!(listed.meta.total, 2);
    assert_eq!(listed.data[0].status, ExecutionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_between_actions_and_refuses_new_work() {
    let (handler, tally) = scripted(Behavior::Sleep(Duration::from_secs(1)));
    let engine = engine_with(vec![("slow", handler)]);
    let workflow = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_actions(vec![Action::new("slow", json!({})), Action::new("slow", json!({}))])
                .build(),
        )
        .await
        .unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    wait_for_status(&engine, id, ExecutionStatus::Running).await;

    assert!(engine.shutdown(Duration::from_secs(10)).await);
    let execution = engine.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(tally.calls(), 1);

    assert!(matches!(
        engine.execute_workflow(workflow.id, json!({}), false).await,
        Err(EngineError::ShuttingDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_grace_elapses_with_stuck_action() {
    let hold = gate();
    let (handler, _) = scripted(Behavior::Gate(hold.clone()));
    let engine = engine_with(vec![("record", handler)]);
    let workflow = engine.create_workflow(WorkflowFixture::new().build()).await.unwrap();

    let id = engine.execute_workflow(workflow.id, json!({}), false).await.unwrap();
    wait_for_status(&engine, id, ExecutionStatus::Running).await;

    assert!(!engine.shutdown(Duration::from_secs(1)).await);
    release(&hold);
}

#[tokio::test]
async fn test_validation_errors_surface_through_the_engine() {
    let engine = engine_with(vec![]);
    let err = engine
        .create_workflow(
            WorkflowFixture::new()
                .with_trigger(Trigger::new(FILE_CREATED).with_condition(Condition::regex("name", "(")))
                .build(),
        )
        .await
        .unwrap_err();

    // Triggers are checked before actions, so the bad regex is reported first
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("triggers[0].conditions[0].value"));
    assert_eq!(engine.get_engine_stats().await.total_workflows, 0);
}
