//! WorkflowRun reconciler: stage-by-stage DAG driver
//!
//! Stages execute strictly sequentially; the tasks within a stage run in
//! parallel. Stage N+1 is created only after every stage-N task reached
//! Completed. A Failed task fails the run immediately; its stage siblings
//! are left to finish naturally so their logs survive.

use chrono::Utc;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::crds::{
    StageStatus, Task, TaskPhase, Workflow, WorkflowRun, WorkflowRunPhase, WorkflowSpec,
    WorkflowStage,
};
use crate::tasks::events;
use crate::tasks::types::{annotations, labels, stop_requested, Context, Error, Result};

const STAGE_REQUEUE: Duration = Duration::from_secs(10);

/// Concrete task name within a run: `<runName>-<workflowTaskName>`
#[must_use]
pub fn child_task_name(run_name: &str, workflow_task_name: &str) -> String {
    format!("{run_name}-{workflow_task_name}")
}

/// Assign `stage-<index>` names where the template left them out.
#[must_use]
pub fn resolve_stage_names(stages: &[WorkflowStage]) -> Vec<WorkflowStage> {
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let mut stage = stage.clone();
            if stage.name.is_none() {
                stage.name = Some(format!("stage-{index}"));
            }
            stage
        })
        .collect()
}

/// Workflow-task names must be unique across the whole run.
pub fn validate_unique_task_names(stages: &[WorkflowStage]) -> Result<(), String> {
    let mut seen = std::collections::BTreeSet::new();
    for stage in stages {
        if stage.tasks.is_empty() {
            return Err(format!(
                "stage {:?} has no tasks",
                stage.name.as_deref().unwrap_or("<unnamed>")
            ));
        }
        for task in &stage.tasks {
            if !seen.insert(task.name.clone()) {
                return Err(format!("duplicate workflow task name {:?}", task.name));
            }
        }
    }
    Ok(())
}

/// Rollup of one stage against the observed children
#[derive(Debug, Clone, PartialEq)]
pub struct StageRollup {
    pub total: i32,
    pub created: i32,
    pub completed: i32,
    pub failed: i32,
}

impl StageRollup {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    #[must_use]
    pub fn has_failure(&self) -> bool {
        self.failed > 0
    }

    #[must_use]
    pub fn phase(&self, stage_index: i32, current_stage: i32) -> &'static str {
        if self.has_failure() {
            "Failed"
        } else if self.is_complete() {
            "Completed"
        } else if self.created > 0 || stage_index <= current_stage {
            "Running"
        } else {
            "Pending"
        }
    }
}

/// Compute a stage rollup from the observed phase of each child.
#[must_use]
pub fn stage_rollup(
    run_name: &str,
    stage: &WorkflowStage,
    observed: &BTreeMap<String, TaskPhase>,
) -> StageRollup {
    let mut rollup = StageRollup {
        total: stage.tasks.len() as i32,
        created: 0,
        completed: 0,
        failed: 0,
    };
    for task in &stage.tasks {
        let name = child_task_name(run_name, &task.name);
        if let Some(phase) = observed.get(&name) {
            rollup.created += 1;
            match phase {
                TaskPhase::Completed => rollup.completed += 1,
                TaskPhase::Failed => rollup.failed += 1,
                _ => {}
            }
        }
    }
    rollup
}

#[instrument(skip(ctx), fields(run = %run.name_any(), namespace = run.namespace().unwrap_or_default()))]
pub async fn reconcile_workflow_run(run: Arc<WorkflowRun>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = run.namespace().ok_or(Error::MissingObjectKey)?;
    let run_name = run.name_any();

    let phase = run
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or(WorkflowRunPhase::Pending);
    if phase.is_terminal() {
        return Ok(Action::await_change());
    }

    // Resolve the workflow template once; a referenced Workflow is embedded
    // into the spec so later template edits cannot change a run mid-flight.
    let Some(workflow) = resolved_workflow(&run, &ctx, &namespace).await? else {
        return Ok(Action::requeue(Duration::from_secs(30)));
    };

    let stages = resolve_stage_names(&workflow.stages);
    if let Err(message) = validate_unique_task_names(&stages) {
        finish_run(&run, &ctx, WorkflowRunPhase::Failed, &message, None).await?;
        return Ok(Action::await_change());
    }
    let total_tasks: i32 = stages.iter().map(|s| s.tasks.len() as i32).sum();

    // Observe children
    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = format!("{}={run_name}", labels::WORKFLOW_RUN);
    let children = tasks.list(&ListParams::default().labels(&selector)).await?;
    let observed: BTreeMap<String, TaskPhase> = children
        .items
        .iter()
        .map(|t| {
            (
                t.name_any(),
                t.status.as_ref().map(|s| s.phase).unwrap_or_default(),
            )
        })
        .collect();

    // A stop request propagates to every live child; the run settles once
    // they are all terminal.
    if stop_requested(run.meta()) {
        return stop_run(&run, &ctx, &tasks, &stages, &observed, total_tasks).await;
    }

    let current_stage = run.status.as_ref().map(|s| s.current_stage).unwrap_or(-1);

    // First entry: start stage 0
    if current_stage < 0 {
        create_stage_tasks(&run, &ctx, &tasks, &stages, 0).await?;
        let rollups = all_rollups(&run_name, &stages, &observed);
        update_run_status(
            &run,
            &ctx,
            json!({
                "phase": WorkflowRunPhase::Running,
                "message": format!("stage 0/{} started", stages.len()),
                "currentStage": 0,
                "totalTasks": total_tasks,
                "completedTasks": count_completed(&observed),
                "failedTasks": count_failed(&observed),
                "stages": stage_statuses(&stages, &rollups, 0),
                "startTime": Utc::now().to_rfc3339(),
            }),
        )
        .await?;
        events::publish(
            &ctx,
            &run.object_ref(&()),
            "Scheduled",
            format!("started stage 0 of {}", stages.len()),
        )
        .await;
        return Ok(Action::requeue(STAGE_REQUEUE));
    }

    let stage_index = current_stage as usize;
    let Some(stage) = stages.get(stage_index) else {
        // currentStage ran past the template; treat as complete
        finish_run(&run, &ctx, WorkflowRunPhase::Completed, "all stages finished", Some(total_tasks))
            .await?;
        return Ok(Action::await_change());
    };

    // Idempotent creation: any missing task of the current stage is created
    // on every pass.
    create_stage_tasks(&run, &ctx, &tasks, &stages, stage_index).await?;

    let rollups = all_rollups(&run_name, &stages, &observed);
    let current = &rollups[stage_index];

    if current.has_failure() {
        let message = format!(
            "stage {} failed ({} of {} tasks failed)",
            stage.name.as_deref().unwrap_or_default(),
            current.failed,
            current.total
        );
        update_run_status(
            &run,
            &ctx,
            json!({
                "phase": WorkflowRunPhase::Failed,
                "message": message,
                "currentStage": current_stage,
                "totalTasks": total_tasks,
                "completedTasks": count_completed(&observed),
                "failedTasks": count_failed(&observed),
                "stages": stage_statuses(&stages, &rollups, current_stage),
                "completionTime": completion_time_patch(&run),
            }),
        )
        .await?;
        events::publish_warning(&ctx, &run.object_ref(&()), "Failed", message).await;
        return Ok(Action::await_change());
    }

    if current.is_complete() {
        let next = stage_index + 1;
        if next < stages.len() {
            create_stage_tasks(&run, &ctx, &tasks, &stages, next).await?;
            update_run_status(
                &run,
                &ctx,
                json!({
                    "phase": WorkflowRunPhase::Running,
                    "message": format!("stage {next}/{} started", stages.len()),
                    "currentStage": next as i32,
                    "totalTasks": total_tasks,
                    "completedTasks": count_completed(&observed),
                    "failedTasks": count_failed(&observed),
                    "stages": stage_statuses(&stages, &rollups, next as i32),
                }),
            )
            .await?;
            info!("advanced to stage {next}");
            return Ok(Action::requeue(STAGE_REQUEUE));
        }

        update_run_status(
            &run,
            &ctx,
            json!({
                "phase": WorkflowRunPhase::Completed,
                "message": "all stages completed",
                "currentStage": current_stage,
                "totalTasks": total_tasks,
                "completedTasks": count_completed(&observed),
                "failedTasks": 0,
                "stages": stage_statuses(&stages, &rollups, current_stage),
                "completionTime": completion_time_patch(&run),
            }),
        )
        .await?;
        events::publish(
            &ctx,
            &run.object_ref(&()),
            "Completed",
            "all stages completed".to_string(),
        )
        .await;
        return Ok(Action::await_change());
    }

    // Stage still in flight: refresh counts and wait
    update_run_status(
        &run,
        &ctx,
        json!({
            "phase": WorkflowRunPhase::Running,
            "message": format!(
                "stage {} running ({}/{} completed)",
                stage.name.as_deref().unwrap_or_default(),
                current.completed,
                current.total
            ),
            "currentStage": current_stage,
            "totalTasks": total_tasks,
            "completedTasks": count_completed(&observed),
            "failedTasks": count_failed(&observed),
            "stages": stage_statuses(&stages, &rollups, current_stage),
        }),
    )
    .await?;
    Ok(Action::requeue(STAGE_REQUEUE))
}

/// Return the embedded workflow, embedding the referenced template on first
/// reconcile. `None` means resolution must be retried later.
async fn resolved_workflow(
    run: &WorkflowRun,
    ctx: &Context,
    namespace: &str,
) -> Result<Option<WorkflowSpec>> {
    if let Some(workflow) = &run.spec.workflow {
        return Ok(Some(workflow.clone()));
    }
    let Some(ref_name) = &run.spec.workflow_ref else {
        finish_run(
            run,
            ctx,
            WorkflowRunPhase::Failed,
            "spec carries neither workflowRef nor an inline workflow",
            None,
        )
        .await?;
        return Ok(None);
    };

    let workflows: Api<Workflow> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(workflow) = workflows.get_opt(ref_name).await? else {
        warn!("workflow {namespace}/{ref_name} not found, retrying");
        update_run_status(
            run,
            ctx,
            json!({
                "phase": WorkflowRunPhase::Pending,
                "message": format!("workflow {ref_name} not found"),
                "currentStage": -1,
            }),
        )
        .await?;
        return Ok(None);
    };

    // Embed so the run is pinned to the template as observed now
    let runs: Api<WorkflowRun> = Api::namespaced(ctx.client.clone(), namespace);
    runs.patch(
        &run.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&json!({"spec": {"workflow": workflow.spec}})),
    )
    .await?;
    Ok(Some(workflow.spec.clone()))
}

/// Create every not-yet-observed task of a stage. AlreadyExists answers are
/// successes from a concurrent reconcile.
async fn create_stage_tasks(
    run: &WorkflowRun,
    ctx: &Context,
    tasks: &Api<Task>,
    stages: &[WorkflowStage],
    stage_index: usize,
) -> Result<()> {
    let run_name = run.name_any();
    let namespace = run.namespace().unwrap_or_default();
    let stage = &stages[stage_index];
    let stage_name = stage.name.clone().unwrap_or_default();

    let depends_on = if stage_index > 0 {
        let previous = &stages[stage_index - 1];
        Some(
            previous
                .tasks
                .iter()
                .map(|t| child_task_name(&run_name, &t.name))
                .collect::<Vec<_>>()
                .join(","),
        )
    } else {
        None
    };

    for workflow_task in &stage.tasks {
        let name = child_task_name(&run_name, &workflow_task.name);

        let mut task_labels = BTreeMap::new();
        task_labels.insert(labels::WORKFLOW_RUN.to_string(), run_name.clone());
        if let Some(workflow_ref) = &run.spec.workflow_ref {
            task_labels.insert(labels::WORKFLOW.to_string(), workflow_ref.clone());
        }
        task_labels.insert(labels::STAGE.to_string(), stage_name.clone());
        task_labels.insert(labels::STAGE_INDEX.to_string(), stage_index.to_string());
        if let Some(agent_ref) = &workflow_task.task.agent_ref {
            task_labels.insert(labels::AGENT.to_string(), agent_ref.name.clone());
        }

        let mut task_annotations = BTreeMap::new();
        if let Some(depends_on) = &depends_on {
            task_annotations.insert(annotations::DEPENDS_ON.to_string(), depends_on.clone());
        }

        let task = Task {
            metadata: kube::api::ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(task_labels),
                annotations: if task_annotations.is_empty() {
                    None
                } else {
                    Some(task_annotations)
                },
                owner_references: run.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: workflow_task.task.clone(),
            status: None,
        };

        match tasks.create(&PostParams::default(), &task).await {
            Ok(_) => info!("created workflow task {namespace}/{name}"),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("workflow task {name} already exists");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn stop_run(
    run: &WorkflowRun,
    ctx: &Context,
    tasks: &Api<Task>,
    stages: &[WorkflowStage],
    observed: &BTreeMap<String, TaskPhase>,
    total_tasks: i32,
) -> Result<Action> {
    let mut live = 0;
    for (name, phase) in observed {
        if !phase.is_terminal() {
            live += 1;
            let patch = json!({
                "metadata": {"annotations": {annotations::STOP: "true"}}
            });
            tasks
                .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
    }
    if live > 0 {
        debug!("stop requested, {live} child task(s) still live");
        return Ok(Action::requeue(STAGE_REQUEUE));
    }

    let run_name = run.name_any();
    let rollups = all_rollups(&run_name, stages, observed);
    let current_stage = run.status.as_ref().map(|s| s.current_stage).unwrap_or(-1);
    update_run_status(
        run,
        ctx,
        json!({
            "phase": WorkflowRunPhase::Completed,
            "message": "stopped by user",
            "currentStage": current_stage,
            "totalTasks": total_tasks,
            "completedTasks": count_completed(observed),
            "failedTasks": count_failed(observed),
            "stages": stage_statuses(stages, &rollups, current_stage),
            "completionTime": completion_time_patch(run),
        }),
    )
    .await?;
    events::publish(ctx, &run.object_ref(&()), "Stopped", "stopped by user".to_string()).await;
    Ok(Action::await_change())
}

fn all_rollups(
    run_name: &str,
    stages: &[WorkflowStage],
    observed: &BTreeMap<String, TaskPhase>,
) -> Vec<StageRollup> {
    stages
        .iter()
        .map(|stage| stage_rollup(run_name, stage, observed))
        .collect()
}

fn stage_statuses(
    stages: &[WorkflowStage],
    rollups: &[StageRollup],
    current_stage: i32,
) -> Vec<StageStatus> {
    stages
        .iter()
        .zip(rollups)
        .enumerate()
        .map(|(index, (stage, rollup))| StageStatus {
            name: stage.name.clone().unwrap_or_default(),
            index: index as i32,
            phase: rollup.phase(index as i32, current_stage).to_string(),
            total: rollup.total,
            completed: rollup.completed,
            failed: rollup.failed,
        })
        .collect()
}

fn count_completed(observed: &BTreeMap<String, TaskPhase>) -> i32 {
    observed
        .values()
        .filter(|p| **p == TaskPhase::Completed)
        .count() as i32
}

fn count_failed(observed: &BTreeMap<String, TaskPhase>) -> i32 {
    observed
        .values()
        .filter(|p| **p == TaskPhase::Failed)
        .count() as i32
}

fn completion_time_patch(run: &WorkflowRun) -> serde_json::Value {
    match run
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
    {
        Some(existing) => json!(existing),
        None => json!(Utc::now().to_rfc3339()),
    }
}

async fn finish_run(
    run: &WorkflowRun,
    ctx: &Context,
    phase: WorkflowRunPhase,
    message: &str,
    total_tasks: Option<i32>,
) -> Result<()> {
    let mut status = json!({
        "phase": phase,
        "message": message,
        "completionTime": completion_time_patch(run),
    });
    if let Some(total) = total_tasks {
        status["totalTasks"] = json!(total);
    }
    update_run_status(run, ctx, status).await?;
    match phase {
        WorkflowRunPhase::Completed => {
            events::publish(ctx, &run.object_ref(&()), "Completed", message.to_string()).await;
        }
        WorkflowRunPhase::Failed => {
            events::publish_warning(ctx, &run.object_ref(&()), "Failed", message.to_string()).await;
        }
        _ => {}
    }
    Ok(())
}

async fn update_run_status(
    run: &WorkflowRun,
    ctx: &Context,
    status: serde_json::Value,
) -> Result<()> {
    let namespace = run.namespace().unwrap_or_default();
    let runs: Api<WorkflowRun> = Api::namespaced(ctx.client.clone(), &namespace);
    runs.patch_status(
        &run.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&json!({"status": status})),
    )
    .await?;
    Ok(())
}

/// Error policy for the WorkflowRun controller
pub fn error_policy(run: Arc<WorkflowRun>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        run = %run.name_any(),
        error = ?error,
        "workflow run reconciliation failed, requeueing with backoff"
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{TaskSpec, WorkflowTask};

    fn stage(name: Option<&str>, task_names: &[&str]) -> WorkflowStage {
        WorkflowStage {
            name: name.map(str::to_string),
            tasks: task_names
                .iter()
                .map(|n| WorkflowTask {
                    name: (*n).to_string(),
                    task: TaskSpec::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn stage_names_are_assigned_by_index() {
        let stages = resolve_stage_names(&[
            stage(Some("plan"), &["a"]),
            stage(None, &["b", "c"]),
        ]);
        assert_eq!(stages[0].name.as_deref(), Some("plan"));
        assert_eq!(stages[1].name.as_deref(), Some("stage-1"));
    }

    #[test]
    fn duplicate_task_names_are_rejected() {
        let stages = vec![stage(None, &["a"]), stage(None, &["b", "a"])];
        let err = validate_unique_task_names(&stages).unwrap_err();
        assert!(err.contains("duplicate"));

        let stages = vec![stage(None, &["a"]), stage(None, &["b", "c"])];
        assert!(validate_unique_task_names(&stages).is_ok());
    }

    #[test]
    fn empty_stage_is_rejected() {
        let stages = vec![stage(Some("empty"), &[])];
        assert!(validate_unique_task_names(&stages).is_err());
    }

    #[test]
    fn child_task_names() {
        assert_eq!(child_task_name("nightly-run", "build"), "nightly-run-build");
    }

    #[test]
    fn rollup_tracks_stage_progress() {
        let stage = stage(Some("verify"), &["b", "c"]);
        let mut observed = BTreeMap::new();
        observed.insert("run-b".to_string(), TaskPhase::Completed);
        let rollup = stage_rollup("run", &stage, &observed);
        assert_eq!(rollup.total, 2);
        assert_eq!(rollup.created, 1);
        assert_eq!(rollup.completed, 1);
        assert!(!rollup.is_complete());
        assert!(!rollup.has_failure());

        observed.insert("run-c".to_string(), TaskPhase::Completed);
        let rollup = stage_rollup("run", &stage, &observed);
        assert!(rollup.is_complete());

        observed.insert("run-c".to_string(), TaskPhase::Failed);
        let rollup = stage_rollup("run", &stage, &observed);
        assert!(rollup.has_failure());
        assert_eq!(rollup.phase(0, 0), "Failed");
    }

    #[test]
    fn rollup_phase_for_future_stage_is_pending() {
        let stage = stage(None, &["z"]);
        let rollup = stage_rollup("run", &stage, &BTreeMap::new());
        assert_eq!(rollup.phase(2, 0), "Pending");
        assert_eq!(rollup.phase(0, 0), "Running");
    }
}
