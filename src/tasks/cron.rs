//! Cron scheduling for CronTask and CronWorkflow
//!
//! Each reconcile recomputes the most recent due tick from the wall clock
//! and the lastScheduleTime watermark; nothing accumulates, so clock drift
//! self-corrects. Child names are derived from the tick so concurrent
//! observers collide harmlessly on AlreadyExists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::crds::{
    ActiveRef, ConcurrencyPolicy, CronTask, CronWorkflow, Task, TaskPhase, WorkflowRun,
    WorkflowRunPhase,
};
use crate::tasks::events;
use crate::tasks::types::{annotations, is_not_found, labels, Context, Error, Result};

/// Upper bound on ticks examined per reconcile; collapses long outages to
/// the most recent tick instead of replaying history.
const MAX_TICKS_PER_SCAN: usize = 1000;

/// Deterministic child name for a tick
#[must_use]
pub fn child_name(parent: &str, tick: DateTime<Utc>) -> String {
    format!("{parent}-{}", tick.timestamp())
}

/// Parse a 5-field POSIX cron expression (UTC). The `cron` crate expects a
/// seconds field, so one is prepended.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(Error::CronError(format!(
            "expected 5 cron fields, got {fields} in {expression:?}"
        )));
    }
    Schedule::from_str(&format!("0 {expression}"))
        .map_err(|e| Error::CronError(format!("invalid cron expression {expression:?}: {e}")))
}

/// Most recent tick in `(watermark, now]`, if any.
#[must_use]
pub fn most_recent_due_tick(
    schedule: &Schedule,
    watermark: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&watermark)
        .take(MAX_TICKS_PER_SCAN)
        .take_while(|tick| *tick <= now)
        .last()
}

/// Next tick strictly after `now`, for requeueing.
#[must_use]
pub fn next_tick(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

/// Observed state of a spawned child
#[derive(Debug, Clone, PartialEq)]
pub enum ChildState {
    Active,
    Succeeded { completed_at: Option<DateTime<Utc>> },
    Failed { completed_at: Option<DateTime<Utc>> },
    Gone,
}

impl ChildState {
    fn is_active(&self) -> bool {
        matches!(self, ChildState::Active)
    }
}

/// The per-kind operations the shared scheduling core needs
#[async_trait]
pub trait CronChildOps: Send + Sync {
    /// Label key stamped on children (`kubetask.io/crontask` or
    /// `kubetask.io/cronworkflow`)
    fn parent_label(&self) -> &'static str;

    async fn create_child(&self, namespace: &str, name: &str) -> Result<()>;

    async fn child_state(&self, namespace: &str, name: &str) -> Result<ChildState>;

    async fn stop_child(&self, namespace: &str, name: &str) -> Result<()>;

    /// Finished children as `(name, completed_at, succeeded)`
    async fn list_finished(&self, namespace: &str, parent: &str)
        -> Result<Vec<(String, DateTime<Utc>, bool)>>;

    async fn delete_child(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Everything the shared core needs from either cron kind
pub struct CronSpecView {
    pub schedule: String,
    pub policy: ConcurrencyPolicy,
    pub suspend: bool,
    pub successful_history_limit: u32,
    pub failed_history_limit: u32,
}

/// Shared scheduling core. Returns the patched status document and the
/// requeue action.
async fn run_schedule(
    ctx: &Context,
    ops: &dyn CronChildOps,
    view: &CronSpecView,
    namespace: &str,
    parent_name: &str,
    creation: DateTime<Utc>,
    status: &crate::crds::CronStatus,
    reference: &k8s_openapi::api::core::v1::ObjectReference,
) -> Result<(serde_json::Value, Action)> {
    let schedule = parse_schedule(&view.schedule)?;
    let now = Utc::now();

    // Prune the active list against live state, harvesting the newest
    // successful completion along the way.
    let mut active: Vec<ActiveRef> = Vec::new();
    let mut last_successful = status.last_successful_time.clone();
    for child in status.active.clone().unwrap_or_default() {
        match ops.child_state(&child.namespace, &child.name).await? {
            ChildState::Active => active.push(child),
            ChildState::Succeeded { completed_at } => {
                let stamp = completed_at.unwrap_or(now).to_rfc3339();
                if last_successful.as_deref().map_or(true, |prev| prev < stamp.as_str()) {
                    last_successful = Some(stamp);
                }
            }
            ChildState::Failed { .. } | ChildState::Gone => {}
        }
    }

    let watermark = status
        .last_schedule_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map_or(creation, |t| t.with_timezone(&Utc));

    let mut last_schedule = status.last_schedule_time.clone();

    if !view.suspend {
        if let Some(due) = most_recent_due_tick(&schedule, watermark, now) {
            let skip = match view.policy {
                ConcurrencyPolicy::Allow => false,
                ConcurrencyPolicy::Forbid => {
                    if active.is_empty() {
                        false
                    } else {
                        debug!(
                            parent = %parent_name,
                            "tick due but {} child(ren) active, Forbid skips",
                            active.len()
                        );
                        true
                    }
                }
                ConcurrencyPolicy::Replace => {
                    for child in &active {
                        ops.stop_child(&child.namespace, &child.name).await?;
                    }
                    active.clear();
                    false
                }
            };

            if !skip {
                let name = child_name(parent_name, due);
                ops.create_child(namespace, &name).await?;
                info!(parent = %parent_name, child = %name, "created scheduled child");
                events::publish(
                    ctx,
                    reference,
                    "Scheduled",
                    format!("created {name} for tick {}", due.to_rfc3339()),
                )
                .await;
                last_schedule = Some(due.to_rfc3339());
                active.push(ActiveRef {
                    name,
                    namespace: namespace.to_string(),
                });
            }
        }
    }

    // History limits
    trim_history(ops, namespace, parent_name, view).await?;

    let status_patch = json!({
        "lastScheduleTime": last_schedule,
        "lastSuccessfulTime": last_successful,
        "active": active,
        "message": serde_json::Value::Null,
    });

    let action = match next_tick(&schedule, now) {
        Some(tick) => {
            let delay = (tick - now).to_std().unwrap_or(Duration::from_secs(1));
            Action::requeue(delay.max(Duration::from_secs(1)))
        }
        None => Action::await_change(),
    };
    Ok((status_patch, action))
}

async fn trim_history(
    ops: &dyn CronChildOps,
    namespace: &str,
    parent_name: &str,
    view: &CronSpecView,
) -> Result<()> {
    let finished = ops.list_finished(namespace, parent_name).await?;
    let mut succeeded: Vec<_> = finished.iter().filter(|(_, _, ok)| *ok).cloned().collect();
    let mut failed: Vec<_> = finished.iter().filter(|(_, _, ok)| !*ok).cloned().collect();
    succeeded.sort_by(|a, b| b.1.cmp(&a.1));
    failed.sort_by(|a, b| b.1.cmp(&a.1));

    for (name, _, _) in succeeded
        .into_iter()
        .skip(view.successful_history_limit as usize)
    {
        debug!("trimming successful child {namespace}/{name}");
        ops.delete_child(namespace, &name).await?;
    }
    for (name, _, _) in failed.into_iter().skip(view.failed_history_limit as usize) {
        debug!("trimming failed child {namespace}/{name}");
        ops.delete_child(namespace, &name).await?;
    }
    Ok(())
}

// CronTask -> Task

struct TaskChildOps<'a> {
    ctx: &'a Context,
    parent: &'a CronTask,
}

#[async_trait]
impl CronChildOps for TaskChildOps<'_> {
    fn parent_label(&self) -> &'static str {
        labels::CRON_TASK
    }

    async fn create_child(&self, namespace: &str, name: &str) -> Result<()> {
        let tasks: Api<Task> = Api::namespaced(self.ctx.client.clone(), namespace);
        let mut child_labels = BTreeMap::new();
        child_labels.insert(self.parent_label().to_string(), self.parent.name_any());
        if let Some(agent_ref) = &self.parent.spec.task.agent_ref {
            child_labels.insert(labels::AGENT.to_string(), agent_ref.name.clone());
        }
        let task = Task {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(child_labels),
                owner_references: self.parent.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: self.parent.spec.task.clone(),
            status: None,
        };
        match tasks.create(&PostParams::default(), &task).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn child_state(&self, namespace: &str, name: &str) -> Result<ChildState> {
        let tasks: Api<Task> = Api::namespaced(self.ctx.client.clone(), namespace);
        let Some(task) = tasks.get_opt(name).await? else {
            return Ok(ChildState::Gone);
        };
        let status = task.status.as_ref();
        let completed_at = status
            .and_then(|s| s.completion_time.as_deref())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(match status.map(|s| s.phase).unwrap_or_default() {
            TaskPhase::Completed => ChildState::Succeeded { completed_at },
            TaskPhase::Failed => ChildState::Failed { completed_at },
            _ => ChildState::Active,
        })
    }

    async fn stop_child(&self, namespace: &str, name: &str) -> Result<()> {
        annotate_stop::<Task>(&self.ctx.client, namespace, name).await
    }

    async fn list_finished(
        &self,
        namespace: &str,
        parent: &str,
    ) -> Result<Vec<(String, DateTime<Utc>, bool)>> {
        let tasks: Api<Task> = Api::namespaced(self.ctx.client.clone(), namespace);
        let selector = format!("{}={parent}", self.parent_label());
        let list = tasks.list(&ListParams::default().labels(&selector)).await?;
        Ok(list
            .items
            .iter()
            .filter_map(|task| {
                let status = task.status.as_ref()?;
                if !status.phase.is_terminal() {
                    return None;
                }
                let completed = status
                    .completion_time
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|t| t.with_timezone(&Utc))?;
                Some((
                    task.name_any(),
                    completed,
                    status.phase == TaskPhase::Completed,
                ))
            })
            .collect())
    }

    async fn delete_child(&self, namespace: &str, name: &str) -> Result<()> {
        let tasks: Api<Task> = Api::namespaced(self.ctx.client.clone(), namespace);
        match tasks.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// CronWorkflow -> WorkflowRun

struct WorkflowChildOps<'a> {
    ctx: &'a Context,
    parent: &'a CronWorkflow,
}

#[async_trait]
impl CronChildOps for WorkflowChildOps<'_> {
    fn parent_label(&self) -> &'static str {
        labels::CRON_WORKFLOW
    }

    async fn create_child(&self, namespace: &str, name: &str) -> Result<()> {
        let runs: Api<WorkflowRun> = Api::namespaced(self.ctx.client.clone(), namespace);
        let mut child_labels = BTreeMap::new();
        child_labels.insert(self.parent_label().to_string(), self.parent.name_any());
        let run = WorkflowRun {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(child_labels),
                owner_references: self.parent.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: crate::crds::WorkflowRunSpec {
                workflow_ref: self.parent.spec.workflow_ref.clone(),
                workflow: self.parent.spec.workflow.clone(),
            },
            status: None,
        };
        match runs.create(&PostParams::default(), &run).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn child_state(&self, namespace: &str, name: &str) -> Result<ChildState> {
        let runs: Api<WorkflowRun> = Api::namespaced(self.ctx.client.clone(), namespace);
        let Some(run) = runs.get_opt(name).await? else {
            return Ok(ChildState::Gone);
        };
        let status = run.status.as_ref();
        let completed_at = status
            .and_then(|s| s.completion_time.as_deref())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(
            match status.map(|s| s.phase).unwrap_or(WorkflowRunPhase::Pending) {
                WorkflowRunPhase::Completed => ChildState::Succeeded { completed_at },
                WorkflowRunPhase::Failed => ChildState::Failed { completed_at },
                _ => ChildState::Active,
            },
        )
    }

    async fn stop_child(&self, namespace: &str, name: &str) -> Result<()> {
        annotate_stop::<WorkflowRun>(&self.ctx.client, namespace, name).await
    }

    async fn list_finished(
        &self,
        namespace: &str,
        parent: &str,
    ) -> Result<Vec<(String, DateTime<Utc>, bool)>> {
        let runs: Api<WorkflowRun> = Api::namespaced(self.ctx.client.clone(), namespace);
        let selector = format!("{}={parent}", self.parent_label());
        let list = runs.list(&ListParams::default().labels(&selector)).await?;
        Ok(list
            .items
            .iter()
            .filter_map(|run| {
                let status = run.status.as_ref()?;
                if !status.phase.is_terminal() {
                    return None;
                }
                let completed = status
                    .completion_time
                    .as_deref()
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|t| t.with_timezone(&Utc))?;
                Some((
                    run.name_any(),
                    completed,
                    status.phase == WorkflowRunPhase::Completed,
                ))
            })
            .collect())
    }

    async fn delete_child(&self, namespace: &str, name: &str) -> Result<()> {
        let runs: Api<WorkflowRun> = Api::namespaced(self.ctx.client.clone(), namespace);
        match runs.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn annotate_stop<K>(client: &kube::Client, namespace: &str, name: &str) -> Result<()>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let patch = json!({
        "metadata": {"annotations": {annotations::STOP: "true"}}
    });
    match api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(ctx), fields(crontask = %cron.name_any(), namespace = cron.namespace().unwrap_or_default()))]
pub async fn reconcile_cron_task(cron: Arc<CronTask>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = cron.namespace().ok_or(Error::MissingObjectKey)?;
    let name = cron.name_any();
    let api: Api<CronTask> = Api::namespaced(ctx.client.clone(), &namespace);

    let view = CronSpecView {
        schedule: cron.spec.schedule.clone(),
        policy: cron.spec.concurrency_policy.unwrap_or_default(),
        suspend: cron.spec.suspend.unwrap_or(false),
        successful_history_limit: cron
            .spec
            .successful_history_limit
            .unwrap_or(crate::crds::cron::DEFAULT_SUCCESSFUL_HISTORY_LIMIT),
        failed_history_limit: cron
            .spec
            .failed_history_limit
            .unwrap_or(crate::crds::cron::DEFAULT_FAILED_HISTORY_LIMIT),
    };
    let ops = TaskChildOps { ctx: &ctx, parent: &cron };
    let creation = cron
        .metadata
        .creation_timestamp
        .as_ref()
        .map_or_else(Utc::now, |t| t.0);
    let status = cron.status.clone().unwrap_or_default();

    match run_schedule(
        &ctx,
        &ops,
        &view,
        &namespace,
        &name,
        creation,
        &status,
        &cron.object_ref(&()),
    )
    .await
    {
        Ok((status_patch, action)) => {
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({"status": status_patch})),
            )
            .await?;
            Ok(action)
        }
        Err(Error::CronError(message)) => {
            // Invalid cron expressions are terminal until the spec changes
            warn!(crontask = %name, "{message}");
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({"status": {"message": message}})),
            )
            .await?;
            events::publish_warning(&ctx, &cron.object_ref(&()), "Failed", message).await;
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip(ctx), fields(cronworkflow = %cron.name_any(), namespace = cron.namespace().unwrap_or_default()))]
pub async fn reconcile_cron_workflow(
    cron: Arc<CronWorkflow>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let namespace = cron.namespace().ok_or(Error::MissingObjectKey)?;
    let name = cron.name_any();
    let api: Api<CronWorkflow> = Api::namespaced(ctx.client.clone(), &namespace);

    let view = CronSpecView {
        schedule: cron.spec.schedule.clone(),
        policy: cron.spec.concurrency_policy.unwrap_or_default(),
        suspend: cron.spec.suspend.unwrap_or(false),
        successful_history_limit: cron
            .spec
            .successful_history_limit
            .unwrap_or(crate::crds::cron::DEFAULT_SUCCESSFUL_HISTORY_LIMIT),
        failed_history_limit: cron
            .spec
            .failed_history_limit
            .unwrap_or(crate::crds::cron::DEFAULT_FAILED_HISTORY_LIMIT),
    };
    let ops = WorkflowChildOps { ctx: &ctx, parent: &cron };
    let creation = cron
        .metadata
        .creation_timestamp
        .as_ref()
        .map_or_else(Utc::now, |t| t.0);
    let status = cron.status.clone().unwrap_or_default();

    match run_schedule(
        &ctx,
        &ops,
        &view,
        &namespace,
        &name,
        creation,
        &status,
        &cron.object_ref(&()),
    )
    .await
    {
        Ok((status_patch, action)) => {
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({"status": status_patch})),
            )
            .await?;
            Ok(action)
        }
        Err(Error::CronError(message)) => {
            warn!(cronworkflow = %name, "{message}");
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&json!({"status": {"message": message}})),
            )
            .await?;
            events::publish_warning(&ctx, &cron.object_ref(&()), "Failed", message).await;
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

/// Error policy shared by both cron controllers
pub fn error_policy_cron_task(cron: Arc<CronTask>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(crontask = %cron.name_any(), error = ?error, "cron reconciliation failed");
    Action::requeue(Duration::from_secs(15))
}

pub fn error_policy_cron_workflow(
    cron: Arc<CronWorkflow>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    warn!(cronworkflow = %cron.name_any(), error = ?error, "cron reconciliation failed");
    Action::requeue(Duration::from_secs(15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_parse() {
        assert!(parse_schedule("* * * * *").is_ok());
        assert!(parse_schedule("*/5 2-4 1,15 * 1-5").is_ok());
        assert!(parse_schedule("0 0 * *").is_err());
        assert!(parse_schedule("not a cron").is_err());
        assert!(parse_schedule("61 * * * *").is_err());
    }

    #[test]
    fn due_tick_is_most_recent_within_window() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let watermark = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 3, 30).unwrap();
        let due = most_recent_due_tick(&schedule, watermark, now).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 3, 1, 12, 3, 0).unwrap());
    }

    #[test]
    fn no_tick_due_before_first_fire() {
        let schedule = parse_schedule("0 0 * * *").unwrap();
        let watermark = Utc.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        assert!(most_recent_due_tick(&schedule, watermark, now).is_none());
    }

    #[test]
    fn tick_strictly_after_watermark() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let tick = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap();
        // Watermark exactly on a tick: that tick is not due again
        assert_eq!(
            most_recent_due_tick(&schedule, tick, tick),
            None
        );
    }

    #[test]
    fn child_names_derive_from_tick() {
        let tick = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let name = child_name("nightly", tick);
        assert_eq!(name, format!("nightly-{}", tick.timestamp()));
        // Same tick observed twice produces the same name
        assert_eq!(name, child_name("nightly", tick));
    }

    #[test]
    fn next_tick_is_strictly_future() {
        let schedule = parse_schedule("*/10 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let next = next_tick(&schedule, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 10, 0).unwrap());
    }
}
