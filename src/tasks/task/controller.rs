//! Task reconciler: drives a Task through
//! Pending -> Queued -> Running -> Completed/Failed by materializing a
//! compute pod and mirroring its lifecycle.
//!
//! Reconciliation is level-triggered and idempotent: every entry reads the
//! observed state, computes the target and only writes when they differ.
//! Phase transitions are monotone; `startTime` and `completionTime` are set
//! exactly once.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::crds::task::{
    upsert_condition, TaskCondition, CONDITION_QUEUED, CONDITION_READY, CONDITION_STOPPED,
};
use crate::crds::{Task, TaskPhase, TaskSpec, TaskTemplate};
use crate::tasks::cleanup;
use crate::tasks::events;
use crate::tasks::types::{
    reasons, stop_requested, Context, Error, Result, TASK_FINALIZER_NAME,
};

use super::admission::{admit, AdmissionDecision};
use super::contexts::{merge_contexts, resolve_contexts, ResolvedContext};
use super::resources::{
    build_files_config_map, build_task_pod, pod_name, TaskResourceManager,
};

#[instrument(skip(ctx), fields(task = %task.name_any(), namespace = task.namespace().unwrap_or_default()))]
pub async fn reconcile_task(task: Arc<Task>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = task
        .namespace()
        .ok_or(Error::MissingObjectKey)?;

    // TTL reaping of finished tasks happens before anything else; a task
    // past its deadline is deleted, not reconciled.
    if let Some(action) = cleanup::try_task_cleanup_after_ttl(&task, &ctx).await? {
        return Ok(action);
    }

    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&tasks, TASK_FINALIZER_NAME, task.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(task) => apply(task, &ctx).await,
            FinalizerEvent::Cleanup(task) => cleanup_task_resources(task, &ctx).await,
        }
    })
    .await
    .map_err(|e| match e {
        kube::runtime::finalizer::Error::ApplyFailed(err) => err,
        kube::runtime::finalizer::Error::CleanupFailed(err) => err,
        kube::runtime::finalizer::Error::AddFinalizer(e) => Error::KubeError(e),
        kube::runtime::finalizer::Error::RemoveFinalizer(e) => Error::KubeError(e),
        kube::runtime::finalizer::Error::UnnamedObject => Error::MissingObjectKey,
        kube::runtime::finalizer::Error::InvalidFinalizer => {
            Error::ConfigError("Invalid finalizer name".to_string())
        }
    })
}

async fn apply(task: Arc<Task>, ctx: &Context) -> Result<Action> {
    let phase = task.status.as_ref().map(|s| s.phase).unwrap_or_default();

    if phase.is_terminal() {
        return Ok(Action::await_change());
    }

    if stop_requested(task.meta()) {
        return stop_task(&task, ctx, phase).await;
    }

    match phase {
        TaskPhase::Running => observe_pod(&task, ctx).await,
        TaskPhase::Pending | TaskPhase::Queued => try_start(&task, ctx, phase).await,
        TaskPhase::Completed | TaskPhase::Failed => Ok(Action::await_change()),
    }
}

/// Pending/Queued: resolve template, agent and contexts, consult admission,
/// then create the pod and move to Running.
async fn try_start(task: &Task, ctx: &Context, phase: TaskPhase) -> Result<Action> {
    let namespace = task.namespace().unwrap_or_default();

    // Template resolution (fills absent fields)
    let effective = match resolve_template(task, ctx).await {
        Ok(spec) => spec,
        Err(Error::TemplateError(message)) => {
            hold_with_condition(task, ctx, reasons::TASK_TEMPLATE_ERROR, &message).await?;
            return Ok(Action::requeue(Duration::from_secs(
                ctx.config.scheduling.queued_requeue_secs,
            )));
        }
        Err(e) => return Err(e),
    };

    // Agent resolution: an absent reference is a spec error, a missing
    // agent is transient and may appear later.
    let Some(agent_ref) = effective.agent_ref.clone() else {
        fail_task(task, ctx, reasons::AGENT_ERROR, "task references no agent").await?;
        return Ok(Action::await_change());
    };
    // Capacity accounting keys off the agent label; stamp it before the
    // task can ever count against the agent.
    ensure_agent_label(task, ctx, &agent_ref.name).await?;

    let agent_namespace = agent_ref.namespace.clone().unwrap_or_else(|| namespace.clone());
    let agents: Api<crate::crds::Agent> =
        Api::namespaced(ctx.client.clone(), &agent_namespace);
    let Some(agent) = agents.get_opt(&agent_ref.name).await? else {
        hold_with_condition(
            task,
            ctx,
            reasons::AGENT_ERROR,
            &format!("agent {agent_namespace}/{} not found", agent_ref.name),
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(
            ctx.config.scheduling.queued_requeue_secs,
        )));
    };

    // Effective context list and resolution
    let empty = Vec::new();
    let agent_defaults = agent.spec.contexts.as_deref().unwrap_or(&empty);
    let task_contexts = effective.contexts.as_deref().unwrap_or(&empty);
    let merged = merge_contexts(&[agent_defaults, task_contexts]);
    let resolved = match resolve_contexts(&ctx.client, &namespace, &merged).await {
        Ok(resolved) => resolved,
        Err(Error::ContextError(message)) => {
            hold_with_condition(task, ctx, reasons::CONTEXT_ERROR, &message).await?;
            return Ok(Action::requeue(Duration::from_secs(
                ctx.config.scheduling.queued_requeue_secs,
            )));
        }
        Err(e) => return Err(e),
    };

    // Admission
    match admit(ctx, task, &agent).await? {
        AdmissionDecision::Deny { reason, message } => {
            fail_task(task, ctx, reason, &message).await?;
            events::publish_warning(ctx, &task.object_ref(&()), "Failed", message).await;
            Ok(Action::await_change())
        }
        AdmissionDecision::Queue {
            reason,
            message,
            retry_after,
        } => {
            if phase != TaskPhase::Queued
                || condition_reason(task, CONDITION_QUEUED) != Some(reason.to_string())
            {
                queue_task(task, ctx, reason, &message).await?;
                let event_reason = if reason == reasons::QUOTA_EXCEEDED {
                    "QuotaExceeded"
                } else {
                    "Queued"
                };
                events::publish(ctx, &task.object_ref(&()), event_reason, message).await;
            }
            Ok(Action::requeue(retry_after))
        }
        AdmissionDecision::Admit { pod_namespace } => {
            start_task(task, ctx, &effective, &agent, &resolved, &pod_namespace, phase).await
        }
    }
}

/// Admission passed: materialize the ConfigMap and the pod, then flip the
/// task to Running.
#[allow(clippy::too_many_arguments)]
async fn start_task(
    task: &Task,
    ctx: &Context,
    effective: &TaskSpec,
    agent: &crate::crds::Agent,
    resolved: &[ResolvedContext],
    pod_namespace: &str,
    previous_phase: TaskPhase,
) -> Result<Action> {
    let namespace = task.namespace().unwrap_or_default();
    let manager = TaskResourceManager::new(&ctx.client);

    // Owner references only work within a namespace; cross-namespace pods
    // are cleaned up by the task finalizer instead.
    let owner = if pod_namespace == namespace {
        task.controller_owner_ref(&())
    } else {
        None
    };

    // Build with the effective (template-merged) spec so the description
    // that lands in task.md is the resolved one.
    let mut build_task = task.clone();
    build_task.spec = effective.clone();

    let config_map = build_files_config_map(&build_task, pod_namespace, resolved);
    if let Err(e) = manager
        .ensure_files_config_map(pod_namespace, config_map, owner.clone())
        .await
    {
        warn!("configmap creation failed: {e}");
        hold_with_condition(
            task,
            ctx,
            reasons::CONFIG_MAP_CREATION_ERROR,
            &format!("creating workspace configmap: {e}"),
        )
        .await?;
        return Err(e);
    }

    let pod = build_task_pod(&build_task, agent, resolved, pod_namespace, &ctx.config)?;
    let pod = match manager.create_or_get_pod(pod_namespace, pod, owner).await {
        Ok(pod) => pod,
        Err(Error::KubeError(kube::Error::Api(ae))) if ae.code == 422 => {
            // The server rejected the spec outright; retrying cannot help.
            fail_task(
                task,
                ctx,
                reasons::POD_CREATION_ERROR,
                &format!("pod spec rejected: {}", ae.message),
            )
            .await?;
            return Ok(Action::await_change());
        }
        Err(e) => {
            hold_with_condition(
                task,
                ctx,
                reasons::POD_CREATION_ERROR,
                &format!("creating pod: {e}"),
            )
            .await?;
            return Err(e);
        }
    };

    let now = Utc::now().to_rfc3339();
    let mut conditions = current_conditions(task);
    upsert_condition(&mut conditions, CONDITION_READY, "True", None, None, &now);
    if previous_phase == TaskPhase::Queued {
        upsert_condition(
            &mut conditions,
            CONDITION_QUEUED,
            "False",
            Some(reasons::CAPACITY_AVAILABLE),
            None,
            &now,
        );
    } else if agent.spec.max_concurrent_tasks.unwrap_or(0) == 0 && agent.spec.quota.is_none() {
        upsert_condition(
            &mut conditions,
            CONDITION_QUEUED,
            "False",
            Some(reasons::NO_LIMITS),
            None,
            &now,
        );
    }

    let mut status = json!({
        "phase": TaskPhase::Running,
        "message": "pod is running",
        "podName": pod.name_any(),
        "podNamespace": pod_namespace,
        "conditions": conditions,
        "observedGeneration": task.metadata.generation,
    });
    // startTime is set exactly once
    if task
        .status
        .as_ref()
        .and_then(|s| s.start_time.as_ref())
        .is_none()
    {
        status["startTime"] = json!(now);
    }
    patch_status(task, ctx, status).await?;

    let reference = task.object_ref(&());
    if previous_phase == TaskPhase::Queued {
        events::publish(ctx, &reference, "CapacityAvailable", "promoted from queue".to_string())
            .await;
    }
    events::publish(ctx, &reference, "Scheduled", format!("admitted by agent {}", agent.name_any()))
        .await;
    events::publish(
        ctx,
        &reference,
        "PodCreated",
        format!("created pod {pod_namespace}/{}", pod.name_any()),
    )
    .await;

    Ok(Action::requeue(Duration::from_secs(
        ctx.config.scheduling.running_requeue_secs,
    )))
}

/// Running: mirror the observed pod state into the task status.
async fn observe_pod(task: &Task, ctx: &Context) -> Result<Action> {
    let namespace = task.namespace().unwrap_or_default();
    let status = task.status.as_ref().ok_or(Error::MissingObjectKey)?;
    let pod_namespace = status
        .pod_namespace
        .clone()
        .unwrap_or_else(|| namespace.clone());
    let name = status
        .pod_name
        .clone()
        .unwrap_or_else(|| pod_name(&task.name_any()));

    let manager = TaskResourceManager::new(&ctx.client);
    let Some(pod) = manager.get_pod(&pod_namespace, &name).await? else {
        complete_task(
            task,
            ctx,
            TaskPhase::Failed,
            reasons::POD_CREATION_ERROR,
            &format!("pod {pod_namespace}/{name} disappeared"),
        )
        .await?;
        return Ok(Action::await_change());
    };

    let pod_phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Pending".to_string());
    match pod_phase.as_str() {
        "Succeeded" => {
            complete_task(task, ctx, TaskPhase::Completed, "Completed", "pod succeeded")
                .await?;
            Ok(Action::await_change())
        }
        "Failed" => {
            let detail = pod
                .status
                .as_ref()
                .and_then(|s| s.message.clone())
                .unwrap_or_else(|| "pod failed".to_string());
            complete_task(task, ctx, TaskPhase::Failed, reasons::POD_CREATION_ERROR, &detail)
                .await?;
            Ok(Action::await_change())
        }
        _ => {
            if unschedulable_beyond_grace(&pod, ctx.config.scheduling.unschedulable_grace_secs) {
                complete_task(
                    task,
                    ctx,
                    TaskPhase::Failed,
                    reasons::POD_CREATION_ERROR,
                    "pod unschedulable beyond grace period",
                )
                .await?;
                return Ok(Action::await_change());
            }
            debug!("pod {pod_namespace}/{name} still {pod_phase}");
            Ok(Action::requeue(Duration::from_secs(
                ctx.config.scheduling.running_requeue_secs,
            )))
        }
    }
}

/// The stop annotation was observed: delete the pod (if any) and settle the
/// task as Completed with the Stopped condition.
async fn stop_task(task: &Task, ctx: &Context, phase: TaskPhase) -> Result<Action> {
    let namespace = task.namespace().unwrap_or_default();
    if phase == TaskPhase::Running {
        if let Some(status) = &task.status {
            let pod_namespace = status
                .pod_namespace
                .clone()
                .unwrap_or_else(|| namespace.clone());
            let name = status
                .pod_name
                .clone()
                .unwrap_or_else(|| pod_name(&task.name_any()));
            TaskResourceManager::new(&ctx.client)
                .delete_pod(&pod_namespace, &name)
                .await?;
        }
    }

    let now = Utc::now().to_rfc3339();
    let mut conditions = current_conditions(task);
    upsert_condition(
        &mut conditions,
        CONDITION_STOPPED,
        "True",
        Some(reasons::USER_STOPPED),
        Some("stop annotation observed"),
        &now,
    );
    let mut status = json!({
        "phase": TaskPhase::Completed,
        "message": "stopped by user",
        "conditions": conditions,
        "observedGeneration": task.metadata.generation,
    });
    if task
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .is_none()
    {
        status["completionTime"] = json!(now);
    }
    patch_status(task, ctx, status).await?;
    events::publish(ctx, &task.object_ref(&()), "Stopped", "stopped by user".to_string()).await;
    info!("task stopped by user");
    Ok(Action::await_change())
}

/// Finalizer cleanup: delete the pod and workspace configmap, wherever they
/// live. The finalizer helper removes the finalizer afterwards, making that
/// removal the last store write for the terminating task.
async fn cleanup_task_resources(task: Arc<Task>, ctx: &Context) -> Result<Action> {
    let namespace = task.namespace().unwrap_or_default();
    let pod_namespace = task
        .status
        .as_ref()
        .and_then(|s| s.pod_namespace.clone())
        .unwrap_or_else(|| namespace.clone());
    let name = task
        .status
        .as_ref()
        .and_then(|s| s.pod_name.clone())
        .unwrap_or_else(|| pod_name(&task.name_any()));

    let manager = TaskResourceManager::new(&ctx.client);
    manager.delete_pod(&pod_namespace, &name).await?;
    manager
        .delete_files_config_map(&pod_namespace, &task.name_any())
        .await?;
    Ok(Action::await_change())
}

/// Stamp the agent label used for cluster-wide capacity accounting.
async fn ensure_agent_label(task: &Task, ctx: &Context, agent_name: &str) -> Result<()> {
    let existing = task
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(crate::tasks::types::labels::AGENT));
    if existing.map(String::as_str) == Some(agent_name) {
        return Ok(());
    }
    let namespace = task.namespace().unwrap_or_default();
    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = json!({
        "metadata": {"labels": {crate::tasks::types::labels::AGENT: agent_name}}
    });
    tasks
        .patch(&task.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

// Status helpers

fn current_conditions(task: &Task) -> Vec<TaskCondition> {
    task.status
        .as_ref()
        .and_then(|s| s.conditions.clone())
        .unwrap_or_default()
}

fn condition_reason(task: &Task, condition_type: &str) -> Option<String> {
    task.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.condition_type == condition_type && c.status == "True")
        })
        .and_then(|c| c.reason.clone())
}

async fn patch_status(task: &Task, ctx: &Context, status: serde_json::Value) -> Result<()> {
    let namespace = task.namespace().unwrap_or_default();
    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), &namespace);
    tasks
        .patch_status(
            &task.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&json!({"status": status})),
        )
        .await?;
    Ok(())
}

/// Keep the current phase, record a False Ready condition with the reason.
async fn hold_with_condition(
    task: &Task,
    ctx: &Context,
    reason: &str,
    message: &str,
) -> Result<()> {
    let already = condition_matches(task, CONDITION_READY, "False", reason, message);
    if already {
        return Ok(());
    }
    let now = Utc::now().to_rfc3339();
    let mut conditions = current_conditions(task);
    upsert_condition(&mut conditions, CONDITION_READY, "False", Some(reason), Some(message), &now);
    let phase = task.status.as_ref().map(|s| s.phase).unwrap_or_default();
    patch_status(
        task,
        ctx,
        json!({
            "phase": phase,
            "message": message,
            "conditions": conditions,
            "observedGeneration": task.metadata.generation,
        }),
    )
    .await
}

fn condition_matches(
    task: &Task,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> bool {
    task.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.condition_type == condition_type)
        })
        .is_some_and(|c| {
            c.status == status
                && c.reason.as_deref() == Some(reason)
                && c.message.as_deref() == Some(message)
        })
}

/// Move to Queued with the Queued condition set.
async fn queue_task(task: &Task, ctx: &Context, reason: &str, message: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut conditions = current_conditions(task);
    upsert_condition(&mut conditions, CONDITION_QUEUED, "True", Some(reason), Some(message), &now);
    patch_status(
        task,
        ctx,
        json!({
            "phase": TaskPhase::Queued,
            "message": message,
            "conditions": conditions,
            "observedGeneration": task.metadata.generation,
        }),
    )
    .await
}

/// Terminal failure before a pod ever ran.
async fn fail_task(task: &Task, ctx: &Context, reason: &str, message: &str) -> Result<()> {
    complete_task(task, ctx, TaskPhase::Failed, reason, message).await
}

/// Enter a terminal phase, setting completionTime exactly once.
async fn complete_task(
    task: &Task,
    ctx: &Context,
    phase: TaskPhase,
    reason: &str,
    message: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut conditions = current_conditions(task);
    match phase {
        TaskPhase::Completed => {
            upsert_condition(&mut conditions, CONDITION_READY, "True", None, None, &now);
        }
        TaskPhase::Failed => {
            upsert_condition(
                &mut conditions,
                CONDITION_READY,
                "False",
                Some(reason),
                Some(message),
                &now,
            );
        }
        _ => {}
    }

    let mut status = json!({
        "phase": phase,
        "message": message,
        "conditions": conditions,
        "observedGeneration": task.metadata.generation,
    });
    if task
        .status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .is_none()
    {
        status["completionTime"] = json!(now);
    }
    patch_status(task, ctx, status).await?;

    let reference = task.object_ref(&());
    match phase {
        TaskPhase::Completed => {
            events::publish(ctx, &reference, "Completed", message.to_string()).await;
        }
        TaskPhase::Failed => {
            events::publish_warning(ctx, &reference, "Failed", message.to_string()).await;
        }
        _ => {}
    }
    Ok(())
}

/// Fill absent task fields from the referenced template.
async fn resolve_template(task: &Task, ctx: &Context) -> Result<TaskSpec> {
    let Some(template_name) = &task.spec.task_template_ref else {
        return Ok(task.spec.clone());
    };
    let namespace = task.namespace().unwrap_or_default();
    let templates: Api<TaskTemplate> = Api::namespaced(ctx.client.clone(), &namespace);
    let Some(template) = templates.get_opt(template_name).await? else {
        return Err(Error::TemplateError(format!(
            "task template {namespace}/{template_name} not found"
        )));
    };
    Ok(merge_template(&task.spec, &template.spec))
}

/// Pure merge: template fields fill in only where the task is silent;
/// template contexts form an earlier merge layer than the task's own.
#[must_use]
pub fn merge_template(
    spec: &TaskSpec,
    template: &crate::crds::TaskTemplateSpec,
) -> TaskSpec {
    let empty = Vec::new();
    let template_contexts = template.contexts.as_deref().unwrap_or(&empty);
    let task_contexts = spec.contexts.as_deref().unwrap_or(&empty);
    let merged_contexts = merge_contexts(&[template_contexts, task_contexts]);

    TaskSpec {
        description: spec
            .description
            .clone()
            .or_else(|| template.description.clone()),
        contexts: if merged_contexts.is_empty() {
            None
        } else {
            Some(merged_contexts)
        },
        agent_ref: spec
            .agent_ref
            .clone()
            .or_else(|| template.agent_ref.clone()),
        task_template_ref: spec.task_template_ref.clone(),
        human_in_the_loop: spec.human_in_the_loop.clone(),
    }
}

fn unschedulable_beyond_grace(pod: &Pod, grace_secs: u64) -> bool {
    let unschedulable = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "PodScheduled"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("Unschedulable")
            })
        });
    if !unschedulable {
        return false;
    }
    let created: Option<DateTime<Utc>> =
        pod.metadata.creation_timestamp.as_ref().map(|t| t.0);
    match created {
        Some(created) => (Utc::now() - created).num_seconds() as u64 >= grace_secs,
        None => false,
    }
}

/// Error policy: transient failures requeue with backoff; the controller
/// runtime adds jitter on top.
pub fn error_policy(task: Arc<Task>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        task = %task.name_any(),
        error = ?error,
        "task reconciliation failed, requeueing with backoff"
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{AgentRef, ContextItem, TaskTemplateSpec};

    fn item(name: &str, content: &str) -> ContextItem {
        ContextItem {
            name: Some(name.to_string()),
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn template_fills_only_absent_fields() {
        let spec = TaskSpec {
            description: Some("task description".to_string()),
            agent_ref: None,
            ..Default::default()
        };
        let template = TaskTemplateSpec {
            description: Some("template description".to_string()),
            agent_ref: Some(AgentRef {
                name: "claude".to_string(),
                namespace: None,
            }),
            contexts: None,
        };
        let merged = merge_template(&spec, &template);
        assert_eq!(merged.description.as_deref(), Some("task description"));
        assert_eq!(merged.agent_ref.as_ref().unwrap().name, "claude");
    }

    #[test]
    fn template_contexts_are_an_earlier_layer() {
        let spec = TaskSpec {
            contexts: Some(vec![item("standards", "from-task")]),
            ..Default::default()
        };
        let template = TaskTemplateSpec {
            contexts: Some(vec![item("standards", "from-template"), item("docs", "t")]),
            ..Default::default()
        };
        let merged = merge_template(&spec, &template);
        let contexts = merged.contexts.unwrap();
        assert_eq!(contexts.len(), 2);
        // Task layer wins on name collision
        assert_eq!(contexts[0].content.as_deref(), Some("from-task"));
        assert_eq!(contexts[1].name.as_deref(), Some("docs"));
    }

    #[test]
    fn unschedulable_detection_requires_condition_and_age() {
        use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

        let old = Utc::now() - chrono::Duration::seconds(600);
        let pod = Pod {
            metadata: ObjectMeta {
                creation_timestamp: Some(Time(old)),
                ..Default::default()
            },
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "PodScheduled".to_string(),
                    status: "False".to_string(),
                    reason: Some("Unschedulable".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(unschedulable_beyond_grace(&pod, 300));
        assert!(!unschedulable_beyond_grace(&pod, 3600));

        let scheduled = Pod {
            metadata: pod.metadata.clone(),
            status: Some(PodStatus::default()),
            ..Default::default()
        };
        assert!(!unschedulable_beyond_grace(&scheduled, 0));
    }
}
