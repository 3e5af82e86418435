//! Admission gate consulted before a Task moves to Running
//!
//! Enforces, in order: the cross-namespace allow-list, the concurrency cap,
//! and the sliding-window start quota. Queue-drain fairness comes from the
//! ordering key `(creationTimestamp, namespace, name)`: a task yields while
//! older queued siblings could absorb the free capacity.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use glob::Pattern;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::crds::{Agent, AgentQuota, Task, TaskPhase, TaskStartRecord};
use crate::tasks::types::{is_conflict, labels, reasons, Context, Result};

/// Outcome of an admission check
#[derive(Debug)]
pub enum AdmissionDecision {
    /// Run now; the pod lands in `pod_namespace`
    Admit { pod_namespace: String },
    /// Wait in Queued and re-check later
    Queue {
        reason: &'static str,
        message: String,
        retry_after: Duration,
    },
    /// Terminal refusal
    Deny { reason: &'static str, message: String },
}

/// Ordering key for queue-drain fairness; smaller wins capacity first.
#[must_use]
pub fn ordering_key(task: &Task) -> (DateTime<Utc>, String, String) {
    let created = task
        .metadata
        .creation_timestamp
        .as_ref()
        .map_or_else(Utc::now, |t| t.0);
    (
        created,
        task.namespace().unwrap_or_default(),
        task.name_any(),
    )
}

/// True when the namespace matches at least one glob pattern.
#[must_use]
pub fn namespace_allowed(patterns: &[String], namespace: &str) -> bool {
    patterns.iter().any(|raw| match Pattern::new(raw) {
        Ok(pattern) => pattern.matches(namespace),
        Err(e) => {
            warn!(pattern = %raw, "invalid allowed-namespaces glob: {e}");
            false
        }
    })
}

/// Drop start records older than the quota window.
#[must_use]
pub fn prune_start_records(
    records: &[TaskStartRecord],
    now: DateTime<Utc>,
    window_seconds: i64,
) -> Vec<TaskStartRecord> {
    let horizon = now - ChronoDuration::seconds(window_seconds);
    records
        .iter()
        .filter(|record| {
            DateTime::parse_from_rfc3339(&record.start_time)
                .map(|t| t.with_timezone(&Utc) > horizon)
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Earliest instant at which a pruned record falls out of the window,
/// used to requeue a quota-throttled task no earlier than necessary.
#[must_use]
pub fn next_quota_slot(
    records: &[TaskStartRecord],
    now: DateTime<Utc>,
    window_seconds: i64,
) -> Duration {
    records
        .iter()
        .filter_map(|record| DateTime::parse_from_rfc3339(&record.start_time).ok())
        .map(|t| t.with_timezone(&Utc) + ChronoDuration::seconds(window_seconds))
        .filter(|expiry| *expiry > now)
        .min()
        .and_then(|expiry| (expiry - now).to_std().ok())
        .unwrap_or(Duration::from_secs(1))
}

/// Run the full admission check for a task against its agent.
pub async fn admit(ctx: &Context, task: &Task, agent: &Agent) -> Result<AdmissionDecision> {
    let task_namespace = task.namespace().unwrap_or_default();
    let agent_namespace = agent.namespace().unwrap_or_default();
    let agent_name = agent.name_any();

    // Cross-namespace allow-list
    if task_namespace != agent_namespace {
        if let Some(allowed) = &agent.spec.allowed_namespaces {
            if !allowed.is_empty() && !namespace_allowed(allowed, &task_namespace) {
                return Ok(AdmissionDecision::Deny {
                    reason: reasons::AGENT_ERROR,
                    message: format!(
                        "namespace {task_namespace} is not allowed to use agent {agent_namespace}/{agent_name}"
                    ),
                });
            }
        }
    }
    let pod_namespace = agent_namespace.clone();

    // Concurrency cap
    let cap = agent.spec.max_concurrent_tasks.unwrap_or(0);
    if cap > 0 {
        let tasks: Api<Task> = Api::all(ctx.client.clone());
        let selector = format!("{}={agent_name}", labels::AGENT);
        let siblings = tasks.list(&ListParams::default().labels(&selector)).await?;

        let running = siblings
            .items
            .iter()
            .filter(|t| {
                t.status.as_ref().map(|s| s.phase) == Some(TaskPhase::Running)
            })
            .count() as i32;
        if running >= cap {
            return Ok(AdmissionDecision::Queue {
                reason: reasons::AGENT_AT_CAPACITY,
                message: format!("agent {agent_name} is running {running}/{cap} tasks"),
                retry_after: Duration::from_secs(ctx.config.scheduling.queued_requeue_secs),
            });
        }

        // Fairness: free slots go to the oldest queued siblings first.
        let free = cap - running;
        let self_key = ordering_key(task);
        let self_uid = task.metadata.uid.as_deref();
        let queued_ahead = siblings
            .items
            .iter()
            .filter(|t| t.metadata.uid.as_deref() != self_uid)
            .filter(|t| {
                t.status.as_ref().map(|s| s.phase) == Some(TaskPhase::Queued)
            })
            .filter(|t| ordering_key(t) < self_key)
            .count() as i32;
        if queued_ahead >= free {
            return Ok(AdmissionDecision::Queue {
                reason: reasons::AGENT_AT_CAPACITY,
                message: format!(
                    "agent {agent_name} has {queued_ahead} older queued task(s) for {free} free slot(s)"
                ),
                retry_after: Duration::from_secs(ctx.config.scheduling.queued_requeue_secs),
            });
        }
    }

    // Sliding-window quota
    if let Some(quota) = agent.spec.quota {
        if quota.max_starts > 0 {
            if let Some(decision) = record_start(ctx, task, agent, quota).await? {
                return Ok(decision);
            }
        }
    }

    Ok(AdmissionDecision::Admit { pod_namespace })
}

/// Append a start record to the agent status under optimistic concurrency.
///
/// Returns `Some(Queue…)` when the quota denies the start or the write loses
/// the conflict race too many times; `None` means the start was recorded.
async fn record_start(
    ctx: &Context,
    task: &Task,
    agent: &Agent,
    quota: AgentQuota,
) -> Result<Option<AdmissionDecision>> {
    let agent_namespace = agent.namespace().unwrap_or_default();
    let agent_name = agent.name_any();
    let agents: Api<Agent> = Api::namespaced(ctx.client.clone(), &agent_namespace);
    let attempts = ctx.config.scheduling.quota_write_attempts;

    for attempt in 0..attempts {
        let fresh = agents.get(&agent_name).await?;
        let now = Utc::now();
        let existing = fresh
            .status
            .as_ref()
            .and_then(|s| s.task_starts.clone())
            .unwrap_or_default();
        let mut pruned = prune_start_records(&existing, now, quota.window_seconds);

        if pruned.len() as i32 >= quota.max_starts {
            let retry_after = next_quota_slot(&pruned, now, quota.window_seconds);
            return Ok(Some(AdmissionDecision::Queue {
                reason: reasons::QUOTA_EXCEEDED,
                message: format!(
                    "agent {agent_name} started {} task(s) within the last {}s (limit {})",
                    pruned.len(),
                    quota.window_seconds,
                    quota.max_starts
                ),
                retry_after,
            }));
        }

        pruned.push(TaskStartRecord {
            task_name: task.name_any(),
            namespace: task.namespace().unwrap_or_default(),
            start_time: now.to_rfc3339(),
        });

        // The resourceVersion precondition turns this merge into a
        // compare-and-swap; a 409 means a sibling won and we re-read.
        let patch = json!({
            "metadata": {"resourceVersion": fresh.resource_version()},
            "status": {"taskStarts": pruned},
        });
        match agents
            .patch_status(&agent_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(None),
            Err(e) if is_conflict(&e) => {
                debug!(
                    agent = %agent_name,
                    attempt,
                    "agent status conflict while recording task start, retrying"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Contention never resolved within the bounded attempts: drop the
    // admission, stay Queued, retry on the next reconcile.
    Ok(Some(AdmissionDecision::Queue {
        reason: reasons::QUOTA_EXCEEDED,
        message: format!(
            "could not record task start on agent {agent_name} after {attempts} attempts"
        ),
        retry_after: Duration::from_secs(ctx.config.scheduling.queued_requeue_secs),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn record(offset_secs: i64, now: DateTime<Utc>) -> TaskStartRecord {
        TaskStartRecord {
            task_name: "t".to_string(),
            namespace: "default".to_string(),
            start_time: (now - ChronoDuration::seconds(offset_secs)).to_rfc3339(),
        }
    }

    #[test]
    fn namespace_globs() {
        let patterns = vec!["prod-*".to_string(), "staging".to_string()];
        assert!(namespace_allowed(&patterns, "prod-1"));
        assert!(namespace_allowed(&patterns, "staging"));
        assert!(!namespace_allowed(&patterns, "dev"));
        assert!(!namespace_allowed(&[], "anything"));
    }

    #[test]
    fn invalid_glob_never_matches() {
        let patterns = vec!["[".to_string()];
        assert!(!namespace_allowed(&patterns, "prod"));
    }

    #[test]
    fn prune_drops_expired_records() {
        let now = Utc::now();
        let records = vec![record(200, now), record(60, now), record(10, now)];
        let pruned = prune_start_records(&records, now, 120);
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn prune_drops_unparseable_records() {
        let now = Utc::now();
        let records = vec![TaskStartRecord {
            task_name: "t".to_string(),
            namespace: "default".to_string(),
            start_time: "garbage".to_string(),
        }];
        assert!(prune_start_records(&records, now, 120).is_empty());
    }

    #[test]
    fn next_quota_slot_is_earliest_expiry() {
        let now = Utc::now();
        let records = vec![record(100, now), record(30, now)];
        // Oldest record expires in 20s (window 120), newest in 90s
        let slot = next_quota_slot(&records, now, 120);
        assert!(slot >= Duration::from_secs(19) && slot <= Duration::from_secs(21));
    }

    fn task_with(created_offset_secs: i64, namespace: &str, name: &str) -> Task {
        let created = Utc::now() - ChronoDuration::seconds(created_offset_secs);
        Task {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                creation_timestamp: Some(Time(created)),
                ..Default::default()
            },
            spec: Default::default(),
            status: None,
        }
    }

    #[test]
    fn ordering_key_orders_by_creation_then_namespace_then_name() {
        let older = task_with(100, "default", "b");
        let newer = task_with(10, "default", "a");
        assert!(ordering_key(&older) < ordering_key(&newer));

        let left = task_with(100, "a-ns", "z");
        let right = task_with(100, "b-ns", "a");
        // Identical timestamps fall back to namespace
        let (t1, ..) = ordering_key(&left);
        let (t2, ..) = ordering_key(&right);
        if t1 == t2 {
            assert!(ordering_key(&left) < ordering_key(&right));
        }
    }
}
