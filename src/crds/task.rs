//! `Task` Custom Resource Definition - one execution attempt of an agent task

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(group = "kubetask.io", version = "v1", kind = "Task")]
#[kube(namespaced)]
#[kube(status = "TaskStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Agent","type":"string","jsonPath":".spec.agentRef.name"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Task prompt written to `task.md` in the agent workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered list of context items mounted into the workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<ContextItem>>,

    /// Agent that executes this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ref: Option<AgentRef>,

    /// Optional template whose fields fill in absent spec fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_template_ref: Option<String>,

    /// Keep the container alive after the command exits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_in_the_loop: Option<HumanInTheLoop>,
}

/// Reference to an Agent, optionally in another namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// One entry in a task's ordered context list.
///
/// Either carries literal content or references a `Context` resource. Items
/// without a mount path are concatenated into `task.md`; items with a mount
/// path are materialized at that path (absolute, or relative to the agent's
/// workspace directory).
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    /// Item name; used for merge precedence and the `task.md` delimiters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Literal content carried inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Reference to a `Context` resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_ref: Option<ContextRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,

    /// Tolerate a missing referenced Context instead of failing the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// Reference to a `Context` resource, optionally in another namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Keep-alive settings for interactive debugging of finished containers
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HumanInTheLoop {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds the container sleeps after the command exits (default 3600)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_seconds: Option<u64>,
}

impl HumanInTheLoop {
    pub const DEFAULT_KEEP_ALIVE_SECONDS: u64 = 3600;

    #[must_use]
    pub fn keep_alive(&self) -> u64 {
        self.keep_alive_seconds
            .unwrap_or(Self::DEFAULT_KEEP_ALIVE_SECONDS)
    }
}

/// Phase of Task execution. Transitions are monotone:
/// Pending -> (Queued | Running), Queued -> Running,
/// Running -> (Completed | Failed).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum TaskPhase {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Pending => write!(f, "Pending"),
            TaskPhase::Queued => write!(f, "Queued"),
            TaskPhase::Running => write!(f, "Running"),
            TaskPhase::Completed => write!(f, "Completed"),
            TaskPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Name of the compute pod, set on Pending/Queued -> Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// Namespace the pod runs in; differs from the task namespace for
    /// cross-namespace agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,

    /// Set exactly once, on entering Running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    /// Set exactly once, on entering Completed or Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<TaskCondition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition on a Task, keyed by `type` (Ready, Queued, Stopped)
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCondition {
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Condition types carried on Task status
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_QUEUED: &str = "Queued";
pub const CONDITION_STOPPED: &str = "Stopped";

/// Replace or insert a condition by type, stamping the transition time only
/// when status/reason actually change.
pub fn upsert_condition(
    conditions: &mut Vec<TaskCondition>,
    condition_type: &str,
    status: &str,
    reason: Option<&str>,
    message: Option<&str>,
    now_rfc3339: &str,
) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        let changed = existing.status != status || existing.reason.as_deref() != reason;
        existing.status = status.to_string();
        existing.reason = reason.map(str::to_string);
        existing.message = message.map(str::to_string);
        if changed {
            existing.last_transition_time = Some(now_rfc3339.to_string());
        }
        return;
    }

    conditions.push(TaskCondition {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(now_rfc3339.to_string()),
        reason: reason.map(str::to_string),
        message: message.map(str::to_string),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_terminality() {
        assert!(!TaskPhase::Pending.is_terminal());
        assert!(!TaskPhase::Queued.is_terminal());
        assert!(!TaskPhase::Running.is_terminal());
        assert!(TaskPhase::Completed.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
    }

    #[test]
    fn upsert_condition_stamps_transition_only_on_change() {
        let mut conditions = Vec::new();
        upsert_condition(
            &mut conditions,
            CONDITION_QUEUED,
            "True",
            Some("AgentAtCapacity"),
            None,
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2026-01-01T00:00:00Z")
        );

        // Same status and reason: transition time is preserved
        upsert_condition(
            &mut conditions,
            CONDITION_QUEUED,
            "True",
            Some("AgentAtCapacity"),
            Some("still waiting"),
            "2026-01-01T00:05:00Z",
        );
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
        assert_eq!(conditions[0].message.as_deref(), Some("still waiting"));

        // Status flip: transition time advances
        upsert_condition(
            &mut conditions,
            CONDITION_QUEUED,
            "False",
            Some("CapacityAvailable"),
            None,
            "2026-01-01T00:10:00Z",
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2026-01-01T00:10:00Z")
        );
    }

    #[test]
    fn keep_alive_defaults_to_one_hour() {
        let hitl = HumanInTheLoop {
            enabled: true,
            keep_alive_seconds: None,
        };
        assert_eq!(hitl.keep_alive(), 3600);

        let hitl = HumanInTheLoop {
            enabled: true,
            keep_alive_seconds: Some(120),
        };
        assert_eq!(hitl.keep_alive(), 120);
    }
}
