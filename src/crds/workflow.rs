//! `Workflow` and `WorkflowRun` Custom Resource Definitions
//!
//! A Workflow is a template: an ordered list of stages, each a set of named
//! workflow-tasks that run in parallel. A WorkflowRun executes a Workflow
//! (by reference or inline) stage by stage; stage N+1 is gated on every
//! stage-N task reaching Completed.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::task::TaskSpec;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(group = "kubetask.io", version = "v1", kind = "Workflow")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Stages","type":"integer","jsonPath":".spec.stages.length"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    pub stages: Vec<WorkflowStage>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStage {
    /// Stage name; `stage-<index>` is assigned when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub tasks: Vec<WorkflowTask>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    /// Unique within the workflow; the spawned Task is named
    /// `<runName>-<name>`
    pub name: String,

    pub task: TaskSpec,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "WorkflowRun")]
#[kube(namespaced)]
#[kube(status = "WorkflowRunStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Stage","type":"integer","jsonPath":".status.currentStage"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunSpec {
    /// Workflow template to execute, resolved and embedded on first
    /// reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,

    /// Inline workflow; also the landing field for a resolved `workflowRef`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSpec>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum WorkflowRunPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowRunPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowRunPhase::Completed | WorkflowRunPhase::Failed)
    }
}

impl std::fmt::Display for WorkflowRunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowRunPhase::Pending => write!(f, "Pending"),
            WorkflowRunPhase::Running => write!(f, "Running"),
            WorkflowRunPhase::Completed => write!(f, "Completed"),
            WorkflowRunPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunStatus {
    #[serde(default)]
    pub phase: WorkflowRunPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Index of the stage currently executing; -1 before the first stage
    /// starts
    #[serde(default = "default_current_stage")]
    pub current_stage: i32,

    #[serde(default)]
    pub total_tasks: i32,

    #[serde(default)]
    pub completed_tasks: i32,

    #[serde(default)]
    pub failed_tasks: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageStatus>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

fn default_current_stage() -> i32 {
    -1
}

impl Default for WorkflowRunStatus {
    fn default() -> Self {
        Self {
            phase: WorkflowRunPhase::Pending,
            message: None,
            current_stage: -1,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            stages: None,
            start_time: None,
            completion_time: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    pub name: String,
    pub index: i32,
    /// Pending, Running, Completed or Failed
    pub phase: String,
    pub total: i32,
    pub completed: i32,
    pub failed: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_stage_defaults_to_minus_one() {
        let status: WorkflowRunStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.current_stage, -1);
        assert_eq!(status.phase, WorkflowRunPhase::Pending);
    }
}
