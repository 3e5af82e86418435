//! `CronTask` and `CronWorkflow` Custom Resource Definitions
//!
//! A cron schedule (5-field POSIX, evaluated in UTC) plus an embedded child
//! template. Children are named deterministically from the parent name and
//! the scheduled time so concurrent observers of the same tick collide
//! harmlessly on AlreadyExists.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::task::TaskSpec;
use super::workflow::WorkflowSpec;

pub const DEFAULT_SUCCESSFUL_HISTORY_LIMIT: u32 = 3;
pub const DEFAULT_FAILED_HISTORY_LIMIT: u32 = 1;

/// What to do when a tick fires while previous children are still active
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// Create a new child unconditionally
    Allow,
    /// Skip the tick while any child is active
    #[default]
    Forbid,
    /// Stop active children and create the new one
    Replace,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "CronTask")]
#[kube(namespaced)]
#[kube(status = "CronStatus")]
#[kube(printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#)]
#[kube(printcolumn = r#"{"name":"Suspend","type":"boolean","jsonPath":".spec.suspend"}"#)]
#[kube(printcolumn = r#"{"name":"Last Schedule","type":"date","jsonPath":".status.lastScheduleTime"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CronTaskSpec {
    /// 5-field POSIX cron expression, UTC
    pub schedule: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<ConcurrencyPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<u32>,

    /// Template for spawned Tasks
    pub task: TaskSpec,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "CronWorkflow")]
#[kube(namespaced)]
#[kube(status = "CronStatus")]
#[kube(printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#)]
#[kube(printcolumn = r#"{"name":"Suspend","type":"boolean","jsonPath":".spec.suspend"}"#)]
#[kube(printcolumn = r#"{"name":"Last Schedule","type":"date","jsonPath":".status.lastScheduleTime"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CronWorkflowSpec {
    /// 5-field POSIX cron expression, UTC
    pub schedule: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_policy: Option<ConcurrencyPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<u32>,

    /// Workflow to run on each tick, by reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,

    /// Or inline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    /// Watermark: the most recent tick a child was created for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_time: Option<String>,

    /// Children believed to still be active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<ActiveRef>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRef {
    pub name: String,
    pub namespace: String,
}
