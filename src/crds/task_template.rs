//! `TaskTemplate` Custom Resource Definition - partial Task spec

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::task::{AgentRef, ContextItem};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "TaskTemplate")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ref: Option<AgentRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<ContextItem>>,
}
