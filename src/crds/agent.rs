//! `Agent` Custom Resource Definition - execution policy and image

use super::task::{ContextItem, HumanInTheLoop};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_WORKSPACE_DIR: &str = "/workspace";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "Agent")]
#[kube(namespaced)]
#[kube(status = "AgentStatus")]
#[kube(printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Container image executing tasks
    pub image: String,

    /// Workspace mount point inside the container (default `/workspace`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<String>,

    /// Entrypoint for the agent container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Contexts prepended to every task's context list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<ContextItem>>,

    /// Secrets injected into the agent container as env vars or files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Vec<Credential>>,

    /// Extra labels stamped on spawned pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<PodToleration>>,

    /// Raw pod affinity, passed through to the pod spec unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ComputeResources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Cap on concurrently Running tasks; 0 or absent means unlimited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<i32>,

    /// Sliding-window start quota
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<AgentQuota>,

    /// Glob patterns of namespaces allowed to reference this agent from
    /// another namespace. Empty or absent means same-namespace only is
    /// unrestricted and cross-namespace is denied nothing (all allowed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<Vec<String>>,

    /// Default human-in-the-loop settings for tasks that do not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_in_the_loop: Option<HumanInTheLoop>,
}

impl AgentSpec {
    #[must_use]
    pub fn workspace_dir(&self) -> &str {
        self.workspace_dir.as_deref().unwrap_or(DEFAULT_WORKSPACE_DIR)
    }
}

/// One secret binding for the agent container.
///
/// `env` injects the selected key as an environment variable; `mountPath`
/// materializes it as a file (single key) or a directory (whole secret,
/// when `key` is absent).
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub name: String,

    pub secret_ref: SecretKeyRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Toleration carried onto spawned pods
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodToleration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, String>>,
}

/// At most `maxStarts` task starts within any `windowSeconds` window
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentQuota {
    pub max_starts: i32,
    pub window_seconds: i64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Recent task starts, pruned to the quota window on every reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_starts: Option<Vec<TaskStartRecord>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStartRecord {
    pub task_name: String,
    pub namespace: String,
    /// RFC 3339 start timestamp
    pub start_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_dir_default() {
        let spec = AgentSpec {
            image: "ghcr.io/kubetask/agent:latest".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.workspace_dir(), "/workspace");

        let spec = AgentSpec {
            image: "ghcr.io/kubetask/agent:latest".to_string(),
            workspace_dir: Some("/srv/agent".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.workspace_dir(), "/srv/agent");
    }

    #[test]
    fn credential_roundtrip_uses_camel_case() {
        let cred = Credential {
            name: "github".to_string(),
            secret_ref: SecretKeyRef {
                name: "github-token".to_string(),
                key: Some("token".to_string()),
            },
            env: Some("GITHUB_TOKEN".to_string()),
            mount_path: None,
        };
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["secretRef"]["name"], "github-token");
        assert_eq!(json["env"], "GITHUB_TOKEN");
    }
}
