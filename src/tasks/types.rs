use super::config::OperatorConfig;
use kube::runtime::events::{Recorder, Reporter};
use kube::Client;
use std::sync::Arc;

// Error type shared by every controller
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Missing object key")]
    MissingObjectKey,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Operator configuration error: {0}")]
    ConfigError(String),

    #[error("Task template error: {0}")]
    TemplateError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Filter error: {0}")]
    FilterError(String),

    #[error("Cron expression error: {0}")]
    CronError(String),

    #[error("Render error: {0}")]
    RenderError(#[from] handlebars::RenderError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// Context shared across controller operations
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: Arc<OperatorConfig>,
    pub recorder: Recorder,
}

impl Context {
    pub fn new(client: Client, config: Arc<OperatorConfig>) -> Self {
        let reporter = Reporter {
            controller: "kubetask-controller".into(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            config,
            recorder,
        }
    }
}

// Finalizer names for cleanup
pub(crate) const TASK_FINALIZER_NAME: &str = "tasks.kubetask.io/finalizer";
pub(crate) const WORKFLOW_RUN_FINALIZER_NAME: &str = "workflowruns.kubetask.io/finalizer";

/// Label and annotation vocabulary. These strings are an external contract;
/// dashboards and consumers key off them byte-for-byte.
pub mod labels {
    pub const TASK: &str = "kubetask.io/task";
    pub const AGENT: &str = "kubetask.io/agent";
    pub const WORKFLOW_RUN: &str = "kubetask.io/workflow-run";
    pub const WORKFLOW: &str = "kubetask.io/workflow";
    pub const STAGE: &str = "kubetask.io/stage";
    pub const STAGE_INDEX: &str = "kubetask.io/stage-index";
    pub const CRON_TASK: &str = "kubetask.io/crontask";
    pub const CRON_WORKFLOW: &str = "kubetask.io/cronworkflow";
    pub const WEBHOOK_TRIGGER: &str = "kubetask.io/webhook-trigger";
    pub const WEBHOOK_RULE: &str = "kubetask.io/webhook-rule";
}

pub mod annotations {
    /// `"true"` cancels a running Task or WorkflowRun
    pub const STOP: &str = "kubetask.io/stop";
    /// Comma list of Task names the annotated Task logically follows
    /// (informational; ordering is enforced by the WorkflowRun reconciler)
    pub const DEPENDS_ON: &str = "kubetask.io/depends-on";
    /// `"true"` exempts a finished Task from TTL deletion
    pub const PRESERVE: &str = "kubetask.io/preserve";
    /// Per-resource TTL override in seconds
    pub const TTL_SECONDS: &str = "kubetask.io/ttl-seconds";
}

/// Condition reasons surfaced on status. Contractual strings.
pub mod reasons {
    pub const TASK_TEMPLATE_ERROR: &str = "TaskTemplateError";
    pub const AGENT_ERROR: &str = "AgentError";
    pub const AGENT_AT_CAPACITY: &str = "AgentAtCapacity";
    pub const QUOTA_EXCEEDED: &str = "QuotaExceeded";
    pub const CONTEXT_ERROR: &str = "ContextError";
    pub const POD_CREATION_ERROR: &str = "PodCreationError";
    pub const CONFIG_MAP_CREATION_ERROR: &str = "ConfigMapCreationError";
    pub const USER_STOPPED: &str = "UserStopped";
    pub const NO_LIMITS: &str = "NoLimits";
    pub const CAPACITY_AVAILABLE: &str = "CapacityAvailable";
}

/// True when the kube error is an API conflict (optimistic concurrency loss)
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// True when the kube error is a 404
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when the object carries the stop annotation
#[must_use]
pub fn stop_requested(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(annotations::STOP))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn stop_annotation_detection() {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::STOP.to_string(), "true".to_string());
        let meta = ObjectMeta {
            annotations: Some(annotations),
            ..Default::default()
        };
        assert!(stop_requested(&meta));

        let meta = ObjectMeta::default();
        assert!(!stop_requested(&meta));

        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::STOP.to_string(), "false".to_string());
        let meta = ObjectMeta {
            annotations: Some(annotations),
            ..Default::default()
        };
        assert!(!stop_requested(&meta));
    }
}
