//! `KubeTaskConfig` Custom Resource Definition - cluster-level knobs
//!
//! Cluster-scoped singleton (well-known name `default`). Consulted by the
//! TTL reaper; absence means built-in defaults apply.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONFIG_NAME: &str = "default";
pub const DEFAULT_TTL_SECONDS_AFTER_FINISHED: u64 = 604_800;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "KubeTaskConfig")]
#[kube(printcolumn = r#"{"name":"TTL","type":"integer","jsonPath":".spec.ttlSecondsAfterFinished"}"#)]
#[serde(rename_all = "camelCase")]
pub struct KubeTaskConfigSpec {
    /// Seconds a finished Task is retained before deletion
    /// (default 604800, 0 disables TTL deletion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u64>,

    /// Per-namespace cap on retained finished Tasks; older ones are deleted
    /// by completion time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_finished_tasks: Option<u32>,
}

impl KubeTaskConfigSpec {
    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds_after_finished
            .unwrap_or(DEFAULT_TTL_SECONDS_AFTER_FINISHED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_defaults_to_seven_days() {
        assert_eq!(KubeTaskConfigSpec::default().ttl_seconds(), 604_800);
        let spec = KubeTaskConfigSpec {
            ttl_seconds_after_finished: Some(0),
            max_finished_tasks: None,
        };
        assert_eq!(spec.ttl_seconds(), 0);
    }
}
