//! Operator configuration
//!
//! Loaded from a mounted YAML file at startup; every field has a default so
//! the operator can boot with no file at all.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperatorConfig {
    /// Webhook ingress settings
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Git init-container settings
    #[serde(default)]
    pub git: GitConfig,

    /// TTL reaper settings
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Task scheduling knobs
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            webhook: WebhookConfig::default(),
            git: GitConfig::default(),
            cleanup: CleanupConfig::default(),
            scheduling: SchedulingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Bind address for the ingress server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Request body cap in bytes; larger requests get 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Per-request deadline in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    /// Image used by git clone init containers
    #[serde(default = "default_git_image")]
    pub image: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            image: default_git_image(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fallback TTL when no KubeTaskConfig exists (seconds)
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,

    /// Interval of the retention sweep (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: default_ttl_seconds(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConfig {
    /// Requeue interval while a task sits in Queued (seconds)
    #[serde(default = "default_queued_requeue_secs")]
    pub queued_requeue_secs: u64,

    /// Requeue interval while a pod is running (seconds)
    #[serde(default = "default_running_requeue_secs")]
    pub running_requeue_secs: u64,

    /// Grace before an unschedulable pod fails the task (seconds)
    #[serde(default = "default_unschedulable_grace_secs")]
    pub unschedulable_grace_secs: u64,

    /// Bounded attempts for the agent-status quota write
    #[serde(default = "default_quota_write_attempts")]
    pub quota_write_attempts: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            queued_requeue_secs: default_queued_requeue_secs(),
            running_requeue_secs: default_running_requeue_secs(),
            unschedulable_grace_secs: default_unschedulable_grace_secs(),
            quota_write_attempts: default_quota_write_attempts(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_git_image() -> String {
    "alpine/git:2.45.2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    604_800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_queued_requeue_secs() -> u64 {
    15
}

fn default_running_requeue_secs() -> u64 {
    30
}

fn default_unschedulable_grace_secs() -> u64 {
    300
}

fn default_quota_write_attempts() -> u32 {
    8
}

impl OperatorConfig {
    /// Load from a mounted file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn from_mounted_file(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_yaml::from_str::<OperatorConfig>(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Failed to parse config at {path}: {e}; using defaults");
                    OperatorConfig::default()
                }
            },
            Err(e) => {
                warn!("No config file at {path}: {e}; using defaults");
                OperatorConfig::default()
            }
        }
    }

    /// Reject configurations that cannot work at all.
    pub fn validate(&self) -> Result<(), String> {
        if self.webhook.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "webhook.bindAddr {:?} is not a socket address",
                self.webhook.bind_addr
            ));
        }
        if self.webhook.max_body_bytes == 0 {
            return Err("webhook.maxBodyBytes must be positive".to_string());
        }
        if self.git.image.trim().is_empty() {
            return Err("git.image must not be empty".to_string());
        }
        if self.scheduling.quota_write_attempts == 0 {
            return Err("scheduling.quotaWriteAttempts must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = OperatorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cleanup.default_ttl_seconds, 604_800);
        assert_eq!(cfg.webhook.request_timeout_secs, 10);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: OperatorConfig =
            serde_yaml::from_str("webhook:\n  bindAddr: \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(cfg.webhook.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.webhook.max_body_bytes, 1024 * 1024);
        assert!(cfg.cleanup.enabled);
    }

    #[test]
    fn bad_bind_addr_is_rejected() {
        let mut cfg = OperatorConfig::default();
        cfg.webhook.bind_addr = "not-an-addr".to_string();
        assert!(cfg.validate().is_err());
    }
}
