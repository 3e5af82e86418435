//! `WebhookTrigger` Custom Resource Definition - declarative HTTP endpoint
//!
//! A trigger is mounted at `POST /webhooks/<namespace>/<name>`. Requests are
//! authenticated, filtered, rendered through the rule templates and turned
//! into Task or WorkflowRun creations.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::SecretKeyRef;
use super::task::TaskSpec;
use super::workflow::WorkflowSpec;

pub const DEFAULT_HMAC_ALGORITHM: HmacAlgorithm = HmacAlgorithm::Sha256;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "WebhookTrigger")]
#[kube(namespaced)]
#[kube(status = "WebhookTriggerStatus")]
#[kube(printcolumn = r#"{"name":"Triggered","type":"integer","jsonPath":".status.totalTriggered"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerSpec {
    pub auth: WebhookAuth,

    /// First: stop at the first matching rule; All: evaluate every rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_policy: Option<MatchPolicy>,

    /// Ordered rules; mutually exclusive with the legacy single template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<WebhookRule>>,

    /// Legacy single task template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSpec>,

    /// Filter for the legacy template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Concurrency for the legacy template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<TriggerConcurrency>,
}

/// Exactly one authentication mode must be configured
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<HmacAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<TokenAuth>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_match: Option<HeaderMatchAuth>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HmacAuth {
    /// Header carrying the signature, e.g. `X-Hub-Signature-256`
    pub header: String,

    /// sha1 | sha256 | sha512 (default sha256)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<HmacAlgorithm>,

    #[serde(flatten)]
    pub secret: SecretValue,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HmacAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HmacAlgorithm::Sha1 => write!(f, "sha1"),
            HmacAlgorithm::Sha256 => write!(f, "sha256"),
            HmacAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuth {
    #[serde(flatten)]
    pub secret: SecretValue,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatchAuth {
    /// Header name compared against the secret value
    pub name: String,

    #[serde(flatten)]
    pub secret: SecretValue,
}

/// A secret carried inline or referenced from a Secret key
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum MatchPolicy {
    #[default]
    First,
    All,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRule {
    pub name: String,

    /// Filter expression over `body` and `headers`; absent matches all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<TriggerConcurrency>,

    /// Task template to instantiate on match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskSpec>,

    /// Inline workflow to instantiate on match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowSpec>,

    /// Named workflow to instantiate on match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConcurrency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<super::cron::ConcurrencyPolicy>,

    /// Active resources allowed before the policy applies (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTriggerStatus {
    #[serde(default)]
    pub total_triggered: u64,

    /// Per-rule creation counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_triggered: Option<BTreeMap<String, u64>>,

    /// Resources created by this trigger that may still be active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_resources: Option<Vec<ActiveResource>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveResource {
    /// Rule that created it; absent for the legacy template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// "Task" or "WorkflowRun"
    pub kind: String,

    pub name: String,
    pub namespace: String,
}

impl WebhookAuth {
    /// Exactly one mode must be set; used by the ingress before serving
    pub fn validate(&self) -> Result<(), String> {
        let modes = [
            self.hmac.is_some(),
            self.bearer.is_some(),
            self.header_match.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        match modes {
            0 => Err("trigger auth declares no mode".to_string()),
            1 => Ok(()),
            n => Err(format!("trigger auth declares {n} modes, exactly one is allowed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_requires_exactly_one_mode() {
        assert!(WebhookAuth::default().validate().is_err());

        let bearer = WebhookAuth {
            bearer: Some(TokenAuth {
                secret: SecretValue {
                    value: Some("t0ken".to_string()),
                    secret_ref: None,
                },
            }),
            ..Default::default()
        };
        assert!(bearer.validate().is_ok());

        let both = WebhookAuth {
            bearer: bearer.bearer.clone(),
            header_match: Some(HeaderMatchAuth {
                name: "x-api-key".to_string(),
                secret: SecretValue::default(),
            }),
            ..Default::default()
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn hmac_algorithm_default_is_sha256() {
        assert_eq!(HmacAlgorithm::default(), HmacAlgorithm::Sha256);
        assert_eq!(HmacAlgorithm::Sha512.to_string(), "sha512");
    }
}
