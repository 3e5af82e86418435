//! `Context` Custom Resource Definition - reusable content source
//!
//! A Context is polymorphic over inline content, a ConfigMap reference, or a
//! git repository. Exactly one source must be set; mixtures are rejected at
//! resolution time. The mount path is supplied by the consumer, never by the
//! Context itself.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::agent::SecretKeyRef;

pub const DEFAULT_GIT_REF: &str = "HEAD";
pub const DEFAULT_GIT_DEPTH: u32 = 1;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "kubetask.io", version = "v1", kind = "Context")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ContextSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineSource {
    pub content: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapSource {
    pub name: String,

    /// Tolerate a missing ConfigMap instead of failing resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub repository: String,

    /// Ref to check out (default `HEAD`)
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    /// Clone depth (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,

    /// Token secret for authenticated clones; anonymous when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

impl GitSource {
    #[must_use]
    pub fn git_ref(&self) -> &str {
        self.git_ref.as_deref().unwrap_or(DEFAULT_GIT_REF)
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth.unwrap_or(DEFAULT_GIT_DEPTH)
    }
}

/// Discriminated view over the three source variants
#[derive(Debug, Clone, PartialEq)]
pub enum ContextSource<'a> {
    Inline(&'a InlineSource),
    ConfigMap(&'a ConfigMapSource),
    Git(&'a GitSource),
}

impl<'a> ContextSource<'a> {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ContextSource::Inline(_) => "inline",
            ContextSource::ConfigMap(_) => "configMap",
            ContextSource::Git(_) => "git",
        }
    }
}

impl ContextSpec {
    /// Extract the single declared source.
    ///
    /// Returns a human-readable error string for empty or mixed specs; the
    /// caller wraps it into the `ContextError` condition reason.
    pub fn source(&self) -> Result<ContextSource<'_>, String> {
        let mut found: Vec<ContextSource<'_>> = Vec::new();
        if let Some(inline) = &self.inline {
            found.push(ContextSource::Inline(inline));
        }
        if let Some(config_map) = &self.config_map {
            found.push(ContextSource::ConfigMap(config_map));
        }
        if let Some(git) = &self.git {
            found.push(ContextSource::Git(git));
        }
        match found.len() {
            0 => Err("context declares no source (one of inline, configMap, git)".to_string()),
            1 => Ok(found.remove(0)),
            _ => Err(format!(
                "context declares {} sources, exactly one of inline, configMap, git is allowed",
                found.len()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_source_is_required() {
        let empty = ContextSpec::default();
        assert!(empty.source().is_err());

        let inline = ContextSpec {
            inline: Some(InlineSource {
                content: "coding standards".to_string(),
            }),
            ..Default::default()
        };
        assert!(matches!(
            inline.source().unwrap(),
            ContextSource::Inline(_)
        ));

        let mixed = ContextSpec {
            inline: Some(InlineSource {
                content: "x".to_string(),
            }),
            config_map: Some(ConfigMapSource {
                name: "docs".to_string(),
                optional: None,
            }),
            git: None,
        };
        let err = mixed.source().unwrap_err();
        assert!(err.contains("exactly one"));
    }

    #[test]
    fn git_defaults() {
        let git = GitSource {
            repository: "https://github.com/kubetask-io/kubetask.git".to_string(),
            git_ref: None,
            depth: None,
            secret_ref: None,
        };
        assert_eq!(git.git_ref(), "HEAD");
        assert_eq!(git.depth(), 1);
    }
}
