//! Context resolution for task workspaces
//!
//! Merges the effective context list (agent defaults, then template, then
//! task; later wins by item name), resolves every item against the store and
//! produces materialized mount descriptors for the pod builder. Contexts
//! without a mount path are concatenated into `task.md` in merge order,
//! wrapped in XML-style delimiters.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use tracing::debug;

use crate::crds::agent::SecretKeyRef;
use crate::crds::{ContextItem, ContextResource, ContextSource};
use crate::tasks::types::{Error, Result};

/// A context item resolved to something the pod builder can materialize
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedContext {
    /// Literal content; aggregated into `task.md` when `mount_path` is
    /// absent, written to a file otherwise
    File {
        name: String,
        namespace: String,
        source_type: &'static str,
        content: String,
        mount_path: Option<String>,
    },
    /// A ConfigMap mounted as a volume at an explicit path
    ConfigMapVolume {
        name: String,
        config_map: String,
        mount_path: String,
        optional: bool,
    },
    /// A repository cloned by an init container into the workspace
    GitClone {
        name: String,
        repository: String,
        git_ref: String,
        depth: u32,
        secret: Option<SecretKeyRef>,
        dest: String,
    },
}

/// Merge context lists with later-wins semantics keyed by item name.
/// Unnamed items are never overridden and keep their position.
#[must_use]
pub fn merge_contexts(layers: &[&[ContextItem]]) -> Vec<ContextItem> {
    let mut merged: Vec<ContextItem> = Vec::new();
    for layer in layers {
        for item in *layer {
            let replaced = item.name.as_ref().and_then(|name| {
                merged
                    .iter()
                    .position(|existing| existing.name.as_deref() == Some(name))
            });
            match replaced {
                Some(idx) => merged[idx] = item.clone(),
                None => merged.push(item.clone()),
            }
        }
    }
    merged
}

/// Resolve a mount path: absolute paths are used verbatim, relative paths
/// are joined to the agent workspace directory.
#[must_use]
pub fn resolve_mount_path(path: &str, workspace_dir: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workspace_dir.trim_end_matches('/'), path)
    }
}

/// Render `task.md`: the task description followed by every path-less
/// context in merge order, each wrapped in a delimiter block.
#[must_use]
pub fn build_task_md(description: Option<&str>, resolved: &[ResolvedContext]) -> String {
    let mut out = String::new();
    if let Some(description) = description {
        out.push_str(description);
        if !description.ends_with('\n') {
            out.push('\n');
        }
    }
    for item in resolved {
        if let ResolvedContext::File {
            name,
            namespace,
            source_type,
            content,
            mount_path: None,
        } = item
        {
            out.push_str(&format!(
                "\n<context name=\"{name}\" namespace=\"{namespace}\" type=\"{source_type}\">\n"
            ));
            out.push_str(content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("</context>\n");
        }
    }
    out
}

/// Resolve the effective context list against the store.
///
/// `task_namespace` scopes unqualified references. Fails with
/// `ContextError` on a missing non-optional reference or a malformed
/// Context source.
pub async fn resolve_contexts(
    client: &Client,
    task_namespace: &str,
    items: &[ContextItem],
) -> Result<Vec<ResolvedContext>> {
    let mut resolved = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let item_name = item
            .name
            .clone()
            .unwrap_or_else(|| format!("context-{index}"));
        let optional = item.optional.unwrap_or(false);

        if let Some(content) = &item.content {
            resolved.push(ResolvedContext::File {
                name: item_name,
                namespace: task_namespace.to_string(),
                source_type: "inline",
                content: content.clone(),
                mount_path: item.mount_path.clone(),
            });
            continue;
        }

        let Some(context_ref) = &item.context_ref else {
            return Err(Error::ContextError(format!(
                "context item {item_name:?} carries neither content nor a contextRef"
            )));
        };

        let ref_namespace = context_ref
            .namespace
            .clone()
            .unwrap_or_else(|| task_namespace.to_string());
        let contexts: Api<ContextResource> = Api::namespaced(client.clone(), &ref_namespace);
        let context = match contexts.get_opt(&context_ref.name).await? {
            Some(context) => context,
            None if optional => {
                debug!(
                    context = %context_ref.name,
                    namespace = %ref_namespace,
                    "optional context is missing, skipping"
                );
                continue;
            }
            None => {
                return Err(Error::ContextError(format!(
                    "context {}/{} not found",
                    ref_namespace, context_ref.name
                )));
            }
        };

        let source = context
            .spec
            .source()
            .map_err(|e| Error::ContextError(format!("context {}: {e}", context_ref.name)))?;

        match source {
            ContextSource::Inline(inline) => {
                resolved.push(ResolvedContext::File {
                    name: item_name,
                    namespace: ref_namespace,
                    source_type: "inline",
                    content: inline.content.clone(),
                    mount_path: item.mount_path.clone(),
                });
            }
            ContextSource::ConfigMap(cm_source) => {
                let cm_optional = optional || cm_source.optional.unwrap_or(false);
                match &item.mount_path {
                    Some(mount_path) => {
                        if !cm_optional {
                            ensure_config_map_exists(client, task_namespace, &cm_source.name)
                                .await?;
                        }
                        resolved.push(ResolvedContext::ConfigMapVolume {
                            name: item_name,
                            config_map: cm_source.name.clone(),
                            mount_path: mount_path.clone(),
                            optional: cm_optional,
                        });
                    }
                    None => {
                        // No mount path: the content is aggregated into
                        // task.md, which requires reading the data now.
                        let config_maps: Api<ConfigMap> =
                            Api::namespaced(client.clone(), task_namespace);
                        let config_map = match config_maps.get_opt(&cm_source.name).await? {
                            Some(cm) => cm,
                            None if cm_optional => continue,
                            None => {
                                return Err(Error::ContextError(format!(
                                    "configmap {}/{} not found",
                                    task_namespace, cm_source.name
                                )));
                            }
                        };
                        let mut content = String::new();
                        if let Some(data) = config_map.data {
                            for (key, value) in data {
                                content.push_str(&format!("# {key}\n{value}\n"));
                            }
                        }
                        resolved.push(ResolvedContext::File {
                            name: item_name,
                            namespace: ref_namespace,
                            source_type: "configMap",
                            content,
                            mount_path: None,
                        });
                    }
                }
            }
            ContextSource::Git(git) => {
                let dest = item
                    .mount_path
                    .clone()
                    .unwrap_or_else(|| item_name.clone());
                resolved.push(ResolvedContext::GitClone {
                    name: item_name,
                    repository: git.repository.clone(),
                    git_ref: git.git_ref().to_string(),
                    depth: git.depth(),
                    secret: git.secret_ref.clone(),
                    dest,
                });
            }
        }
    }

    Ok(resolved)
}

async fn ensure_config_map_exists(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    match config_maps.get_opt(name).await? {
        Some(_) => Ok(()),
        None => Err(Error::ContextError(format!(
            "configmap {namespace}/{name} not found"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ContextRef;

    fn named(name: &str, content: &str) -> ContextItem {
        ContextItem {
            name: Some(name.to_string()),
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn merge_later_layer_wins_by_name() {
        let agent_defaults = vec![named("standards", "agent"), named("tools", "agent")];
        let template = vec![named("standards", "template")];
        let task = vec![named("tools", "task"), named("extra", "task")];

        let merged = merge_contexts(&[&agent_defaults, &template, &task]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].content.as_deref(), Some("template"));
        assert_eq!(merged[1].content.as_deref(), Some("task"));
        assert_eq!(merged[2].name.as_deref(), Some("extra"));
    }

    #[test]
    fn merge_preserves_position_of_overridden_items() {
        let base = vec![named("a", "1"), named("b", "2"), named("c", "3")];
        let over = vec![named("b", "override")];
        let merged = merge_contexts(&[&base, &over]);
        assert_eq!(
            merged
                .iter()
                .map(|i| i.name.as_deref().unwrap())
                .collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(merged[1].content.as_deref(), Some("override"));
    }

    #[test]
    fn merge_keeps_unnamed_items() {
        let unnamed = ContextItem {
            content: Some("anonymous".to_string()),
            ..Default::default()
        };
        let merged = merge_contexts(&[&[unnamed.clone()], &[unnamed]]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn mount_path_resolution() {
        assert_eq!(resolve_mount_path("/etc/config", "/workspace"), "/etc/config");
        assert_eq!(resolve_mount_path("docs", "/workspace"), "/workspace/docs");
        assert_eq!(resolve_mount_path("docs", "/workspace/"), "/workspace/docs");
    }

    #[test]
    fn task_md_wraps_pathless_contexts() {
        let resolved = vec![
            ResolvedContext::File {
                name: "standards".to_string(),
                namespace: "default".to_string(),
                source_type: "inline",
                content: "be tidy".to_string(),
                mount_path: None,
            },
            ResolvedContext::File {
                name: "mounted".to_string(),
                namespace: "default".to_string(),
                source_type: "inline",
                content: "not in task.md".to_string(),
                mount_path: Some("notes.md".to_string()),
            },
        ];
        let md = build_task_md(Some("Fix the flaky test"), &resolved);
        assert!(md.starts_with("Fix the flaky test\n"));
        assert!(md.contains("<context name=\"standards\" namespace=\"default\" type=\"inline\">"));
        assert!(md.contains("be tidy"));
        assert!(md.contains("</context>"));
        assert!(!md.contains("not in task.md"));
    }

    #[test]
    fn task_md_without_description_or_contexts_is_empty() {
        assert_eq!(build_task_md(None, &[]), "");
    }

    #[test]
    fn context_item_without_source_is_detected() {
        // resolve_contexts is async and store-backed; the pure precondition
        // it enforces first is that an item names a source at all.
        let item = ContextItem {
            name: Some("nothing".to_string()),
            ..Default::default()
        };
        assert!(item.content.is_none() && item.context_ref.is_none());

        let item = ContextItem {
            name: Some("ref".to_string()),
            context_ref: Some(ContextRef {
                name: "docs".to_string(),
                namespace: None,
            }),
            ..Default::default()
        };
        assert!(item.context_ref.is_some());
    }
}
