//! Pod and ConfigMap construction for task execution
//!
//! The builders are pure: given identical inputs they emit byte-for-byte
//! identical specs, which is what makes create-or-get idempotent. All
//! store interaction lives in `TaskResourceManager`.

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::crds::{Agent, Task};
use crate::tasks::config::OperatorConfig;
use crate::tasks::types::{is_not_found, labels, Error, Result};

use super::contexts::{build_task_md, resolve_mount_path, ResolvedContext};

/// Volume and mount names inside the spawned pod
const WORKSPACE_VOLUME: &str = "workspace";
const FILES_VOLUME: &str = "task-files";
const FILES_STAGING_DIR: &str = "/kubetask/files";

/// Deterministic pod name for a task
#[must_use]
pub fn pod_name(task_name: &str) -> String {
    format!("{task_name}-pod")
}

/// Deterministic name of the ConfigMap carrying `task.md` and inline files
#[must_use]
pub fn files_config_map_name(task_name: &str) -> String {
    format!("{task_name}-files")
}

/// ConfigMap key for an inline context file
#[must_use]
pub fn file_key(name: &str) -> String {
    let mut key: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    key.truncate(63);
    key
}

/// Wrap a command so the container stays alive after the command exits.
/// The subshell isolates a user `exit` so the exit code is still captured.
#[must_use]
pub fn wrap_keep_alive(command: &[String], keep_alive_seconds: u64) -> Vec<String> {
    let joined = command
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("( {joined} ); rc=$?; sleep {keep_alive_seconds}; exit $rc"),
    ]
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Build the ConfigMap carrying `task.md` plus every inline context that has
/// an explicit mount path.
#[must_use]
pub fn build_files_config_map(
    task: &Task,
    pod_namespace: &str,
    resolved: &[ResolvedContext],
) -> ConfigMap {
    let task_name = task.name_any();
    let mut data = BTreeMap::new();
    data.insert(
        "task.md".to_string(),
        build_task_md(task.spec.description.as_deref(), resolved),
    );
    for item in resolved {
        if let ResolvedContext::File {
            name,
            content,
            mount_path: Some(_),
            ..
        } = item
        {
            data.insert(file_key(name), content.clone());
        }
    }

    let mut cm_labels = BTreeMap::new();
    cm_labels.insert(labels::TASK.to_string(), task_name.clone());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(files_config_map_name(&task_name)),
            namespace: Some(pod_namespace.to_string()),
            labels: Some(cm_labels),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Build the fully specified compute pod for a task.
///
/// `pod_namespace` is the agent's namespace for cross-namespace execution,
/// the task's own namespace otherwise.
pub fn build_task_pod(
    task: &Task,
    agent: &Agent,
    resolved: &[ResolvedContext],
    pod_namespace: &str,
    config: &OperatorConfig,
) -> Result<Pod> {
    let task_name = task.name_any();
    let task_namespace = task.namespace().unwrap_or_else(|| "default".to_string());
    let agent_name = agent.name_any();
    let workspace_dir = agent.spec.workspace_dir().to_string();

    let mut pod_labels = BTreeMap::new();
    if let Some(extra) = &agent.spec.pod_labels {
        for (k, v) in extra {
            pod_labels.insert(k.clone(), v.clone());
        }
    }
    pod_labels.insert(labels::TASK.to_string(), task_name.clone());
    pod_labels.insert(labels::AGENT.to_string(), agent_name.clone());

    // Volumes, in deterministic order: workspace, files, credentials,
    // configmap contexts.
    let mut volumes = vec![
        json!({"name": WORKSPACE_VOLUME, "emptyDir": {}}),
        json!({
            "name": FILES_VOLUME,
            "configMap": {"name": files_config_map_name(&task_name)}
        }),
    ];
    let mut agent_mounts = vec![json!({
        "name": WORKSPACE_VOLUME,
        "mountPath": workspace_dir,
    })];
    let mut agent_env = vec![
        json!({"name": "WORKSPACE_DIR", "value": workspace_dir}),
        json!({"name": "TASK_NAME", "value": task_name}),
        json!({"name": "TASK_NAMESPACE", "value": task_namespace}),
    ];

    if let Some(credentials) = &agent.spec.credentials {
        for (index, credential) in credentials.iter().enumerate() {
            if let Some(env_name) = &credential.env {
                let key = credential
                    .secret_ref
                    .key
                    .clone()
                    .unwrap_or_else(|| credential.name.clone());
                agent_env.push(json!({
                    "name": env_name,
                    "valueFrom": {
                        "secretKeyRef": {
                            "name": credential.secret_ref.name,
                            "key": key,
                        }
                    }
                }));
            }
            if let Some(mount_path) = &credential.mount_path {
                let volume_name = format!("cred-{index}-{}", file_key(&credential.name));
                match &credential.secret_ref.key {
                    Some(key) => {
                        // Single key projected as one file
                        let file_name = mount_path
                            .rsplit('/')
                            .next()
                            .unwrap_or(key)
                            .to_string();
                        volumes.push(json!({
                            "name": volume_name,
                            "secret": {
                                "secretName": credential.secret_ref.name,
                                "items": [{"key": key, "path": file_name}],
                            }
                        }));
                        agent_mounts.push(json!({
                            "name": volume_name,
                            "mountPath": mount_path,
                            "subPath": file_name,
                            "readOnly": true,
                        }));
                    }
                    None => {
                        // Whole secret mounted as a directory
                        volumes.push(json!({
                            "name": volume_name,
                            "secret": {"secretName": credential.secret_ref.name}
                        }));
                        agent_mounts.push(json!({
                            "name": volume_name,
                            "mountPath": mount_path,
                            "readOnly": true,
                        }));
                    }
                }
            }
        }
    }

    // Prepare-workspace script: task.md always, then inline files whose
    // resolved path lives under the workspace (shared volume). Inline files
    // outside the workspace are mounted directly into the agent container.
    let mut prepare = vec![format!(
        "cp {FILES_STAGING_DIR}/task.md {}/task.md",
        workspace_dir.trim_end_matches('/')
    )];
    for (index, item) in resolved.iter().enumerate() {
        match item {
            ResolvedContext::File {
                name,
                mount_path: Some(path),
                ..
            } => {
                let target = resolve_mount_path(path, &workspace_dir);
                if target.starts_with(&workspace_dir) {
                    let key = file_key(name);
                    prepare.push(format!(
                        "mkdir -p $(dirname {target}) && cp {FILES_STAGING_DIR}/{key} {target}"
                    ));
                } else {
                    let volume_name = format!("ctx-{index}-{}", file_key(name));
                    let key = file_key(name);
                    volumes.push(json!({
                        "name": volume_name,
                        "configMap": {
                            "name": files_config_map_name(&task_name),
                            "items": [{"key": key, "path": key}],
                        }
                    }));
                    agent_mounts.push(json!({
                        "name": volume_name,
                        "mountPath": target,
                        "subPath": key,
                        "readOnly": true,
                    }));
                }
            }
            ResolvedContext::ConfigMapVolume {
                name,
                config_map,
                mount_path,
                optional,
            } => {
                let volume_name = format!("ctx-{index}-{}", file_key(name));
                volumes.push(json!({
                    "name": volume_name,
                    "configMap": {"name": config_map, "optional": optional}
                }));
                agent_mounts.push(json!({
                    "name": volume_name,
                    "mountPath": resolve_mount_path(mount_path, &workspace_dir),
                    "readOnly": true,
                }));
            }
            _ => {}
        }
    }

    let mut init_containers = vec![json!({
        "name": "prepare-workspace",
        "image": config.git.image,
        "command": ["sh", "-c"],
        "args": [prepare.join(" && ")],
        "volumeMounts": [
            {"name": FILES_VOLUME, "mountPath": FILES_STAGING_DIR},
            {"name": WORKSPACE_VOLUME, "mountPath": workspace_dir},
        ],
    })];

    // One clone container per git context, in context order
    for (index, item) in resolved.iter().enumerate() {
        if let ResolvedContext::GitClone {
            name,
            repository,
            git_ref,
            depth,
            secret,
            dest,
        } = item
        {
            let target = resolve_mount_path(dest, &workspace_dir);
            let mut script = match secret {
                Some(_) => {
                    let stripped = repository
                        .strip_prefix("https://")
                        .unwrap_or(repository.as_str());
                    format!(
                        "git clone --depth {depth} \"https://x-access-token:${{GIT_TOKEN}}@{stripped}\" {target}"
                    )
                }
                None => format!("git clone --depth {depth} {repository} {target}"),
            };
            if git_ref != "HEAD" {
                script.push_str(&format!(" && git -C {target} checkout {git_ref}"));
            }

            let mut container = json!({
                "name": format!("git-{index}-{}", file_key(name)),
                "image": config.git.image,
                "command": ["sh", "-c"],
                "args": [script],
                "volumeMounts": [
                    {"name": WORKSPACE_VOLUME, "mountPath": workspace_dir},
                ],
            });
            if let Some(secret_ref) = secret {
                container["env"] = json!([{
                    "name": "GIT_TOKEN",
                    "valueFrom": {
                        "secretKeyRef": {
                            "name": secret_ref.name,
                            "key": secret_ref.key.clone().unwrap_or_else(|| "token".to_string()),
                        }
                    }
                }]);
            }
            init_containers.push(container);
        }
    }

    // Command: the agent entrypoint, optionally wrapped for keep-alive
    let base_command = agent.spec.command.clone().unwrap_or_default();
    let hitl = task
        .spec
        .human_in_the_loop
        .clone()
        .or_else(|| agent.spec.human_in_the_loop.clone());
    let command: Vec<String> = match &hitl {
        Some(h) if h.enabled => {
            agent_env.push(json!({
                "name": "KUBETASK_KEEP_ALIVE_SECONDS",
                "value": h.keep_alive().to_string(),
            }));
            wrap_keep_alive(&base_command, h.keep_alive())
        }
        _ => base_command,
    };

    let mut agent_container = json!({
        "name": "agent",
        "image": agent.spec.image,
        "env": agent_env,
        "volumeMounts": agent_mounts,
        "workingDir": workspace_dir,
    });
    if !command.is_empty() {
        agent_container["command"] = json!(command);
    }
    if let Some(resources) = &agent.spec.resources {
        let mut spec = serde_json::Map::new();
        if let Some(requests) = &resources.requests {
            spec.insert("requests".to_string(), json!(requests));
        }
        if let Some(limits) = &resources.limits {
            spec.insert("limits".to_string(), json!(limits));
        }
        agent_container["resources"] = Value::Object(spec);
    }

    let mut pod_spec = json!({
        "restartPolicy": "Never",
        "initContainers": init_containers,
        "containers": [agent_container],
        "volumes": volumes,
    });
    if let Some(service_account) = &agent.spec.service_account_name {
        pod_spec["serviceAccountName"] = json!(service_account);
    }
    if let Some(node_selector) = &agent.spec.node_selector {
        pod_spec["nodeSelector"] = json!(node_selector);
    }
    if let Some(tolerations) = &agent.spec.tolerations {
        pod_spec["tolerations"] = json!(tolerations);
    }
    if let Some(affinity) = &agent.spec.affinity {
        pod_spec["affinity"] = affinity.clone();
    }
    if let Some(runtime_class) = &agent.spec.runtime_class_name {
        pod_spec["runtimeClassName"] = json!(runtime_class);
    }

    let pod_json = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod_name(&task_name),
            "namespace": pod_namespace,
            "labels": pod_labels,
        },
        "spec": pod_spec,
    });

    serde_json::from_value(pod_json).map_err(Error::SerializationError)
}

/// Store-facing resource operations for the task reconciler
pub struct TaskResourceManager<'a> {
    pub client: &'a kube::Client,
}

impl<'a> TaskResourceManager<'a> {
    pub fn new(client: &'a kube::Client) -> Self {
        Self { client }
    }

    /// Create the files ConfigMap, replacing the data when it already
    /// exists so re-reconciles pick up edited specs.
    pub async fn ensure_files_config_map(
        &self,
        namespace: &str,
        mut config_map: ConfigMap,
        owner: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>,
    ) -> Result<()> {
        if let Some(owner_ref) = owner {
            config_map.metadata.owner_references = Some(vec![owner_ref]);
        }
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = config_map.name_any();
        match api.create(&PostParams::default(), &config_map).await {
            Ok(_) => {
                info!("Created ConfigMap: {name}");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("ConfigMap {name} exists, replacing with latest content");
                let existing = api.get(&name).await?;
                config_map.metadata.resource_version = existing.resource_version();
                api.replace(&name, &PostParams::default(), &config_map)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent pod creation: an AlreadyExists answer means a previous
    /// reconcile won the race, which is success.
    pub async fn create_or_get_pod(
        &self,
        namespace: &str,
        mut pod: Pod,
        owner: Option<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>,
    ) -> Result<Pod> {
        if let Some(owner_ref) = owner {
            pod.metadata.owner_references = Some(vec![owner_ref]);
        }
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let name = pod.name_any();
        match api.create(&PostParams::default(), &pod).await {
            Ok(created) => {
                info!("Created Pod: {namespace}/{name}");
                Ok(created)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!("Pod {namespace}/{name} already exists");
                Ok(api.get(&name).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    /// Delete the pod; absence is success.
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                info!("Deleted Pod: {namespace}/{name}");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the files ConfigMap; absence is success.
    pub async fn delete_files_config_map(&self, namespace: &str, task_name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(&files_config_map_name(task_name), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::agent::{AgentSpec, Credential, SecretKeyRef};
    use crate::crds::{HumanInTheLoop, TaskSpec};

    fn sample_agent() -> Agent {
        Agent {
            metadata: ObjectMeta {
                name: Some("claude".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: AgentSpec {
                image: "ghcr.io/kubetask/agent:1.0".to_string(),
                command: Some(vec!["agent".to_string(), "run".to_string()]),
                ..Default::default()
            },
            status: None,
        }
    }

    fn sample_task() -> Task {
        Task {
            metadata: ObjectMeta {
                name: Some("review-42".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: TaskSpec {
                description: Some("Review PR #42".to_string()),
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn pod_names_are_deterministic() {
        assert_eq!(pod_name("review-42"), "review-42-pod");
        assert_eq!(files_config_map_name("review-42"), "review-42-files");
    }

    #[test]
    fn file_key_sanitizes() {
        assert_eq!(file_key("Coding Standards"), "coding-standards");
        assert_eq!(file_key("notes.md"), "notes.md");
    }

    #[test]
    fn keep_alive_wrapping_preserves_exit_code_shape() {
        let wrapped = wrap_keep_alive(
            &["agent".to_string(), "run --all".to_string()],
            600,
        );
        assert_eq!(wrapped[0], "sh");
        assert_eq!(wrapped[1], "-c");
        assert_eq!(wrapped[2], "( 'agent' 'run --all' ); rc=$?; sleep 600; exit $rc");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn builder_is_deterministic() {
        let task = sample_task();
        let agent = sample_agent();
        let resolved = vec![ResolvedContext::File {
            name: "standards".to_string(),
            namespace: "default".to_string(),
            source_type: "inline",
            content: "be tidy".to_string(),
            mount_path: None,
        }];
        let config = OperatorConfig::default();

        let a = build_task_pod(&task, &agent, &resolved, "default", &config).unwrap();
        let b = build_task_pod(&task, &agent, &resolved, "default", &config).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn pod_carries_contract_labels_and_env() {
        let task = sample_task();
        let agent = sample_agent();
        let config = OperatorConfig::default();
        let pod = build_task_pod(&task, &agent, &[], "default", &config).unwrap();

        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("kubetask.io/task").unwrap(), "review-42");
        assert_eq!(labels.get("kubetask.io/agent").unwrap(), "claude");

        let spec = pod.spec.as_ref().unwrap();
        let container = &spec.containers[0];
        let env = container.env.as_ref().unwrap();
        let names: Vec<_> = env.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"WORKSPACE_DIR"));
        assert!(names.contains(&"TASK_NAME"));
        assert!(names.contains(&"TASK_NAMESPACE"));
        assert!(!names.contains(&"KUBETASK_KEEP_ALIVE_SECONDS"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn keep_alive_env_and_wrapping_apply_when_enabled() {
        let mut task = sample_task();
        task.spec.human_in_the_loop = Some(HumanInTheLoop {
            enabled: true,
            keep_alive_seconds: Some(900),
        });
        let agent = sample_agent();
        let config = OperatorConfig::default();
        let pod = build_task_pod(&task, &agent, &[], "default", &config).unwrap();

        let container = &pod.spec.as_ref().unwrap().containers[0];
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[0], "sh");
        assert!(command[2].contains("sleep 900"));

        let env = container.env.as_ref().unwrap();
        let keep_alive = env
            .iter()
            .find(|e| e.name == "KUBETASK_KEEP_ALIVE_SECONDS")
            .unwrap();
        assert_eq!(keep_alive.value.as_deref(), Some("900"));
    }

    #[test]
    fn git_context_emits_clone_init_container() {
        let task = sample_task();
        let agent = sample_agent();
        let config = OperatorConfig::default();
        let resolved = vec![ResolvedContext::GitClone {
            name: "repo".to_string(),
            repository: "https://github.com/kubetask-io/kubetask.git".to_string(),
            git_ref: "v1.2.0".to_string(),
            depth: 1,
            secret: None,
            dest: "repo".to_string(),
        }];
        let pod = build_task_pod(&task, &agent, &resolved, "default", &config).unwrap();

        let init = pod.spec.as_ref().unwrap().init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 2);
        assert_eq!(init[0].name, "prepare-workspace");
        assert_eq!(init[1].name, "git-0-repo");
        let script = &init[1].args.as_ref().unwrap()[0];
        assert!(script.contains("git clone --depth 1"));
        assert!(script.contains("/workspace/repo"));
        assert!(script.contains("checkout v1.2.0"));
    }

    #[test]
    fn authenticated_clone_uses_token_env() {
        let task = sample_task();
        let agent = sample_agent();
        let config = OperatorConfig::default();
        let resolved = vec![ResolvedContext::GitClone {
            name: "private".to_string(),
            repository: "https://github.com/kubetask-io/private.git".to_string(),
            git_ref: "HEAD".to_string(),
            depth: 1,
            secret: Some(SecretKeyRef {
                name: "git-cred".to_string(),
                key: Some("token".to_string()),
            }),
            dest: "private".to_string(),
        }];
        let pod = build_task_pod(&task, &agent, &resolved, "default", &config).unwrap();

        let clone = &pod.spec.as_ref().unwrap().init_containers.as_ref().unwrap()[1];
        let script = &clone.args.as_ref().unwrap()[0];
        assert!(script.contains("x-access-token:${GIT_TOKEN}@github.com"));
        assert!(!script.contains("checkout"));
        let env = clone.env.as_ref().unwrap();
        assert_eq!(env[0].name, "GIT_TOKEN");
    }

    #[test]
    fn credential_env_and_file_mounts() {
        let task = sample_task();
        let mut agent = sample_agent();
        agent.spec.credentials = Some(vec![
            Credential {
                name: "api-key".to_string(),
                secret_ref: SecretKeyRef {
                    name: "agent-secrets".to_string(),
                    key: Some("apiKey".to_string()),
                },
                env: Some("API_KEY".to_string()),
                mount_path: None,
            },
            Credential {
                name: "ssh".to_string(),
                secret_ref: SecretKeyRef {
                    name: "ssh-keys".to_string(),
                    key: None,
                },
                env: None,
                mount_path: Some("/home/agent/.ssh".to_string()),
            },
        ]);
        let config = OperatorConfig::default();
        let pod = build_task_pod(&task, &agent, &[], "default", &config).unwrap();
        let spec = pod.spec.as_ref().unwrap();

        let env = spec.containers[0].env.as_ref().unwrap();
        let api_key = env.iter().find(|e| e.name == "API_KEY").unwrap();
        let value_from = api_key.value_from.as_ref().unwrap();
        let secret_ref = value_from.secret_key_ref.as_ref().unwrap();
        assert_eq!(secret_ref.name, "agent-secrets");
        assert_eq!(secret_ref.key, "apiKey");

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == "/home/agent/.ssh"));
        let volumes = spec.volumes.as_ref().unwrap();
        assert!(volumes
            .iter()
            .any(|v| v.secret.as_ref().is_some_and(|s| s
                .secret_name
                .as_deref()
                == Some("ssh-keys"))));
    }

    #[test]
    fn config_map_carries_task_md_and_explicit_files() {
        let task = sample_task();
        let resolved = vec![
            ResolvedContext::File {
                name: "inline-doc".to_string(),
                namespace: "default".to_string(),
                source_type: "inline",
                content: "aggregated".to_string(),
                mount_path: None,
            },
            ResolvedContext::File {
                name: "notes.md".to_string(),
                namespace: "default".to_string(),
                source_type: "inline",
                content: "file content".to_string(),
                mount_path: Some("docs/notes.md".to_string()),
            },
        ];
        let cm = build_files_config_map(&task, "default", &resolved);
        let data = cm.data.as_ref().unwrap();
        assert!(data["task.md"].contains("Review PR #42"));
        assert!(data["task.md"].contains("aggregated"));
        assert_eq!(data["notes.md"], "file content");
    }
}
