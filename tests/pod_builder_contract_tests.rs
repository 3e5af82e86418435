//! Contract tests for the pod builder: determinism, labels, workspace
//! layout and keep-alive wrapping, exercised through the public API.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubetask_controller::crds::agent::AgentSpec;
use kubetask_controller::crds::{Agent, ContextItem, HumanInTheLoop, Task, TaskSpec};
use kubetask_controller::tasks::config::OperatorConfig;
use kubetask_controller::tasks::task::contexts::{
    build_task_md, merge_contexts, ResolvedContext,
};
use kubetask_controller::tasks::task::resources::{
    build_files_config_map, build_task_pod, files_config_map_name, pod_name,
};

fn agent() -> Agent {
    Agent {
        metadata: ObjectMeta {
            name: Some("reviewer".to_string()),
            namespace: Some("platform".to_string()),
            ..Default::default()
        },
        spec: AgentSpec {
            image: "ghcr.io/kubetask/agent:2.1".to_string(),
            command: Some(vec!["kubetask-agent".to_string()]),
            workspace_dir: Some("/workspace".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

fn task(name: &str) -> Task {
    Task {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("prod-1".to_string()),
            ..Default::default()
        },
        spec: TaskSpec {
            description: Some("Investigate the failing canary".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

#[test]
fn naming_is_deterministic() {
    assert_eq!(pod_name("canary-7"), "canary-7-pod");
    assert_eq!(files_config_map_name("canary-7"), "canary-7-files");
}

#[test]
fn builder_output_is_byte_identical_across_calls() {
    let config = OperatorConfig::default();
    let resolved = vec![ResolvedContext::File {
        name: "runbook".to_string(),
        namespace: "prod-1".to_string(),
        source_type: "inline",
        content: "check the dashboards first".to_string(),
        mount_path: None,
    }];

    let first = build_task_pod(&task("canary-7"), &agent(), &resolved, "platform", &config).unwrap();
    let second =
        build_task_pod(&task("canary-7"), &agent(), &resolved, "platform", &config).unwrap();
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

#[test]
fn pod_and_configmap_carry_the_workspace_contract() {
    let config = OperatorConfig::default();
    let resolved = vec![ResolvedContext::File {
        name: "runbook".to_string(),
        namespace: "prod-1".to_string(),
        source_type: "inline",
        content: "check the dashboards first".to_string(),
        mount_path: None,
    }];
    let t = task("canary-7");

    let pod = build_task_pod(&t, &agent(), &resolved, "platform", &config).unwrap();
    let labels = pod.metadata.labels.unwrap();
    assert_eq!(labels["kubetask.io/task"], "canary-7");
    assert_eq!(labels["kubetask.io/agent"], "reviewer");
    assert_eq!(pod.metadata.namespace.as_deref(), Some("platform"));

    let container = &pod.spec.as_ref().unwrap().containers[0];
    let env = container.env.as_ref().unwrap();
    let get = |name: &str| {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
            .unwrap()
    };
    assert_eq!(get("WORKSPACE_DIR"), "/workspace");
    assert_eq!(get("TASK_NAME"), "canary-7");
    assert_eq!(get("TASK_NAMESPACE"), "prod-1");

    let cm = build_files_config_map(&t, "platform", &resolved);
    let task_md = &cm.data.as_ref().unwrap()["task.md"];
    assert!(task_md.contains("Investigate the failing canary"));
    assert!(task_md.contains("<context name=\"runbook\" namespace=\"prod-1\" type=\"inline\">"));
    assert!(task_md.contains("check the dashboards first"));
    assert!(task_md.contains("</context>"));
}

#[test]
fn keep_alive_wraps_the_agent_command() {
    let config = OperatorConfig::default();
    let mut t = task("debug-1");
    t.spec.human_in_the_loop = Some(HumanInTheLoop {
        enabled: true,
        keep_alive_seconds: None,
    });

    let pod = build_task_pod(&t, &agent(), &[], "platform", &config).unwrap();
    let container = &pod.spec.as_ref().unwrap().containers[0];
    let command = container.command.as_ref().unwrap();
    assert_eq!(command[0], "sh");
    assert!(command[2].starts_with("( 'kubetask-agent' ); rc=$?;"));
    assert!(command[2].contains("sleep 3600"));
    assert!(command[2].ends_with("exit $rc"));

    let keep_alive = container
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|e| e.name == "KUBETASK_KEEP_ALIVE_SECONDS")
        .unwrap();
    assert_eq!(keep_alive.value.as_deref(), Some("3600"));
}

#[test]
fn context_merge_order_flows_into_task_md() {
    let agent_defaults = vec![ContextItem {
        name: Some("standards".to_string()),
        content: Some("agent default".to_string()),
        ..Default::default()
    }];
    let task_items = vec![ContextItem {
        name: Some("standards".to_string()),
        content: Some("task override".to_string()),
        ..Default::default()
    }];
    let merged = merge_contexts(&[&agent_defaults, &task_items]);
    assert_eq!(merged.len(), 1);

    let resolved = vec![ResolvedContext::File {
        name: "standards".to_string(),
        namespace: "prod-1".to_string(),
        source_type: "inline",
        content: merged[0].content.clone().unwrap(),
        mount_path: None,
    }];
    let md = build_task_md(None, &resolved);
    assert!(md.contains("task override"));
    assert!(!md.contains("agent default"));
}
