//! Webhook request handling: auth, filter evaluation, template rendering,
//! trigger concurrency and resource fan-out.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use rand::distributions::{Alphanumeric, DistString};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::crds::webhook_trigger::{SecretValue, TriggerConcurrency};
use crate::crds::{
    ActiveResource, ConcurrencyPolicy, MatchPolicy, Task, TaskSpec, WebhookTrigger, WorkflowRun,
    WorkflowRunSpec, WorkflowSpec,
};
use crate::tasks::types::{annotations, labels, Error};
use crate::webhook::{auth, filter, render, AppState};

/// `POST /webhooks/{namespace}/{trigger}`
pub async fn handle_trigger(
    State(state): State<AppState>,
    Path((namespace, trigger_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let triggers: Api<WebhookTrigger> = Api::namespaced(state.client.clone(), &namespace);
    let trigger = match triggers.get_opt(&trigger_name).await {
        Ok(Some(trigger)) => trigger,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown trigger"})),
            );
        }
        Err(e) => {
            warn!("trigger lookup failed: {e}");
            return store_error();
        }
    };

    // A trigger with unusable auth is not Ready and stays invisible.
    if trigger.spec.auth.validate().is_err() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "trigger not ready"})),
        );
    }
    let secret_value = auth_secret(&trigger);
    let resolved_secret = match auth::resolve_secret(&state.client, &namespace, secret_value).await
    {
        Ok(secret) => secret,
        Err(e) => {
            warn!(trigger = %trigger_name, "trigger secret unresolvable: {e}");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "trigger not ready"})),
            );
        }
    };

    let signature_header = trigger
        .spec
        .auth
        .hmac
        .as_ref()
        .and_then(|h| header_value(&headers, &h.header));
    let authorization = header_value(&headers, "authorization");
    let match_header = trigger
        .spec
        .auth
        .header_match
        .as_ref()
        .and_then(|h| header_value(&headers, &h.name));
    if !auth::authenticate(
        &trigger.spec.auth,
        &resolved_secret,
        &body,
        signature_header.as_deref(),
        authorization.as_deref(),
        match_header.as_deref(),
    ) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "authentication failed"})),
        );
    }

    let parsed_body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": format!("body is not JSON: {e}")})),
            );
        }
    };
    let data = json!({
        "body": parsed_body,
        "headers": lowercased_headers(&headers),
    });

    match dispatch(&state, &trigger, &namespace, &data).await {
        Ok(outcome) => respond(outcome),
        Err(DispatchError::Expression(message)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": message})),
        ),
        Err(DispatchError::Store(e)) => {
            warn!("webhook dispatch store error: {e}");
            store_error()
        }
    }
}

fn store_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "store error"})),
    )
}

fn auth_secret(trigger: &WebhookTrigger) -> &SecretValue {
    if let Some(hmac) = &trigger.spec.auth.hmac {
        &hmac.secret
    } else if let Some(bearer) = &trigger.spec.auth.bearer {
        &bearer.secret
    } else if let Some(header_match) = &trigger.spec.auth.header_match {
        &header_match.secret
    } else {
        // validate() ran before this point
        unreachable!("trigger auth validated")
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Lowercased header map exposed to filters and templates.
fn lowercased_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

#[derive(Debug)]
enum DispatchError {
    /// Filter or template failure -> 422
    Expression(String),
    /// Store failure -> 500
    Store(Error),
}

impl From<Error> for DispatchError {
    fn from(e: Error) -> Self {
        match e {
            Error::FilterError(message) => DispatchError::Expression(message),
            Error::RenderError(e) => DispatchError::Expression(e.to_string()),
            other => DispatchError::Store(other),
        }
    }
}

struct DispatchOutcome {
    created: Vec<ActiveResource>,
    matched: bool,
    skipped: usize,
}

fn respond(outcome: DispatchOutcome) -> (StatusCode, Json<Value>) {
    if !outcome.created.is_empty() {
        let created: Vec<Value> = outcome
            .created
            .iter()
            .map(|r| json!({"kind": r.kind, "name": r.name, "namespace": r.namespace}))
            .collect();
        return (StatusCode::CREATED, Json(json!({"created": created})));
    }
    if outcome.matched {
        // Matched but concurrency skipped every creation
        return (
            StatusCode::OK,
            Json(json!({"matched": true, "created": [], "skipped": outcome.skipped})),
        );
    }
    (StatusCode::OK, Json(json!({"matched": false})))
}

async fn dispatch(
    state: &AppState,
    trigger: &WebhookTrigger,
    namespace: &str,
    data: &Value,
) -> Result<DispatchOutcome, DispatchError> {
    let mut outcome = DispatchOutcome {
        created: Vec::new(),
        matched: false,
        skipped: 0,
    };
    let mut rule_hits: Vec<String> = Vec::new();

    if let Some(rules) = &trigger.spec.rules {
        let match_policy = trigger.spec.match_policy.unwrap_or_default();
        for rule in rules {
            let matched = match &rule.filter {
                Some(expression) => filter::evaluate(expression, data)
                    .map_err(|e| DispatchError::Expression(e.to_string()))?,
                None => true,
            };
            if !matched {
                continue;
            }
            outcome.matched = true;
            rule_hits.push(rule.name.clone());

            match enforce_concurrency(state, trigger, Some(&rule.name), rule.concurrency.as_ref())
                .await?
            {
                ConcurrencyOutcome::Proceed => {
                    let created = instantiate_rule(state, trigger, namespace, rule, data).await?;
                    outcome.created.push(created);
                }
                ConcurrencyOutcome::Skip => outcome.skipped += 1,
            }

            if match_policy == MatchPolicy::First {
                break;
            }
        }
    } else if let Some(template) = &trigger.spec.task {
        let matched = match &trigger.spec.filter {
            Some(expression) => filter::evaluate(expression, data)
                .map_err(|e| DispatchError::Expression(e.to_string()))?,
            None => true,
        };
        if matched {
            outcome.matched = true;
            match enforce_concurrency(state, trigger, None, trigger.spec.concurrency.as_ref())
                .await?
            {
                ConcurrencyOutcome::Proceed => {
                    let name = child_name(&trigger.name_any(), None);
                    let spec = rendered_task_spec(template, data)?;
                    create_task(state, trigger, namespace, &name, None, spec).await?;
                    outcome.created.push(ActiveResource {
                        rule: None,
                        kind: "Task".to_string(),
                        name,
                        namespace: namespace.to_string(),
                    });
                }
                ConcurrencyOutcome::Skip => outcome.skipped += 1,
            }
        }
    }

    record_trigger_status(state, trigger, namespace, &outcome.created, &rule_hits)
        .await
        .map_err(DispatchError::Store)?;
    Ok(outcome)
}

enum ConcurrencyOutcome {
    Proceed,
    Skip,
}

/// Enforce trigger- or rule-scoped concurrency against the live phases of
/// the previously created resources.
async fn enforce_concurrency(
    state: &AppState,
    trigger: &WebhookTrigger,
    rule: Option<&str>,
    concurrency: Option<&TriggerConcurrency>,
) -> Result<ConcurrencyOutcome, DispatchError> {
    let Some(concurrency) = concurrency else {
        return Ok(ConcurrencyOutcome::Proceed);
    };
    let limit = concurrency.limit.unwrap_or(1) as usize;
    let policy = concurrency.policy.unwrap_or(ConcurrencyPolicy::Forbid);

    let tracked: Vec<ActiveResource> = trigger
        .status
        .as_ref()
        .and_then(|s| s.active_resources.clone())
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.rule.as_deref() == rule)
        .collect();

    let mut live = Vec::new();
    for resource in tracked {
        if is_live(state, &resource).await.map_err(DispatchError::Store)? {
            live.push(resource);
        }
    }
    if live.len() < limit {
        return Ok(ConcurrencyOutcome::Proceed);
    }

    match policy {
        ConcurrencyPolicy::Allow => Ok(ConcurrencyOutcome::Proceed),
        ConcurrencyPolicy::Forbid => {
            debug!(?rule, "concurrency limit reached, Forbid skips creation");
            Ok(ConcurrencyOutcome::Skip)
        }
        ConcurrencyPolicy::Replace => {
            for resource in &live {
                annotate_stop(state, resource)
                    .await
                    .map_err(DispatchError::Store)?;
            }
            Ok(ConcurrencyOutcome::Proceed)
        }
    }
}

async fn is_live(state: &AppState, resource: &ActiveResource) -> Result<bool, Error> {
    match resource.kind.as_str() {
        "Task" => {
            let tasks: Api<Task> = Api::namespaced(state.client.clone(), &resource.namespace);
            let Some(task) = tasks.get_opt(&resource.name).await? else {
                return Ok(false);
            };
            Ok(match task.status.map(|s| s.phase) {
                Some(phase) => !phase.is_terminal(),
                None => true,
            })
        }
        "WorkflowRun" => {
            let runs: Api<WorkflowRun> =
                Api::namespaced(state.client.clone(), &resource.namespace);
            let Some(run) = runs.get_opt(&resource.name).await? else {
                return Ok(false);
            };
            Ok(match run.status.map(|s| s.phase) {
                Some(phase) => !phase.is_terminal(),
                None => true,
            })
        }
        _ => Ok(false),
    }
}

async fn annotate_stop(state: &AppState, resource: &ActiveResource) -> Result<(), Error> {
    let patch = json!({
        "metadata": {"annotations": {annotations::STOP: "true"}}
    });
    match resource.kind.as_str() {
        "Task" => {
            let tasks: Api<Task> = Api::namespaced(state.client.clone(), &resource.namespace);
            tasks
                .patch(&resource.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        "WorkflowRun" => {
            let runs: Api<WorkflowRun> =
                Api::namespaced(state.client.clone(), &resource.namespace);
            runs.patch(&resource.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        _ => {}
    }
    Ok(())
}

/// Short random suffix so webhook bursts never collide on names.
fn random_suffix() -> String {
    Alphanumeric
        .sample_string(&mut rand::thread_rng(), 5)
        .to_lowercase()
}

fn child_name(trigger: &str, rule: Option<&str>) -> String {
    let suffix = random_suffix();
    match rule {
        Some(rule) => format!("{trigger}-{rule}-{suffix}"),
        None => format!("{trigger}-{suffix}"),
    }
}

fn rendered_task_spec(template: &TaskSpec, data: &Value) -> Result<TaskSpec, DispatchError> {
    let mut spec = template.clone();
    if let Some(description) = &spec.description {
        spec.description = Some(render::render_template(description, data).map_err(DispatchError::from)?);
    }
    Ok(spec)
}

fn rendered_workflow_spec(
    template: &WorkflowSpec,
    data: &Value,
) -> Result<WorkflowSpec, DispatchError> {
    let mut workflow = template.clone();
    for stage in &mut workflow.stages {
        for task in &mut stage.tasks {
            if let Some(description) = &task.task.description {
                task.task.description =
                    Some(render::render_template(description, data).map_err(DispatchError::from)?);
            }
        }
    }
    Ok(workflow)
}

async fn instantiate_rule(
    state: &AppState,
    trigger: &WebhookTrigger,
    namespace: &str,
    rule: &crate::crds::WebhookRule,
    data: &Value,
) -> Result<ActiveResource, DispatchError> {
    let trigger_name = trigger.name_any();
    let name = child_name(&trigger_name, Some(&rule.name));

    if let Some(template) = &rule.task {
        let spec = rendered_task_spec(template, data)?;
        create_task(state, trigger, namespace, &name, Some(&rule.name), spec).await?;
        return Ok(ActiveResource {
            rule: Some(rule.name.clone()),
            kind: "Task".to_string(),
            name,
            namespace: namespace.to_string(),
        });
    }
    if let Some(workflow) = &rule.workflow {
        let spec = WorkflowRunSpec {
            workflow_ref: None,
            workflow: Some(rendered_workflow_spec(workflow, data)?),
        };
        create_workflow_run(state, trigger, namespace, &name, &rule.name, spec).await?;
        return Ok(ActiveResource {
            rule: Some(rule.name.clone()),
            kind: "WorkflowRun".to_string(),
            name,
            namespace: namespace.to_string(),
        });
    }
    if let Some(workflow_ref) = &rule.workflow_ref {
        let spec = WorkflowRunSpec {
            workflow_ref: Some(workflow_ref.clone()),
            workflow: None,
        };
        create_workflow_run(state, trigger, namespace, &name, &rule.name, spec).await?;
        return Ok(ActiveResource {
            rule: Some(rule.name.clone()),
            kind: "WorkflowRun".to_string(),
            name,
            namespace: namespace.to_string(),
        });
    }

    Err(DispatchError::Expression(format!(
        "rule {:?} declares no task, workflow or workflowRef",
        rule.name
    )))
}

async fn create_task(
    state: &AppState,
    trigger: &WebhookTrigger,
    namespace: &str,
    name: &str,
    rule: Option<&str>,
    spec: TaskSpec,
) -> Result<(), DispatchError> {
    let tasks: Api<Task> = Api::namespaced(state.client.clone(), namespace);
    let mut task_labels = BTreeMap::new();
    task_labels.insert(labels::WEBHOOK_TRIGGER.to_string(), trigger.name_any());
    if let Some(rule) = rule {
        task_labels.insert(labels::WEBHOOK_RULE.to_string(), rule.to_string());
    }
    if let Some(agent_ref) = &spec.agent_ref {
        task_labels.insert(labels::AGENT.to_string(), agent_ref.name.clone());
    }
    let task = Task {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(task_labels),
            owner_references: trigger.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec,
        status: None,
    };
    tasks
        .create(&PostParams::default(), &task)
        .await
        .map_err(|e| DispatchError::Store(e.into()))?;
    info!("webhook created task {namespace}/{name}");
    Ok(())
}

async fn create_workflow_run(
    state: &AppState,
    trigger: &WebhookTrigger,
    namespace: &str,
    name: &str,
    rule: &str,
    spec: WorkflowRunSpec,
) -> Result<(), DispatchError> {
    let runs: Api<WorkflowRun> = Api::namespaced(state.client.clone(), namespace);
    let mut run_labels = BTreeMap::new();
    run_labels.insert(labels::WEBHOOK_TRIGGER.to_string(), trigger.name_any());
    run_labels.insert(labels::WEBHOOK_RULE.to_string(), rule.to_string());
    let run = WorkflowRun {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(run_labels),
            owner_references: trigger.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec,
        status: None,
    };
    runs.create(&PostParams::default(), &run)
        .await
        .map_err(|e| DispatchError::Store(e.into()))?;
    info!("webhook created workflow run {namespace}/{name}");
    Ok(())
}

/// Refresh trigger status: bump counters, prune dead active resources and
/// append the newly created ones.
async fn record_trigger_status(
    state: &AppState,
    trigger: &WebhookTrigger,
    namespace: &str,
    created: &[ActiveResource],
    rule_hits: &[String],
) -> Result<(), Error> {
    let triggers: Api<WebhookTrigger> = Api::namespaced(state.client.clone(), namespace);
    let status = trigger.status.clone().unwrap_or_default();

    let mut active: Vec<ActiveResource> = Vec::new();
    for resource in status.active_resources.clone().unwrap_or_default() {
        if is_live(state, &resource).await? {
            active.push(resource);
        }
    }
    active.extend(created.iter().cloned());

    let mut rule_triggered = status.rule_triggered.clone().unwrap_or_default();
    for rule in rule_hits {
        *rule_triggered.entry(rule.clone()).or_insert(0) += created
            .iter()
            .filter(|r| r.rule.as_deref() == Some(rule.as_str()))
            .count() as u64;
    }

    let patch = json!({
        "status": {
            "totalTriggered": status.total_triggered + created.len() as u64,
            "ruleTriggered": rule_triggered,
            "activeResources": active,
        }
    });
    triggers
        .patch_status(&trigger.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Liveness/readiness for the ingress itself
pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness: verify triggers are listable at all.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let triggers: Api<WebhookTrigger> = Api::all(state.client.clone());
    match triggers.list(&ListParams::default().limit(1)).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unready", "error": e.to_string()})),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_are_lowercased() {
        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Event", HeaderValue::from_static("pull_request"));
        headers.insert("authorization", HeaderValue::from_static("Bearer x"));
        let map = lowercased_headers(&headers);
        assert_eq!(map.get("x-github-event").unwrap(), "pull_request");
        assert!(map.contains_key("authorization"));
    }

    #[test]
    fn child_names_carry_trigger_rule_and_suffix() {
        let name = child_name("gh", Some("review"));
        assert!(name.starts_with("gh-review-"));
        assert_eq!(name.len(), "gh-review-".len() + 5);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));

        let plain = child_name("gh", None);
        assert!(plain.starts_with("gh-"));
    }

    #[test]
    fn suffixes_differ_across_calls() {
        // Collisions in 5 alphanumeric chars across two draws are
        // vanishingly unlikely; a stable equality would mean no randomness.
        assert_ne!(random_suffix(), random_suffix());
    }

    #[test]
    fn rendered_task_spec_only_touches_description() {
        let template = TaskSpec {
            description: Some("Review PR #{{.pull_request.number}}".to_string()),
            ..Default::default()
        };
        let data = json!({"body": {"pull_request": {"number": 7}}, "headers": {}});
        let spec = rendered_task_spec(&template, &data).unwrap();
        assert_eq!(spec.description.as_deref(), Some("Review PR #7"));

        let no_description = TaskSpec::default();
        let spec = rendered_task_spec(&no_description, &data).unwrap();
        assert!(spec.description.is_none());
    }
}
