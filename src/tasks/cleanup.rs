//! TTL reaping and retention of finished tasks
//!
//! The reaper is the sole deleter of finished Tasks. A per-task check runs
//! at the top of every Task reconcile (requeueing until the deadline), and
//! a periodic sweep enforces the per-namespace retention cap and catches
//! tasks whose requeue was lost.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crds::kubetask_config::CONFIG_NAME;
use crate::crds::{KubeTaskConfig, KubeTaskConfigSpec, Task};
use crate::tasks::types::{annotations, is_not_found, Context, Result};

/// True when TTL cleanup must skip the resource.
#[must_use]
pub fn is_preserved(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(annotations::PRESERVE))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Per-resource TTL override in seconds, when annotated.
#[must_use]
pub fn ttl_override_seconds(meta: &ObjectMeta) -> Option<u64> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(annotations::TTL_SECONDS))
        .and_then(|raw| raw.trim().parse::<u64>().ok())
}

/// Effective TTL for a task: annotation override, then cluster config,
/// then the operator default. 0 disables deletion.
#[must_use]
pub fn effective_ttl_seconds(
    meta: &ObjectMeta,
    cluster: Option<&KubeTaskConfigSpec>,
    fallback_seconds: u64,
) -> u64 {
    if let Some(override_secs) = ttl_override_seconds(meta) {
        return override_secs;
    }
    match cluster {
        Some(spec) => spec.ttl_seconds(),
        None => fallback_seconds,
    }
}

/// When the task is finished and its TTL has elapsed, delete it and stop
/// reconciling. Returns the action to take, or `None` when the task is not
/// the reaper's business yet.
pub async fn try_task_cleanup_after_ttl(
    task: &Arc<Task>,
    ctx: &Context,
) -> Result<Option<Action>> {
    if !ctx.config.cleanup.enabled {
        return Ok(None);
    }
    if is_preserved(&task.metadata) {
        return Ok(None);
    }
    let Some(status) = &task.status else {
        return Ok(None);
    };
    if !status.phase.is_terminal() {
        return Ok(None);
    }
    let Some(completion_time) = status
        .completion_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
    else {
        return Ok(None);
    };

    let cluster = load_cluster_config(ctx).await;
    let ttl = effective_ttl_seconds(
        &task.metadata,
        cluster.as_ref(),
        ctx.config.cleanup.default_ttl_seconds,
    );
    if ttl == 0 {
        return Ok(None);
    }

    let deadline = completion_time + ChronoDuration::seconds(ttl as i64);
    let now = Utc::now();
    if deadline > now {
        let delay = (deadline - now)
            .to_std()
            .unwrap_or(Duration::from_secs(0));
        return Ok(Some(Action::requeue(delay)));
    }

    let namespace = task.namespace().unwrap_or_default();
    info!(
        task = %task.name_any(),
        namespace = %namespace,
        "TTL expired for finished task, deleting"
    );
    delete_task(ctx, &namespace, &task.name_any()).await?;
    Ok(Some(Action::await_change()))
}

/// Fetch the cluster-level config singleton; absence means defaults.
pub async fn load_cluster_config(ctx: &Context) -> Option<KubeTaskConfigSpec> {
    let api: Api<KubeTaskConfig> = Api::all(ctx.client.clone());
    match api.get_opt(CONFIG_NAME).await {
        Ok(config) => config.map(|c| c.spec),
        Err(e) => {
            debug!("could not read KubeTaskConfig: {e}");
            None
        }
    }
}

async fn delete_task(ctx: &Context, namespace: &str, name: &str) -> Result<()> {
    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), namespace);
    match tasks.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Periodic sweep: enforce the per-namespace retention cap and reap
/// overdue tasks whose individual requeue never fired.
pub async fn run_retention_sweep(ctx: Arc<Context>) {
    let interval = Duration::from_secs(ctx.config.cleanup.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !ctx.config.cleanup.enabled {
            continue;
        }
        if let Err(e) = sweep_once(&ctx).await {
            warn!("retention sweep failed: {e}");
        }
    }
}

async fn sweep_once(ctx: &Context) -> Result<()> {
    let cluster = load_cluster_config(ctx).await;
    let cap = cluster.as_ref().and_then(|c| c.max_finished_tasks);

    let tasks: Api<Task> = Api::all(ctx.client.clone());
    let all = tasks.list(&ListParams::default()).await?;

    // Finished tasks, grouped per namespace, newest first by completionTime
    let mut finished: BTreeMap<String, Vec<(DateTime<Utc>, String)>> = BTreeMap::new();
    let now = Utc::now();
    for task in &all.items {
        let Some(status) = &task.status else { continue };
        if !status.phase.is_terminal() {
            continue;
        }
        if is_preserved(&task.metadata) {
            continue;
        }
        let Some(completed) = status
            .completion_time
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
        else {
            continue;
        };
        let namespace = task.namespace().unwrap_or_default();
        let name = task.name_any();

        let ttl = effective_ttl_seconds(
            &task.metadata,
            cluster.as_ref(),
            ctx.config.cleanup.default_ttl_seconds,
        );
        if ttl > 0 && completed + ChronoDuration::seconds(ttl as i64) <= now {
            info!(task = %name, namespace = %namespace, "sweep: TTL expired, deleting");
            delete_task(ctx, &namespace, &name).await?;
            continue;
        }

        finished.entry(namespace).or_default().push((completed, name));
    }

    if let Some(cap) = cap {
        for (namespace, mut entries) in finished {
            entries.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, name) in entries.into_iter().skip(cap as usize) {
                info!(task = %name, namespace = %namespace, "sweep: over retention cap, deleting");
                delete_task(ctx, &namespace, &name).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn meta_with(annotations_pairs: &[(&str, &str)]) -> ObjectMeta {
        let mut map = Map::new();
        for (k, v) in annotations_pairs {
            map.insert((*k).to_string(), (*v).to_string());
        }
        ObjectMeta {
            annotations: Some(map),
            ..Default::default()
        }
    }

    #[test]
    fn preserve_annotation() {
        assert!(is_preserved(&meta_with(&[(annotations::PRESERVE, "true")])));
        assert!(is_preserved(&meta_with(&[(annotations::PRESERVE, "True")])));
        assert!(!is_preserved(&meta_with(&[(annotations::PRESERVE, "no")])));
        assert!(!is_preserved(&ObjectMeta::default()));
    }

    #[test]
    fn ttl_override_parsing() {
        assert_eq!(
            ttl_override_seconds(&meta_with(&[(annotations::TTL_SECONDS, "3600")])),
            Some(3600)
        );
        assert_eq!(
            ttl_override_seconds(&meta_with(&[(annotations::TTL_SECONDS, " 60 ")])),
            Some(60)
        );
        assert_eq!(
            ttl_override_seconds(&meta_with(&[(annotations::TTL_SECONDS, "soon")])),
            None
        );
    }

    #[test]
    fn effective_ttl_precedence() {
        let meta = meta_with(&[(annotations::TTL_SECONDS, "10")]);
        let cluster = KubeTaskConfigSpec {
            ttl_seconds_after_finished: Some(100),
            max_finished_tasks: None,
        };
        // Annotation beats cluster config beats fallback
        assert_eq!(effective_ttl_seconds(&meta, Some(&cluster), 1000), 10);
        assert_eq!(
            effective_ttl_seconds(&ObjectMeta::default(), Some(&cluster), 1000),
            100
        );
        assert_eq!(effective_ttl_seconds(&ObjectMeta::default(), None, 1000), 1000);
    }
}
