use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Controller;
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

pub mod cleanup;
pub mod config;
pub mod cron;
pub mod events;
pub mod task;
pub mod types;
pub mod workflow;

// Re-export commonly used items
pub use config::OperatorConfig;
pub use task::reconcile_task;
pub use types::{Context, Error, Result};
pub use workflow::reconcile_workflow_run;

use crate::crds::{CronTask, CronWorkflow, Task, WorkflowRun};

/// Main entry point for the reconciliation controllers.
///
/// Runs the Task, WorkflowRun, CronTask and CronWorkflow controllers plus
/// the retention sweep until shutdown. The webhook ingress is started
/// separately by the binary.
#[instrument(skip(client, config))]
pub async fn run_controllers(client: Client, config: Arc<OperatorConfig>) -> Result<()> {
    info!("Starting kubetask controllers");

    let context = Arc::new(Context::new(client.clone(), config));

    let sweep_handle = tokio::spawn(cleanup::run_retention_sweep(context.clone()));

    let task_handle = tokio::spawn({
        let client = client.clone();
        let context = context.clone();
        async move { run_task_controller(client, context).await }
    });

    let workflow_handle = tokio::spawn({
        let client = client.clone();
        let context = context.clone();
        async move { run_workflow_run_controller(client, context).await }
    });

    let cron_task_handle = tokio::spawn({
        let client = client.clone();
        let context = context.clone();
        async move { run_cron_task_controller(client, context).await }
    });

    let cron_workflow_handle = tokio::spawn({
        let client = client.clone();
        let context = context.clone();
        async move { run_cron_workflow_controller(client, context).await }
    });

    debug!("All controllers started, waiting for completion...");

    match tokio::try_join!(
        task_handle,
        workflow_handle,
        cron_task_handle,
        cron_workflow_handle,
    ) {
        Ok((task_result, workflow_result, cron_task_result, cron_workflow_result)) => {
            for (name, result) in [
                ("Task", task_result),
                ("WorkflowRun", workflow_result),
                ("CronTask", cron_task_result),
                ("CronWorkflow", cron_workflow_result),
            ] {
                if let Err(e) = result {
                    error!("{name} controller failed: {e:?}");
                }
            }
        }
        Err(e) => {
            error!("Controller task join error: {e:?}");
        }
    }

    sweep_handle.abort();
    info!("Controllers shutting down");
    Ok(())
}

/// Run the Task controller: watches Tasks cluster-wide and the pods they
/// own.
async fn run_task_controller(client: Client, context: Arc<Context>) -> Result<()> {
    info!("Starting Task controller");

    let tasks: Api<Task> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);
    let watcher_config = Config::default().any_semantic();

    Controller::new(tasks, watcher_config.clone())
        .owns(pods, watcher_config)
        .shutdown_on_signal()
        .run(reconcile_task, task::error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok(obj) => debug!(resource = ?obj, "Task reconciliation successful"),
                Err(e) => error!(error = ?e, "Task reconciliation error"),
            }
        })
        .await;

    info!("Task controller shutting down");
    Ok(())
}

/// Run the WorkflowRun controller: watches runs and the Tasks they own.
async fn run_workflow_run_controller(client: Client, context: Arc<Context>) -> Result<()> {
    info!("Starting WorkflowRun controller");

    let runs: Api<WorkflowRun> = Api::all(client.clone());
    let tasks: Api<Task> = Api::all(client);
    let watcher_config = Config::default().any_semantic();

    Controller::new(runs, watcher_config.clone())
        .owns(tasks, watcher_config)
        .shutdown_on_signal()
        .run(reconcile_workflow_run, workflow::error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok(obj) => debug!(resource = ?obj, "WorkflowRun reconciliation successful"),
                Err(e) => error!(error = ?e, "WorkflowRun reconciliation error"),
            }
        })
        .await;

    info!("WorkflowRun controller shutting down");
    Ok(())
}

/// Run the CronTask controller.
async fn run_cron_task_controller(client: Client, context: Arc<Context>) -> Result<()> {
    info!("Starting CronTask controller");

    let crons: Api<CronTask> = Api::all(client.clone());
    let tasks: Api<Task> = Api::all(client);
    let watcher_config = Config::default().any_semantic();

    Controller::new(crons, watcher_config.clone())
        .owns(tasks, watcher_config)
        .shutdown_on_signal()
        .run(
            cron::reconcile_cron_task,
            cron::error_policy_cron_task,
            context,
        )
        .for_each(|result| async move {
            match result {
                Ok(obj) => debug!(resource = ?obj, "CronTask reconciliation successful"),
                Err(e) => error!(error = ?e, "CronTask reconciliation error"),
            }
        })
        .await;

    info!("CronTask controller shutting down");
    Ok(())
}

/// Run the CronWorkflow controller.
async fn run_cron_workflow_controller(client: Client, context: Arc<Context>) -> Result<()> {
    info!("Starting CronWorkflow controller");

    let crons: Api<CronWorkflow> = Api::all(client.clone());
    let runs: Api<WorkflowRun> = Api::all(client);
    let watcher_config = Config::default().any_semantic();

    Controller::new(crons, watcher_config.clone())
        .owns(runs, watcher_config)
        .shutdown_on_signal()
        .run(
            cron::reconcile_cron_workflow,
            cron::error_policy_cron_workflow,
            context,
        )
        .for_each(|result| async move {
            match result {
                Ok(obj) => debug!(resource = ?obj, "CronWorkflow reconciliation successful"),
                Err(e) => error!(error = ?e, "CronWorkflow reconciliation error"),
            }
        })
        .await;

    info!("CronWorkflow controller shutting down");
    Ok(())
}
