//! KubeTask operator binary: hosts every reconciliation controller plus the
//! webhook ingress in one process.

use anyhow::Context as _;
use kube::Client;
use kubetask_controller::tasks::{self, OperatorConfig};
use kubetask_controller::webhook;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "/config/config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = OperatorConfig::from_mounted_file(CONFIG_PATH);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    let config = Arc::new(config);

    let client = Client::try_default()
        .await
        .context("building kubernetes client")?;
    info!("Starting kubetask operator");

    let controllers = tokio::spawn({
        let client = client.clone();
        let config = config.clone();
        async move { tasks::run_controllers(client, config).await }
    });
    let ingress = tokio::spawn({
        let client = client.clone();
        let config = config.clone();
        async move { webhook::run_webhook_server(client, config).await }
    });

    match tokio::try_join!(controllers, ingress) {
        Ok((controllers_result, ingress_result)) => {
            if let Err(e) = controllers_result {
                error!("controllers failed: {e:?}");
            }
            if let Err(e) = ingress_result {
                error!("webhook ingress failed: {e:?}");
            }
        }
        Err(e) => error!("task join error: {e:?}"),
    }

    info!("kubetask operator shut down");
    Ok(())
}
