use futures::StreamExt;
use hazelcast_operator::{
    hazelcast_controller as hzc, hot_backup_controller as hbc, rest_client::ClientRegistry,
    scheduler::CronScheduler, settings::OperatorSettings,
};
use kube::Client;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let settings = OperatorSettings::from_env()?;
    info!(
        namespace = %settings.operator_namespace,
        platform = ?settings.platform,
        "hazelcast-operator starting up"
    );

    let client = Client::try_default().await?;
    let clients = Arc::new(ClientRegistry::new(settings.cluster_api_timeout)?);
    let scheduler = Arc::new(CronScheduler::new());
    let cron = scheduler.clone().start(settings.cron_tick);

    // Hazelcast controller
    let hz_ctx = Arc::new(hzc::Ctx {
        client: client.clone(),
        settings: settings.clone(),
        clients: clients.clone(),
    });
    let hz_controller = hzc::controller(client.clone())
        .run(hzc::reconcile, hzc::error_policy, hz_ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "hazelcast reconcile error");
            }
        });

    // HotBackup controller
    let hb_ctx = Arc::new(hbc::Ctx {
        client: client.clone(),
        clients,
        scheduler,
    });
    let hb_controller = hbc::controller(client)
        .run(hbc::reconcile, hbc::error_policy, hb_ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "hot backup reconcile error");
            }
        });

    tokio::select! {
        _ = hz_controller => {},
        _ = hb_controller => {},
        _ = tokio::signal::ctrl_c() => { info!("shutdown signal received"); }
    }
    cron.abort();
    Ok(())
}
