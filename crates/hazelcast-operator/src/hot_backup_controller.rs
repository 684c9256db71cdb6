use std::sync::Arc;

use futures::FutureExt;
use kube::{
    Api, Client, ResourceExt,
    runtime::controller::{Action, Controller},
};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::{
    apply::{ObjectKey, ObjectStore, set_annotation},
    coordinator::trigger_hot_backup,
    crds::{
        hazelcast::{Hazelcast, Phase},
        hot_backup::HotBackup,
    },
    error::ReconcileError,
    finalizer::{add_finalizer, has_finalizer, remove_finalizer, teardown_backup},
    naming,
    rest_client::{ClientRegistry, ClusterStateClient},
    scheduler::{BackupJob, BackupScheduler},
    validation::validate_hot_backup_spec,
};

const REQUEUE_NOT_READY: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Ctx {
    pub client: Client,
    pub clients: Arc<ClientRegistry>,
    pub scheduler: Arc<dyn BackupScheduler>,
}

pub fn controller(client: Client) -> Controller<HotBackup> {
    let api: Api<HotBackup> = Api::all(client);
    Controller::new(api, Default::default()).shutdown_on_signal()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A recurring trigger was registered (or replaced).
    Scheduled,
    /// A one-off backup ran to completion.
    Triggered,
    /// The cluster is not running yet; nothing was done.
    Deferred,
}

/// Whether `hb`'s spec is the one recorded by the last successful pass.
pub fn already_applied(hb: &HotBackup) -> Result<bool, ReconcileError> {
    let spec = serde_json::to_string(&hb.spec)?;
    Ok(hb
        .annotations()
        .get(naming::LAST_SUCCESSFUL_SPEC_ANNOTATION)
        .is_some_and(|last| *last == spec))
}

/// Schedules or runs the backup `hb` asks for against `cluster`.
pub async fn run_backup<S>(
    key: ObjectKey,
    hb: &HotBackup,
    cluster: &Hazelcast,
    client: Arc<dyn ClusterStateClient>,
    scheduler: &S,
) -> Result<BackupOutcome, ReconcileError>
where
    S: BackupScheduler + ?Sized,
{
    let phase = cluster.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if phase != Phase::Running {
        info!(%key, cluster = %cluster.name_any(), ?phase, "Hazelcast is not running, hot backup deferred");
        return Ok(BackupOutcome::Deferred);
    }
    validate_hot_backup_spec(hb, cluster)?;

    if hb.spec.schedule.is_empty() {
        if scheduler.unschedule(&key) {
            info!(%key, "schedule cleared, recurring backup stopped");
        }
        trigger_hot_backup(client.as_ref()).await?;
        return Ok(BackupOutcome::Triggered);
    }

    let job_key = key.clone();
    let schedule = hb.spec.schedule.clone();
    let job: BackupJob = Arc::new(move || {
        let client = client.clone();
        let key = job_key.clone();
        let schedule = schedule.clone();
        async move {
            info!(%key, %schedule, "running scheduled hot backup");
            if let Err(e) = trigger_hot_backup(client.as_ref()).await {
                error!(%key, error = %e, "scheduled hot backup failed");
            }
        }
        .boxed()
    });
    scheduler.schedule(key, &hb.spec.schedule, job)?;
    Ok(BackupOutcome::Scheduled)
}

pub async fn reconcile(hb: Arc<HotBackup>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let name = hb.name_any();
    let ns = hb
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("HotBackup {name} has no namespace"))?;
    let backups: Api<HotBackup> = Api::namespaced(ctx.client.clone(), &ns);
    let clusters: Api<Hazelcast> = Api::namespaced(ctx.client.clone(), &ns);
    apply_hot_backup(
        &backups,
        &clusters,
        &hb,
        ctx.scheduler.as_ref(),
        |cluster: &Hazelcast| ctx.clients.client_for(cluster),
    )
    .await
}

/// One reconciliation pass of `hb` against the given stores.
pub async fn apply_hot_backup<B, C, S, F>(
    backups: &B,
    clusters: &C,
    hb: &HotBackup,
    scheduler: &S,
    client_for: F,
) -> Result<Action, ReconcileError>
where
    B: ObjectStore<HotBackup> + ?Sized,
    C: ObjectStore<Hazelcast> + ?Sized,
    S: BackupScheduler + ?Sized,
    F: FnOnce(&Hazelcast) -> Arc<dyn ClusterStateClient>,
{
    let key = ObjectKey::of(hb);

    if hb.metadata.deletion_timestamp.is_some() {
        if has_finalizer(hb) {
            teardown_backup(scheduler, &key);
            remove_finalizer(backups, hb).await?;
            info!(%key, "HotBackup finalized");
        }
        return Ok(Action::await_change());
    }

    add_finalizer(backups, hb).await?;

    if already_applied(hb)? {
        info!(%key, "HotBackup was already applied");
        return Ok(Action::await_change());
    }

    let Some(cluster) = clusters.get_object(&hb.spec.hazelcast_resource_name).await? else {
        warn!(%key, cluster = %hb.spec.hazelcast_resource_name, "Hazelcast resource not found");
        return Ok(Action::requeue(REQUEUE_NOT_READY));
    };
    let client = client_for(&cluster);

    match run_backup(key.clone(), hb, &cluster, client, scheduler).await? {
        BackupOutcome::Deferred => Ok(Action::requeue(REQUEUE_NOT_READY)),
        outcome => {
            let spec = serde_json::to_string(&hb.spec)?;
            let recorded =
                set_annotation(backups, &key.name, naming::LAST_SUCCESSFUL_SPEC_ANNOTATION, spec).await;
            match recorded {
                Ok(res) => info!(%key, ?outcome, result = %res, "HotBackup applied"),
                Err(e) => warn!(%key, error = %e, "could not record the applied HotBackup spec"),
            }
            Ok(Action::await_change())
        }
    }
}

pub fn error_policy(hb: Arc<HotBackup>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    error!(name = %hb.name_any(), error = ?err, "reconcile failed");
    if err.is_retryable() {
        Action::requeue(Duration::from_secs(60))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}
