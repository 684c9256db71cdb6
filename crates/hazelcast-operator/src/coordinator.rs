//! Operating-mode transitions of a live cluster.
//!
//! Every state-changing command is preceded by a fresh `get_state` call. Member
//! states in the resource status come from an earlier pass and may be stale.

use tracing::{error, info};

use crate::crds::hazelcast::{Hazelcast, Phase, RestoreState};
use crate::error::ReconcileError;
use crate::naming;
use crate::rest_client::{ClusterState, ClusterStateClient};

/// Passive, backup, then back to active whatever the backup outcome.
///
/// A failure to reactivate is logged and never replaces the backup error.
pub async fn trigger_hot_backup<C>(client: &C) -> Result<(), ReconcileError>
where
    C: ClusterStateClient + ?Sized,
{
    if let Err(e) = client.change_state(ClusterState::Passive).await {
        error!(error = %e, "could not change the cluster state to PASSIVE, hot backup not started");
        return Err(e);
    }
    let backup = client.hot_backup().await;
    if let Err(e) = client.change_state(ClusterState::Active).await {
        error!(error = %e, "could not change the cluster state back to ACTIVE");
    }
    match backup {
        Ok(()) => {
            info!("hot backup triggered");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "hot backup failed");
            Err(e)
        }
    }
}

/// Force-starts a passive cluster whose members crash-loop during hot restart.
///
/// Returns whether a force start was issued.
pub async fn check_force_start<C>(h: &Hazelcast, client: &C) -> Result<bool, ReconcileError>
where
    C: ClusterStateClient + ?Sized,
{
    let Some(persistence) = h.spec.persistence.as_ref().filter(|p| p.is_enabled()) else {
        return Ok(false);
    };
    if !persistence.auto_force_start {
        return Ok(false);
    }
    let members = h.status.as_ref().map(|s| s.members.as_slice()).unwrap_or_default();
    let Some(crashing) = members
        .iter()
        .find(|m| !m.ready && m.reason.as_deref() == Some(naming::CRASH_LOOP_BACK_OFF))
    else {
        return Ok(false);
    };
    info!(
        pod = %crashing.pod_name,
        restarts = crashing.restart_count,
        message = crashing.message.as_deref().unwrap_or_default(),
        "member is crash-looping"
    );
    match client.get_state().await {
        Ok(ClusterState::Passive) => {}
        Ok(state) => {
            info!(%state, "force start only applies to a PASSIVE cluster, skipping");
            return Ok(false);
        }
        Err(ReconcileError::UnexpectedClusterState(state)) => {
            info!(%state, "force start only applies to a PASSIVE cluster, skipping");
            return Ok(false);
        }
        Err(e) => return Err(e),
    }
    client.force_start().await?;
    info!("force start issued");
    Ok(true)
}

/// Reactivates the cluster once a restore has finished and every member is passive.
///
/// Any unmet precondition is a silent no-op. Returns whether the cluster was reactivated.
pub async fn ensure_cluster_active<C>(h: &Hazelcast, client: &C) -> Result<bool, ReconcileError>
where
    C: ClusterStateClient + ?Sized,
{
    if h.spec.restore().is_none() {
        return Ok(false);
    }
    let Some(status) = h.status.as_ref() else {
        return Ok(false);
    };
    if status.restore.as_ref().map(|r| r.state) != Some(RestoreState::Succeeded)
        || status.phase == Phase::Pending
    {
        return Ok(false);
    }
    let all_passive = status
        .members
        .iter()
        .all(|m| m.state.as_deref() == Some(ClusterState::Passive.as_str()));
    if !all_passive {
        return Ok(false);
    }
    match client.get_state().await {
        Ok(ClusterState::Passive) => {}
        Ok(_) | Err(ReconcileError::UnexpectedClusterState(_)) => return Ok(false),
        Err(e) => return Err(e),
    }
    client.change_state(ClusterState::Active).await?;
    info!("restore finished, cluster changed to ACTIVE");
    Ok(true)
}
