use std::sync::Arc;

use futures::future::join_all;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher,
    },
};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    apply::{ObjectStore, OperationResult, create_or_update, delete_if_exists, set_annotation},
    coordinator::{check_force_start, ensure_cluster_active},
    crds::{
        hazelcast::{Hazelcast, HazelcastMemberStatus, HazelcastStatus, Phase},
        map::Map,
    },
    error::ReconcileError,
    finalizer::{add_finalizer, has_finalizer, remove_finalizer, teardown_cluster},
    naming, observe,
    resources::{
        config_map::config_map,
        labels,
        rbac::{cluster_role, cluster_role_binding, service_account},
        service::{
            ConvergedTopology, discovery_service, service_per_pod_name, services_per_pod,
            stale_service_indices, sync_discovery_service, sync_service_per_pod,
        },
        statefulset::{build_statefulset, sync_statefulset},
    },
    rest_client::ClientRegistry,
    settings::OperatorSettings,
    validation::validate_spec,
};

const REQUEUE_PENDING: Duration = Duration::from_secs(10);
const REQUEUE_RUNNING: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Ctx {
    pub client: Client,
    pub settings: OperatorSettings,
    pub clients: Arc<ClientRegistry>,
}

pub fn controller(client: Client) -> Controller<Hazelcast> {
    let api: Api<Hazelcast> = Api::all(client.clone());
    let managed = watcher::Config::default().labels(&format!(
        "{}={}",
        naming::APPLICATION_MANAGED_BY_LABEL,
        naming::OPERATOR_NAME
    ));
    Controller::new(api, Default::default())
        .owns(Api::<StatefulSet>::all(client.clone()), Default::default())
        .owns(Api::<Service>::all(client.clone()), Default::default())
        .owns(Api::<ConfigMap>::all(client.clone()), Default::default())
        .watches(Api::<Pod>::all(client.clone()), managed, |pod| {
            let ns = pod.namespace()?;
            let instance = pod
                .labels()
                .get(naming::APPLICATION_INSTANCE_NAME_LABEL)?
                .clone();
            Some(ObjectRef::new(&instance).within(&ns))
        })
        .watches(Api::<Map>::all(client), Default::default(), |map| {
            let ns = map.namespace()?;
            Some(ObjectRef::new(&map.spec.hazelcast_resource_name).within(&ns))
        })
        .shutdown_on_signal()
}

pub async fn reconcile(h: Arc<Hazelcast>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let name = h.name_any();
    let ns = h
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("Hazelcast {name} has no namespace"))?;
    let api: Api<Hazelcast> = Api::namespaced(ctx.client.clone(), &ns);

    if h.metadata.deletion_timestamp.is_some() {
        if !has_finalizer(h.as_ref()) {
            return Ok(Action::await_change());
        }
        patch_status(&api, &name, serde_json::json!({ "phase": Phase::Terminating })).await?;
        teardown_cluster(
            &Api::<ClusterRole>::all(ctx.client.clone()),
            &Api::<ClusterRoleBinding>::all(ctx.client.clone()),
            &ctx.clients,
            &h,
        )
        .await?;
        remove_finalizer(&api, h.as_ref()).await?;
        info!(%name, namespace = %ns, "Hazelcast finalized");
        return Ok(Action::await_change());
    }

    add_finalizer(&api, h.as_ref()).await?;

    if let Err(e) = validate_spec(&h) {
        patch_status(
            &api,
            &name,
            serde_json::json!({ "phase": Phase::Pending, "message": e.to_string() }),
        )
        .await?;
        return Err(e);
    }

    apply_rbac(&ctx, &h, &ns).await?;
    let per_pod = apply_services(
        &Api::<Service>::namespaced(ctx.client.clone(), &ns),
        &Api::<StatefulSet>::namespaced(ctx.client.clone(), &ns),
        &h,
    )
    .await?;

    if !observe::services_per_pod_ready(&h, &per_pod).await {
        info!(%name, namespace = %ns, "waiting for per-pod services to become reachable");
        patch_status(
            &api,
            &name,
            serde_json::json!({
                "phase": Phase::Pending,
                "message": "waiting for per-pod services to become reachable",
            }),
        )
        .await?;
        return Ok(Action::requeue(REQUEUE_PENDING));
    }

    apply_config_map(&ctx, &h, &ns).await?;
    apply_statefulset(&ctx, &h, &ns).await?;

    let status = observe_cluster(&ctx, &h, &ns, &per_pod).await?;
    patch_status(&api, &name, serde_json::to_value(&status)?).await?;
    debug!(%name, phase = ?status.phase, ready = %status.cluster.ready_members, "status updated");

    let mut observed = (*h).clone();
    observed.status = Some(status.clone());
    let client = ctx.clients.client_for(&observed);
    check_force_start(&observed, client.as_ref()).await?;
    ensure_cluster_active(&observed, client.as_ref()).await?;

    if status.phase == Phase::Running {
        let spec = serde_json::to_string(&h.spec)?;
        let res = set_annotation(&api, &name, naming::LAST_SUCCESSFUL_SPEC_ANNOTATION, spec).await?;
        log_result("Hazelcast annotation", &name, res);
        Ok(Action::requeue(REQUEUE_RUNNING))
    } else {
        Ok(Action::requeue(REQUEUE_PENDING))
    }
}

pub fn error_policy(h: Arc<Hazelcast>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    error!(name = %h.name_any(), error = ?err, "reconcile failed");
    if err.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}

fn log_result(kind: &str, name: &str, res: OperationResult) {
    if res != OperationResult::Unchanged {
        info!(kind, %name, result = %res, "operation result");
    }
}

async fn patch_status(
    api: &Api<Hazelcast>,
    name: &str,
    status: serde_json::Value,
) -> Result<(), ReconcileError> {
    let pp = PatchParams::apply(naming::FIELD_MANAGER);
    let _ = api
        .patch_status(name, &pp, &Patch::Merge(serde_json::json!({ "status": status })))
        .await?;
    Ok(())
}

async fn apply_rbac(ctx: &Ctx, h: &Hazelcast, ns: &str) -> Result<(), ReconcileError> {
    let roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    let desired = cluster_role(h, ctx.settings.platform);
    let name = h.cluster_scoped_name();
    let res = create_or_update(&roles, desired.clone(), move |role| {
        role.rules = desired.rules;
        role.metadata.labels = desired.metadata.labels;
        Ok(())
    })
    .await?;
    log_result("ClusterRole", &name, res);

    let accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ns);
    let res = create_or_update(&accounts, service_account(h), |sa| {
        sa.metadata.labels = Some(labels(h));
        Ok(())
    })
    .await?;
    log_result("ServiceAccount", &h.name_any(), res);

    let bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    let desired = cluster_role_binding(h);
    let res = create_or_update(&bindings, desired.clone(), move |crb| {
        crb.subjects = desired.subjects;
        crb.metadata.labels = desired.metadata.labels;
        Ok(())
    })
    .await?;
    log_result("ClusterRoleBinding", &name, res);
    Ok(())
}

/// Applies the discovery and per-pod services and removes per-pod services left
/// over from a larger topology. Returns the current per-pod services, `None`
/// for any that could not be read back.
async fn apply_services<S, T>(
    services: &S,
    statefulsets: &T,
    h: &Hazelcast,
) -> Result<Vec<Option<Service>>, ReconcileError>
where
    S: ObjectStore<Service> + ?Sized,
    T: ObjectStore<StatefulSet> + ?Sized,
{
    let res = create_or_update(services, discovery_service(h), |svc| {
        sync_discovery_service(svc, h);
        Ok(())
    })
    .await?;
    log_result("Service", &h.name_any(), res);

    let desired_per_pod = services_per_pod(h);
    for desired in &desired_per_pod {
        let name = desired.name_any();
        let res = create_or_update(services, desired.clone(), |svc| {
            sync_service_per_pod(svc, desired);
            Ok(())
        })
        .await?;
        log_result("Service", &name, res);
    }

    let previous = statefulsets
        .get_object(&h.name_any())
        .await?
        .as_ref()
        .and_then(ConvergedTopology::read)
        .unwrap_or_default();
    for i in stale_service_indices(previous, ConvergedTopology::desired(h)) {
        let name = service_per_pod_name(i, h);
        if delete_if_exists::<Service, _>(services, &name).await? {
            info!(%name, namespace = ?h.namespace(), "removed per-pod service after scale-down");
        }
    }

    let mut current = Vec::with_capacity(desired_per_pod.len());
    for desired in &desired_per_pod {
        current.push(services.get_object(&desired.name_any()).await?);
    }
    Ok(current)
}

async fn apply_config_map(ctx: &Ctx, h: &Hazelcast, ns: &str) -> Result<(), ReconcileError> {
    let name = h.name_any();
    let maps: Vec<Map> = Api::<Map>::namespaced(ctx.client.clone(), ns)
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|m| m.spec.hazelcast_resource_name == name)
        .collect();
    let desired = config_map(h, &maps)?;
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
    let res = create_or_update(&config_maps, desired.clone(), move |cm| {
        cm.data = desired.data;
        cm.metadata.labels = desired.metadata.labels;
        Ok(())
    })
    .await?;
    log_result("ConfigMap", &name, res);
    Ok(())
}

async fn apply_statefulset(ctx: &Ctx, h: &Hazelcast, ns: &str) -> Result<(), ReconcileError> {
    let statefulsets: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), ns);
    let desired = build_statefulset(h, &ctx.settings)?;
    let settings = &ctx.settings;
    let res = create_or_update(&statefulsets, desired, |sts| {
        sync_statefulset(sts, h, settings)
    })
    .await?;
    log_result("StatefulSet", &h.name_any(), res);
    Ok(())
}

fn label_selector(h: &Hazelcast) -> String {
    labels(h)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

async fn observe_cluster(
    ctx: &Ctx,
    h: &Hazelcast,
    ns: &str,
    per_pod: &[Option<Service>],
) -> Result<HazelcastStatus, ReconcileError> {
    let pods = Api::<Pod>::namespaced(ctx.client.clone(), ns)
        .list(&ListParams::default().labels(&label_selector(h)))
        .await?
        .items;
    let members = join_all(
        observe::member_statuses(&pods)
            .into_iter()
            .map(|member| with_member_state(&ctx.clients, h, member)),
    )
    .await;

    let discovery = Api::<Service>::namespaced(ctx.client.clone(), ns)
        .get_opt(&h.name_any())
        .await?;
    let per_pod: Vec<Service> = per_pod.iter().flatten().cloned().collect();
    let addresses = observe::external_addresses(h, discovery.as_ref(), &per_pod, &pods);
    Ok(observe::cluster_status(h, members, &pods, addresses, None))
}

/// Fills the cluster state as seen by a ready member. Unreachable members keep `None`.
async fn with_member_state(
    clients: &ClientRegistry,
    h: &Hazelcast,
    mut member: HazelcastMemberStatus,
) -> HazelcastMemberStatus {
    let Some(ip) = member.ip.clone().filter(|_| member.ready) else {
        return member;
    };
    match clients.member_client(h, &ip).get_state().await {
        Ok(state) => member.state = Some(state.as_str().to_string()),
        Err(e) => warn!(pod = %member.pod_name, error = %e, "could not read member cluster state"),
    }
    member
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::testing::MemoryStore;
    use crate::resources::fixtures::hazelcast;

    fn smart(size: i32) -> Hazelcast {
        hazelcast(serde_json::json!({
            "clusterSize": size,
            "exposeExternally": {"type": "Smart", "memberAccess": "LoadBalancer"}
        }))
    }

    #[tokio::test]
    async fn scale_down_removes_only_the_surplus_per_pod_services() {
        let large = smart(5);
        let services = MemoryStore::with(
            std::iter::once(discovery_service(&large)).chain(services_per_pod(&large)),
        );
        let statefulsets =
            MemoryStore::with([build_statefulset(&large, &OperatorSettings::default()).unwrap()]);
        let kept_before = services.get("hz-1").unwrap().metadata.resource_version;

        let current = apply_services(&services, &statefulsets, &smart(2)).await.unwrap();

        assert_eq!(services.names(), ["hz", "hz-0", "hz-1"]);
        assert_eq!(current.len(), 2);
        assert!(current.iter().all(Option::is_some));
        assert_eq!(services.get("hz-1").unwrap().metadata.resource_version, kept_before);
    }

    #[tokio::test]
    async fn first_pass_without_workload_deletes_nothing() {
        let large = smart(3);
        let services = MemoryStore::with(services_per_pod(&large));
        let statefulsets = MemoryStore::<StatefulSet>::new();

        apply_services(&services, &statefulsets, &smart(1)).await.unwrap();

        assert_eq!(services.names(), ["hz", "hz-0", "hz-1", "hz-2"]);
    }
}
