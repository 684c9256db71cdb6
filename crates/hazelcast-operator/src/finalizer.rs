//! Finalizer bookkeeping and the teardown that has to run before a resource goes away.

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::apply::{ObjectKey, ObjectStore, delete_if_exists};
use crate::crds::hazelcast::Hazelcast;
use crate::error::ReconcileError;
use crate::naming::FINALIZER;
use crate::rest_client::ClientRegistry;
use crate::scheduler::BackupScheduler;

pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Adds the finalizer to a live object. Returns whether the object was written.
pub async fn add_finalizer<K, S>(store: &S, obj: &K) -> Result<bool, ReconcileError>
where
    K: Resource + Clone + Send + Sync,
    S: ObjectStore<K> + ?Sized,
{
    if has_finalizer(obj) || obj.meta().deletion_timestamp.is_some() {
        return Ok(false);
    }
    let mut updated = obj.clone();
    updated.finalizers_mut().push(FINALIZER.to_string());
    store.update_object(&updated).await?;
    debug!(name = %obj.name_any(), "finalizer added");
    Ok(true)
}

/// Removes the finalizer so a pending delete can complete. Returns whether the object was written.
pub async fn remove_finalizer<K, S>(store: &S, obj: &K) -> Result<bool, ReconcileError>
where
    K: Resource + Clone + Send + Sync,
    S: ObjectStore<K> + ?Sized,
{
    if !has_finalizer(obj) {
        return Ok(false);
    }
    let mut updated = obj.clone();
    updated.finalizers_mut().retain(|f| f != FINALIZER);
    store.update_object(&updated).await?;
    debug!(name = %obj.name_any(), "finalizer removed");
    Ok(true)
}

/// Deletes the cluster-scoped RBAC objects of `h` and forgets its management client.
///
/// Each step treats an absent object as done, so a retry after a partial failure resumes cleanly.
pub async fn teardown_cluster<R, B>(
    roles: &R,
    bindings: &B,
    clients: &ClientRegistry,
    h: &Hazelcast,
) -> Result<(), ReconcileError>
where
    R: ObjectStore<ClusterRole> + ?Sized,
    B: ObjectStore<ClusterRoleBinding> + ?Sized,
{
    let name = h.cluster_scoped_name();
    if delete_if_exists::<ClusterRoleBinding, _>(bindings, &name).await? {
        info!(%name, "ClusterRoleBinding deleted");
    }
    if delete_if_exists::<ClusterRole, _>(roles, &name).await? {
        info!(%name, "ClusterRole deleted");
    }
    clients.release(&ObjectKey::of(h));
    Ok(())
}

/// Stops the recurring trigger of a HotBackup, if one was registered.
pub fn teardown_backup<S>(scheduler: &S, key: &ObjectKey) -> bool
where
    S: BackupScheduler + ?Sized,
{
    let removed = scheduler.unschedule(key);
    if removed {
        info!(%key, "backup schedule stopped");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::testing::MemoryStore;
    use crate::crds::hot_backup::{HotBackup, HotBackupSpec};
    use crate::resources::fixtures::hazelcast;
    use crate::resources::rbac::{cluster_role, cluster_role_binding};
    use crate::scheduler::CronScheduler;
    use crate::settings::Platform;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::time::Duration;

    fn backup() -> HotBackup {
        let mut hb = HotBackup::new(
            "nightly",
            HotBackupSpec {
                hazelcast_resource_name: "hz".into(),
                schedule: "@daily".into(),
                secret: String::new(),
            },
        );
        hb.metadata.namespace = Some("default".into());
        hb
    }

    #[tokio::test]
    async fn finalizer_added_once_and_removed() {
        let store = MemoryStore::with([backup()]);
        let hb = store.get("nightly").unwrap();
        assert!(add_finalizer(&store, &hb).await.unwrap());

        let hb = store.get("nightly").unwrap();
        assert!(has_finalizer(&hb));
        assert!(!add_finalizer(&store, &hb).await.unwrap());
        assert_eq!(store.updates(), 1);

        assert!(remove_finalizer(&store, &hb).await.unwrap());
        assert!(!has_finalizer(&store.get("nightly").unwrap()));
    }

    #[tokio::test]
    async fn deleting_object_gets_no_finalizer() {
        let mut hb = backup();
        hb.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap();
        let store = MemoryStore::with([hb]);
        let hb = store.get("nightly").unwrap();
        assert!(!add_finalizer(&store, &hb).await.unwrap());
        assert_eq!(store.updates(), 0);
    }

    #[tokio::test]
    async fn cluster_teardown_is_repeatable() {
        let h = hazelcast(serde_json::json!({}));
        let roles = MemoryStore::with([cluster_role(&h, Platform::Kubernetes)]);
        let bindings = MemoryStore::with([cluster_role_binding(&h)]);
        let clients = ClientRegistry::new(Duration::from_secs(1)).unwrap();
        clients.client_for(&h);

        teardown_cluster(&roles, &bindings, &clients, &h).await.unwrap();
        teardown_cluster(&roles, &bindings, &clients, &h).await.unwrap();

        assert!(roles.names().is_empty());
        assert!(bindings.names().is_empty());
        assert!(clients.is_empty());
    }

    #[test]
    fn backup_teardown_forgets_schedule() {
        let scheduler = CronScheduler::new();
        let key = ObjectKey::of(&backup());
        let job: crate::scheduler::BackupJob = Arc::new(|| async {}.boxed());
        scheduler.schedule(key.clone(), "@daily", job).unwrap();

        assert!(teardown_backup(&scheduler, &key));
        assert!(!teardown_backup(&scheduler, &key));
        assert!(!scheduler.is_scheduled(&key));
    }
}
