//! Create-or-update of child objects.
//!
//! Every child object the controllers own goes through [`create_or_update`]: the
//! current object is fetched, the mutation runs on it (or on the template when
//! nothing exists yet) and the platform is only written to when the mutated
//! object actually differs. Updates carry the fetched `resourceVersion`, so a
//! concurrent writer surfaces as [`ReconcileError::Conflict`] instead of being
//! overwritten.

use std::fmt::{self, Debug};

use async_trait::async_trait;
use kube::{
    Api, Resource, ResourceExt,
    api::{DeleteParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{error::ReconcileError, naming::FIELD_MANAGER};

/// Namespace + name of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Unchanged,
    Created,
    Updated,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationResult::Unchanged => "unchanged",
            OperationResult::Created => "created",
            OperationResult::Updated => "updated",
        })
    }
}

/// Keyed access to one kind of object, scoped like the `Api` it wraps.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get_object(&self, name: &str) -> Result<Option<K>, ReconcileError>;
    async fn create_object(&self, obj: &K) -> Result<K, ReconcileError>;
    /// Replaces the object; fails with `Conflict` when its resourceVersion is stale.
    async fn update_object(&self, obj: &K) -> Result<K, ReconcileError>;
    /// Returns `false` when there was nothing to delete.
    async fn delete_object(&self, name: &str) -> Result<bool, ReconcileError>;
}

fn conflict<K: Resource<DynamicType = ()>>(name: &str) -> ReconcileError {
    ReconcileError::Conflict {
        kind: K::kind(&()).into_owned(),
        name: name.to_string(),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for Api<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get_object(&self, name: &str) -> Result<Option<K>, ReconcileError> {
        Ok(self.get_opt(name).await?)
    }

    async fn create_object(&self, obj: &K) -> Result<K, ReconcileError> {
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.into()),
            ..Default::default()
        };
        match self.create(&pp, obj).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(conflict::<K>(&obj.name_any())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_object(&self, obj: &K) -> Result<K, ReconcileError> {
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.into()),
            ..Default::default()
        };
        let name = obj.name_any();
        match self.replace(&name, &pp, obj).await {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(conflict::<K>(&name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, name: &str) -> Result<bool, ReconcileError> {
        match self.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fetches `desired`'s namesake, mutates it and writes it back only when it changed.
///
/// When nothing exists yet the mutation runs on `desired` and the result is created.
/// The mutation always runs to completion before anything is written.
pub async fn create_or_update<K, S, F>(
    store: &S,
    mut desired: K,
    mutate: F,
) -> Result<OperationResult, ReconcileError>
where
    K: Resource + Serialize + Send + Sync,
    S: ObjectStore<K> + ?Sized,
    F: FnOnce(&mut K) -> Result<(), ReconcileError> + Send,
{
    let name = desired.name_any();
    match store.get_object(&name).await? {
        None => {
            mutate(&mut desired)?;
            ensure_same_name(&name, &desired)?;
            store.create_object(&desired).await?;
            Ok(OperationResult::Created)
        }
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            mutate(&mut existing)?;
            ensure_same_name(&name, &existing)?;
            if serde_json::to_value(&existing)? == before {
                return Ok(OperationResult::Unchanged);
            }
            store.update_object(&existing).await?;
            Ok(OperationResult::Updated)
        }
    }
}

fn ensure_same_name<K: Resource>(name: &str, obj: &K) -> Result<(), ReconcileError> {
    if obj.name_any() != name {
        return Err(ReconcileError::Anyhow(anyhow::anyhow!(
            "mutation changed object name from {name} to {}",
            obj.name_any()
        )));
    }
    Ok(())
}

/// Deletes `name`, treating an absent object as done.
pub async fn delete_if_exists<K, S>(store: &S, name: &str) -> Result<bool, ReconcileError>
where
    S: ObjectStore<K> + ?Sized,
{
    store.delete_object(name).await
}

/// Sets `key` on the stored object named `name`. A missing object is left alone.
pub async fn set_annotation<K, S>(
    store: &S,
    name: &str,
    key: &str,
    value: String,
) -> Result<OperationResult, ReconcileError>
where
    K: Resource + Send + Sync,
    S: ObjectStore<K> + ?Sized,
{
    let Some(mut obj) = store.get_object(name).await? else {
        return Ok(OperationResult::Unchanged);
    };
    let annotations = obj.annotations_mut();
    if annotations.get(key) == Some(&value) {
        return Ok(OperationResult::Unchanged);
    }
    annotations.insert(key.to_string(), value);
    store.update_object(&obj).await?;
    Ok(OperationResult::Updated)
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("hz".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    fn set_data(value: &'static str) -> impl FnOnce(&mut ConfigMap) -> Result<(), ReconcileError> + Send {
        move |cm| {
            cm.data = Some(BTreeMap::from([("k".to_string(), value.to_string())]));
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_apply_of_unchanged_template_is_a_noop() {
        let store = MemoryStore::<ConfigMap>::new();
        let first = create_or_update(&store, config_map("a"), set_data("a")).await.unwrap();
        let second = create_or_update(&store, config_map("a"), set_data("a")).await.unwrap();
        assert_eq!(first, OperationResult::Created);
        assert_eq!(second, OperationResult::Unchanged);
        assert_eq!(store.creates(), 1);
        assert_eq!(store.updates(), 0);
    }

    #[tokio::test]
    async fn changed_mutation_updates_existing_object() {
        let store = MemoryStore::<ConfigMap>::new();
        create_or_update(&store, config_map("a"), set_data("a")).await.unwrap();
        let res = create_or_update(&store, config_map("b"), set_data("b")).await.unwrap();
        assert_eq!(res, OperationResult::Updated);
        let stored = store.get("hz").unwrap();
        assert_eq!(stored.data.unwrap()["k"], "b");
    }

    #[tokio::test]
    async fn mutation_runs_on_fetched_object_not_template() {
        let mut existing = config_map("a");
        existing.metadata.labels = Some(BTreeMap::from([("owner".into(), "platform".into())]));
        let store = MemoryStore::with([existing]);
        let res = create_or_update(&store, config_map("a"), set_data("a")).await.unwrap();
        assert_eq!(res, OperationResult::Unchanged);
        assert!(store.get("hz").unwrap().metadata.labels.is_some());
    }

    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let store = MemoryStore::<ConfigMap>::new();
        let res = create_or_update(&store, config_map("a"), |_cm| {
            Err(ReconcileError::validation("boom"))
        })
        .await;
        assert!(matches!(res, Err(ReconcileError::Validation(_))));
        assert!(store.names().is_empty());
    }

    /// A store whose object changes between the read and the write.
    struct RacingStore(MemoryStore<ConfigMap>);

    #[async_trait]
    impl ObjectStore<ConfigMap> for RacingStore {
        async fn get_object(&self, name: &str) -> Result<Option<ConfigMap>, ReconcileError> {
            let obj = self.0.get_object(name).await?;
            self.0.bump(name);
            Ok(obj)
        }
        async fn create_object(&self, obj: &ConfigMap) -> Result<ConfigMap, ReconcileError> {
            self.0.create_object(obj).await
        }
        async fn update_object(&self, obj: &ConfigMap) -> Result<ConfigMap, ReconcileError> {
            self.0.update_object(obj).await
        }
        async fn delete_object(&self, name: &str) -> Result<bool, ReconcileError> {
            self.0.delete_object(name).await
        }
    }

    #[tokio::test]
    async fn concurrent_modification_surfaces_conflict() {
        let store = RacingStore(MemoryStore::with([config_map("a")]));
        let res = create_or_update(&store, config_map("b"), set_data("b")).await;
        match res {
            Err(e @ ReconcileError::Conflict { .. }) => assert!(e.is_retryable()),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.0.get("hz").unwrap().data.unwrap()["k"], "a");
    }

    #[tokio::test]
    async fn delete_if_exists_is_idempotent() {
        let store = MemoryStore::with([config_map("a")]);
        assert!(delete_if_exists(&store, "hz").await.unwrap());
        assert!(!delete_if_exists(&store, "hz").await.unwrap());
    }

    #[tokio::test]
    async fn set_annotation_skips_missing_and_unchanged() {
        let store = MemoryStore::with([config_map("a")]);
        let set = |v: &str| set_annotation(&store, "hz", "hazelcast.com/note", v.to_string());
        assert_eq!(set("x").await.unwrap(), OperationResult::Updated);
        assert_eq!(set("x").await.unwrap(), OperationResult::Unchanged);
        assert_eq!(store.updates(), 1);
        let missing = set_annotation(&store, "gone", "hazelcast.com/note", "x".into()).await;
        assert_eq!(missing.unwrap(), OperationResult::Unchanged);
    }

    #[test]
    fn object_key_display() {
        assert_eq!(ObjectKey::new("ns", "hz").to_string(), "ns/hz");
    }
}
