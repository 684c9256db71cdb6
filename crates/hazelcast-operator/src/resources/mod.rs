//! Desired state of every object owned by a `Hazelcast` resource.
//!
//! Builders here are pure: they only look at the resource (and the Maps that
//! reference it) and never talk to the API server.

pub mod config_map;
pub mod rbac;
pub mod service;
pub mod statefulset;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, core::ObjectMeta};

use crate::crds::hazelcast::Hazelcast;
use crate::naming;

pub fn labels(h: &Hazelcast) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            naming::APPLICATION_NAME_LABEL.to_string(),
            naming::HAZELCAST.to_string(),
        ),
        (
            naming::APPLICATION_INSTANCE_NAME_LABEL.to_string(),
            h.metadata.name.clone().unwrap_or_default(),
        ),
        (
            naming::APPLICATION_MANAGED_BY_LABEL.to_string(),
            naming::OPERATOR_NAME.to_string(),
        ),
    ])
}

/// Name, namespace, labels and controller reference shared by namespaced children.
pub fn metadata(h: &Hazelcast) -> ObjectMeta {
    ObjectMeta {
        name: h.metadata.name.clone(),
        namespace: h.metadata.namespace.clone(),
        labels: Some(labels(h)),
        owner_references: Some(vec![owner_ref(h)]),
        ..Default::default()
    }
}

pub fn owner_ref(h: &Hazelcast) -> OwnerReference {
    OwnerReference {
        api_version: Hazelcast::api_version(&()).into_owned(),
        kind: Hazelcast::kind(&()).into_owned(),
        name: h.metadata.name.clone().unwrap_or_default(),
        uid: h.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::crds::hazelcast::{Hazelcast, HazelcastSpec};

    pub fn hazelcast(spec: serde_json::Value) -> Hazelcast {
        let spec: HazelcastSpec = serde_json::from_value(spec).unwrap();
        let mut h = Hazelcast::new("hz", spec);
        h.metadata.namespace = Some("default".into());
        h.metadata.uid = Some("uid-1".into());
        h
    }
}
