use std::collections::BTreeMap;
use std::ops::Range;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use serde::{Deserialize, Serialize};

use super::{labels, metadata, owner_ref};
use crate::crds::hazelcast::Hazelcast;
use crate::naming;

/// Discovery/client service in front of all members.
pub fn discovery_service(h: &Hazelcast) -> Service {
    Service {
        metadata: metadata(h),
        spec: Some(ServiceSpec {
            selector: Some(labels(h)),
            ports: Some(service_ports(h)),
            type_: Some(service_type(h).into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service_type(h: &Hazelcast) -> &str {
    match &h.spec.expose_externally {
        Some(ee) => ee.discovery_service_type(),
        None => "ClusterIP",
    }
}

fn service_ports(h: &Hazelcast) -> Vec<ServicePort> {
    let mut ports = vec![hazelcast_port()];
    if h.spec.persistence_external() {
        ports.push(ServicePort {
            name: Some(naming::BACKUP_AGENT_PORT_NAME.into()),
            protocol: Some("TCP".into()),
            port: naming::DEFAULT_AGENT_PORT,
            target_port: Some(IntOrString::String(naming::BACKUP_AGENT.into())),
            ..Default::default()
        });
    }
    ports
}

fn hazelcast_port() -> ServicePort {
    ServicePort {
        name: Some(naming::HAZELCAST_PORT_NAME.into()),
        protocol: Some("TCP".into()),
        port: naming::DEFAULT_HZ_PORT,
        target_port: Some(IntOrString::String(naming::HAZELCAST.into())),
        ..Default::default()
    }
}

/// Brings a fetched discovery service in line with `h` without dropping platform-assigned
/// fields (cluster IP, node ports). Node ports are cleared for ClusterIP services since the
/// platform rejects them there.
pub fn sync_discovery_service(svc: &mut Service, h: &Hazelcast) {
    let desired = discovery_service(h);
    let desired_spec = desired.spec.unwrap_or_default();
    let spec = svc.spec.get_or_insert_with(Default::default);
    let type_ = service_type(h);
    spec.type_ = Some(type_.to_string());
    spec.selector = desired_spec.selector;
    spec.ports = Some(merge_ports(
        spec.ports.take().unwrap_or_default(),
        desired_spec.ports.unwrap_or_default(),
        type_ == "ClusterIP",
    ));
    svc.metadata.labels = desired.metadata.labels;
}

fn merge_ports(
    current: Vec<ServicePort>,
    desired: Vec<ServicePort>,
    clear_node_ports: bool,
) -> Vec<ServicePort> {
    desired
        .into_iter()
        .map(|mut port| {
            if !clear_node_ports {
                port.node_port = current
                    .iter()
                    .find(|p| p.name == port.name)
                    .and_then(|p| p.node_port);
            }
            port
        })
        .collect()
}

pub fn service_per_pod_name(i: i32, h: &Hazelcast) -> String {
    format!("{}-{}", h.metadata.name.as_deref().unwrap_or_default(), i)
}

fn service_per_pod_selector(i: i32, h: &Hazelcast) -> BTreeMap<String, String> {
    let mut ls = labels(h);
    ls.insert(naming::POD_NAME_LABEL.into(), service_per_pod_name(i, h));
    ls
}

fn service_per_pod_labels(h: &Hazelcast) -> BTreeMap<String, String> {
    let mut ls = labels(h);
    ls.insert(
        naming::SERVICE_PER_POD_LABEL_NAME.into(),
        naming::LABEL_VALUE_TRUE.into(),
    );
    ls
}

/// One service per member, only for smart exposure. Empty otherwise.
pub fn services_per_pod(h: &Hazelcast) -> Vec<Service> {
    let Some(ee) = h.spec.expose_externally.as_ref().filter(|ee| ee.is_smart()) else {
        return Vec::new();
    };
    (0..h.spec.cluster_size.max(0))
        .map(|i| Service {
            metadata: ObjectMeta {
                name: Some(service_per_pod_name(i, h)),
                namespace: h.metadata.namespace.clone(),
                labels: Some(service_per_pod_labels(h)),
                owner_references: Some(vec![owner_ref(h)]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(service_per_pod_selector(i, h)),
                ports: Some(vec![hazelcast_port()]),
                publish_not_ready_addresses: Some(true),
                type_: Some(ee.member_access_service_type().into()),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect()
}

pub fn sync_service_per_pod(svc: &mut Service, desired: &Service) {
    let spec = svc.spec.get_or_insert_with(Default::default);
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let clear = desired_spec.type_.as_deref() == Some("ClusterIP");
    spec.type_ = desired_spec.type_;
    spec.selector = desired_spec.selector;
    spec.publish_not_ready_addresses = desired_spec.publish_not_ready_addresses;
    spec.ports = Some(merge_ports(
        spec.ports.take().unwrap_or_default(),
        desired_spec.ports.unwrap_or_default(),
        clear,
    ));
}

/// Topology the StatefulSet was last converged to, recorded on the StatefulSet itself.
///
/// It reflects what was last applied rather than what is desired, which is what
/// cleanup of per-pod services after a scale-down needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergedTopology {
    pub version: u32,
    pub service_per_pod_count: i32,
}

impl ConvergedTopology {
    pub const VERSION: u32 = 1;

    pub fn desired(h: &Hazelcast) -> Self {
        Self {
            version: Self::VERSION,
            service_per_pod_count: if h.spec.is_smart() {
                h.spec.cluster_size.max(0)
            } else {
                0
            },
        }
    }

    /// `None` when the annotation is missing, unparsable or from another version.
    pub fn read(sts: &StatefulSet) -> Option<Self> {
        let raw = sts
            .metadata
            .annotations
            .as_ref()?
            .get(naming::CONVERGED_TOPOLOGY_ANNOTATION)?;
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|t| t.version == Self::VERSION)
    }

    pub fn annotation_value(&self) -> String {
        // Two integer fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Per-pod service indices that existed at `previous` but are not wanted at `desired`.
pub fn stale_service_indices(previous: ConvergedTopology, desired: ConvergedTopology) -> Range<i32> {
    desired.service_per_pod_count..previous.service_per_pod_count.max(desired.service_per_pod_count)
}
