//! Observed state of a running cluster: member health, restore progress and
//! externally reachable addresses.

use std::time::Duration;

use k8s_openapi::api::core::v1::{ContainerStatus, Pod, Service};

use crate::crds::hazelcast::{
    Hazelcast, HazelcastClusterStatus, HazelcastMemberStatus, HazelcastStatus, Phase,
    RestoreState, RestoreStatus,
};
use crate::naming;

const DNS_TIMEOUT: Duration = Duration::from_secs(2);

fn container_status<'a>(statuses: Option<&'a Vec<ContainerStatus>>, name: &str) -> Option<&'a ContainerStatus> {
    statuses?.iter().find(|c| c.name == name)
}

/// One status per pod, ordered by pod name. `state` is left for the caller to fill.
pub fn member_statuses(pods: &[Pod]) -> Vec<HazelcastMemberStatus> {
    let mut members: Vec<_> = pods
        .iter()
        .map(|pod| {
            let status = pod.status.as_ref();
            let container = status
                .and_then(|s| container_status(s.container_statuses.as_ref(), naming::HAZELCAST));
            let waiting = container
                .and_then(|c| c.state.as_ref())
                .and_then(|s| s.waiting.as_ref());
            HazelcastMemberStatus {
                pod_name: pod.metadata.name.clone().unwrap_or_default(),
                ip: status.and_then(|s| s.pod_ip.clone()),
                ready: container.is_some_and(|c| c.ready),
                state: None,
                reason: waiting.and_then(|w| w.reason.clone()),
                message: waiting.and_then(|w| w.message.clone()),
                restart_count: container.map(|c| c.restart_count).unwrap_or_default(),
            }
        })
        .collect();
    members.sort_by(|a, b| pod_ordinal_key(&a.pod_name).cmp(&pod_ordinal_key(&b.pod_name)));
    members
}

/// StatefulSet pods sort by their ordinal suffix, so `hz-2` comes before `hz-10`.
fn pod_ordinal_key(name: &str) -> (&str, Option<u32>) {
    name.rsplit_once('-')
        .and_then(|(base, ordinal)| Some((base, Some(ordinal.parse::<u32>().ok()?))))
        .unwrap_or((name, None))
}

/// Progress of the restore init containers across all pods.
pub fn restore_state(pods: &[Pod]) -> RestoreState {
    let agents: Vec<_> = pods
        .iter()
        .filter_map(|p| {
            let statuses = p.status.as_ref()?.init_container_statuses.as_ref();
            container_status(statuses, naming::RESTORE_AGENT)
        })
        .collect();
    if agents.is_empty() {
        return RestoreState::NotStarted;
    }
    let terminated: Vec<_> = agents
        .iter()
        .filter_map(|c| c.state.as_ref()?.terminated.as_ref())
        .collect();
    if terminated.iter().any(|t| t.exit_code != 0) {
        RestoreState::Failed
    } else if terminated.len() == agents.len() && agents.len() == pods.len() {
        RestoreState::Succeeded
    } else {
        RestoreState::InProgress
    }
}

pub fn ready_count(members: &[HazelcastMemberStatus]) -> usize {
    members.iter().filter(|m| m.ready).count()
}

pub fn phase(h: &Hazelcast, members: &[HazelcastMemberStatus]) -> Phase {
    if h.metadata.deletion_timestamp.is_some() {
        return Phase::Terminating;
    }
    let desired = usize::try_from(h.spec.cluster_size).unwrap_or_default();
    if members.len() == desired && ready_count(members) == desired {
        Phase::Running
    } else {
        Phase::Pending
    }
}

/// Addresses clients outside the platform can use, `host:port`.
///
/// Unisocket exposure reports the discovery service; smart exposure reports
/// every per-pod service. Node ports are paired with the host IP of the pod
/// they route to.
pub fn external_addresses(
    h: &Hazelcast,
    discovery: Option<&Service>,
    per_pod: &[Service],
    pods: &[Pod],
) -> Vec<String> {
    let Some(ee) = &h.spec.expose_externally else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if ee.is_smart() {
        for svc in per_pod {
            let pod_name = svc
                .spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .and_then(|s| s.get(naming::POD_NAME_LABEL));
            let host_ip = pods
                .iter()
                .find(|p| p.metadata.name.as_ref() == pod_name)
                .and_then(|p| p.status.as_ref()?.host_ip.clone());
            out.extend(service_addresses(svc, host_ip.as_deref()));
        }
    } else if let Some(svc) = discovery {
        out.extend(service_addresses(svc, None));
    }
    out
}

fn service_addresses(svc: &Service, host_ip: Option<&str>) -> Vec<String> {
    let Some(spec) = &svc.spec else {
        return Vec::new();
    };
    let port = spec
        .ports
        .as_ref()
        .and_then(|ports| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some(naming::HAZELCAST_PORT_NAME))
        });
    match spec.type_.as_deref() {
        Some("LoadBalancer") => {
            let port = port.map(|p| p.port).unwrap_or(naming::DEFAULT_HZ_PORT);
            ingress_hosts(svc)
                .into_iter()
                .map(|host| format!("{host}:{port}"))
                .collect()
        }
        Some("NodePort") => match (host_ip, port.and_then(|p| p.node_port)) {
            (Some(ip), Some(node_port)) => vec![format!("{ip}:{node_port}")],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn ingress_hosts(svc: &Service) -> Vec<String> {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .filter_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Whether every per-pod service can be reached from outside right now.
///
/// Load balancers need an ingress, and DNS-based ingress hostnames must resolve.
/// Each lookup is bounded, so a slow resolver reads as "not yet".
pub async fn services_per_pod_ready(h: &Hazelcast, services: &[Option<Service>]) -> bool {
    if !h.spec.is_smart() {
        return true;
    }
    for svc in services {
        let Some(svc) = svc else {
            return false;
        };
        let is_lb = svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer");
        if !is_lb {
            continue;
        }
        let ingress = svc
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.clone())
            .unwrap_or_default();
        if ingress.is_empty() {
            return false;
        }
        for hostname in ingress.iter().filter_map(|i| i.hostname.as_deref()) {
            if !resolves(hostname).await {
                return false;
            }
        }
    }
    true
}

async fn resolves(hostname: &str) -> bool {
    let lookup = tokio::net::lookup_host((hostname, 0));
    match tokio::time::timeout(DNS_TIMEOUT, lookup).await {
        Ok(Ok(mut addrs)) => addrs.next().is_some(),
        _ => false,
    }
}

/// Status for this pass. Member `state` values must already be filled in.
pub fn cluster_status(
    h: &Hazelcast,
    members: Vec<HazelcastMemberStatus>,
    pods: &[Pod],
    external_addresses: Vec<String>,
    message: Option<String>,
) -> HazelcastStatus {
    let ready = ready_count(&members);
    let restore = h.spec.restore().map(|_| RestoreStatus {
        state: restore_state(pods),
    });
    HazelcastStatus {
        phase: phase(h, &members),
        cluster: HazelcastClusterStatus {
            ready_members: format!("{ready}/{}", h.spec.cluster_size),
        },
        message,
        members,
        restore,
        external_addresses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures::hazelcast;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        LoadBalancerIngress, LoadBalancerStatus, PodStatus, ServicePort, ServiceSpec,
        ServiceStatus,
    };
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap;

    fn container(name: &str, ready: bool, state: ContainerState, restarts: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.into(),
            ready,
            restart_count: restarts,
            state: Some(state),
            ..Default::default()
        }
    }

    fn running() -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    fn terminated(code: i32) -> ContainerState {
        ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: code,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(name: &str, main: ContainerStatus, init: Option<ContainerStatus>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: Some("10.1.0.1".into()),
                host_ip: Some("192.168.0.10".into()),
                container_statuses: Some(vec![main]),
                init_container_statuses: init.map(|c| vec![c]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn members_report_crash_loops() {
        let crashing = ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(naming::CRASH_LOOP_BACK_OFF.into()),
                message: Some("back-off restarting".into()),
            }),
            ..Default::default()
        };
        let pods = [
            pod("hz-1", container(naming::HAZELCAST, false, crashing, 3), None),
            pod("hz-0", container(naming::HAZELCAST, true, running(), 0), None),
        ];
        let members = member_statuses(&pods);
        assert_eq!(members[0].pod_name, "hz-0");
        assert!(members[0].ready);
        assert_eq!(members[1].reason.as_deref(), Some(naming::CRASH_LOOP_BACK_OFF));
        assert_eq!(members[1].restart_count, 3);

        let h = hazelcast(serde_json::json!({"clusterSize": 2}));
        assert_eq!(phase(&h, &members), Phase::Pending);
        let status = cluster_status(&h, members, &pods, Vec::new(), None);
        assert_eq!(status.cluster.ready_members, "1/2");
        assert!(status.restore.is_none());
    }

    #[test]
    fn members_are_ordered_by_ordinal() {
        let pods: Vec<Pod> = ["hz-10", "hz-2", "hz-0", "hz-1"]
            .into_iter()
            .map(|name| pod(name, container(naming::HAZELCAST, true, running(), 0), None))
            .collect();
        let names: Vec<String> = member_statuses(&pods)
            .into_iter()
            .map(|m| m.pod_name)
            .collect();
        assert_eq!(names, ["hz-0", "hz-1", "hz-2", "hz-10"]);
    }

    #[test]
    fn restore_progress_from_init_containers() {
        let main = || container(naming::HAZELCAST, true, running(), 0);
        let agent = |state| Some(container(naming::RESTORE_AGENT, false, state, 0));

        assert_eq!(restore_state(&[pod("hz-0", main(), None)]), RestoreState::NotStarted);
        assert_eq!(
            restore_state(&[pod("hz-0", main(), agent(running()))]),
            RestoreState::InProgress
        );
        assert_eq!(
            restore_state(&[
                pod("hz-0", main(), agent(terminated(0))),
                pod("hz-1", main(), agent(terminated(0)))
            ]),
            RestoreState::Succeeded
        );
        assert_eq!(
            restore_state(&[
                pod("hz-0", main(), agent(terminated(0))),
                pod("hz-1", main(), agent(terminated(1)))
            ]),
            RestoreState::Failed
        );
    }

    fn service(type_: &str, selector_pod: Option<&str>, node_port: Option<i32>, ingress: Vec<LoadBalancerIngress>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some(type_.into()),
                selector: selector_pod.map(|p| {
                    BTreeMap::from([(naming::POD_NAME_LABEL.to_string(), p.to_string())])
                }),
                ports: Some(vec![ServicePort {
                    name: Some(naming::HAZELCAST_PORT_NAME.into()),
                    port: naming::DEFAULT_HZ_PORT,
                    node_port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(ingress),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn ingress_ip(ip: &str) -> LoadBalancerIngress {
        LoadBalancerIngress {
            ip: Some(ip.into()),
            ..Default::default()
        }
    }

    #[test]
    fn smart_node_ports_pair_with_host_ip() {
        let h = hazelcast(serde_json::json!({
            "exposeExternally": {"type": "Smart", "memberAccess": "NodePortExternalIP"}
        }));
        let pods = [pod("hz-0", container(naming::HAZELCAST, true, running(), 0), None)];
        let per_pod = [service("NodePort", Some("hz-0"), Some(31001), Vec::new())];
        assert_eq!(
            external_addresses(&h, None, &per_pod, &pods),
            ["192.168.0.10:31001"]
        );
    }

    #[test]
    fn unisocket_reports_discovery_ingress() {
        let h = hazelcast(serde_json::json!({"exposeExternally": {"type": "Unisocket"}}));
        let discovery = service("LoadBalancer", None, None, vec![ingress_ip("34.1.2.3")]);
        assert_eq!(
            external_addresses(&h, Some(&discovery), &[], &[]),
            ["34.1.2.3:5701"]
        );
        let internal = hazelcast(serde_json::json!({}));
        assert!(external_addresses(&internal, Some(&discovery), &[], &[]).is_empty());
    }

    #[tokio::test]
    async fn per_pod_readiness_waits_for_ingress() {
        let h = hazelcast(serde_json::json!({
            "clusterSize": 2,
            "exposeExternally": {"type": "Smart", "memberAccess": "LoadBalancer"}
        }));
        let ready = service("LoadBalancer", Some("hz-0"), None, vec![ingress_ip("34.1.2.3")]);
        let pending = service("LoadBalancer", Some("hz-1"), None, Vec::new());
        assert!(services_per_pod_ready(&h, &[Some(ready.clone()), Some(ready.clone())]).await);
        assert!(!services_per_pod_ready(&h, &[Some(ready.clone()), Some(pending)]).await);
        assert!(!services_per_pod_ready(&h, &[Some(ready), None]).await);

        let localhost = service(
            "LoadBalancer",
            Some("hz-0"),
            None,
            vec![LoadBalancerIngress {
                hostname: Some("localhost".into()),
                ..Default::default()
            }],
        );
        assert!(services_per_pod_ready(&h, &[Some(localhost)]).await);
    }
}
