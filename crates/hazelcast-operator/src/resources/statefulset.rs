use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, HostPathVolumeSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    SecretKeySelector, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use super::service::ConvergedTopology;
use super::{labels, metadata};
use crate::crds::hazelcast::{Hazelcast, PersistenceConfiguration};
use crate::error::ReconcileError;
use crate::hz_config::HazelcastConfig;
use crate::naming;
use crate::restore::RestoreProvider;
use crate::settings::{OperatorSettings, Platform};
use crate::validation::validate_restore_configuration;

const NOBODY: i64 = 65534;
const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Full StatefulSet for `h`, used when it does not exist yet.
///
/// Volume claim templates and the agent containers are only set here: the claim
/// templates are immutable and the agents follow the persistence mode chosen at
/// creation. [`sync_statefulset`] keeps the mutable parts in line afterwards.
pub fn build_statefulset(
    h: &Hazelcast,
    settings: &OperatorSettings,
) -> Result<StatefulSet, ReconcileError> {
    let ls = labels(h);
    let name = h.metadata.name.clone().unwrap_or_default();
    let persistence = h.spec.persistence.as_ref().filter(|p| p.is_enabled());

    let mut pod_spec = PodSpec {
        service_account_name: Some(name.clone()),
        security_context: Some(PodSecurityContext {
            fs_group: Some(NOBODY),
            run_as_non_root: Some(true),
            run_as_user: Some(NOBODY),
            ..Default::default()
        }),
        containers: vec![hazelcast_container(h)],
        termination_grace_period_seconds: Some(600),
        volumes: Some(vec![config_volume(&name)]),
        ..Default::default()
    };
    let mut volume_claim_templates = None;

    if let Some(p) = persistence {
        if p.uses_host_path() {
            push_volume(&mut pod_spec, host_path_volume(p));
            relax_for_host_path(&mut pod_spec.containers[0], settings.platform);
        } else {
            volume_claim_templates = Some(vec![persistent_volume_claim(h, p)]);
        }
        if p.is_external() {
            pod_spec.containers.push(backup_agent_container(h, p));
        }
        if let Some(restore) = h.spec.restore() {
            validate_restore_configuration(restore)?;
            let provider = RestoreProvider::try_from(restore)?;
            for v in provider.extra_volumes(&restore.secret) {
                push_volume(&mut pod_spec, v);
            }
            pod_spec
                .init_containers
                .get_or_insert_with(Vec::new)
                .insert(0, restore_agent_container(h, p, provider));
        }
    }

    let mut sts = StatefulSet {
        metadata: metadata(h),
        spec: Some(StatefulSetSpec {
            selector: LabelSelector {
                match_labels: Some(ls.clone()),
                ..Default::default()
            },
            service_name: Some(name),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(ls),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    };
    sync_statefulset(&mut sts, h, settings)?;
    Ok(sts)
}

/// Applies the mutable part of the desired StatefulSet onto `sts`.
pub fn sync_statefulset(
    sts: &mut StatefulSet,
    h: &Hazelcast,
    settings: &OperatorSettings,
) -> Result<(), ReconcileError> {
    sts.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            naming::CONVERGED_TOPOLOGY_ANNOTATION.into(),
            ConvergedTopology::desired(h).annotation_value(),
        );

    let spec = sts.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(h.spec.cluster_size);

    let template_meta = spec.template.metadata.get_or_insert_with(Default::default);
    template_meta.annotations = Some(pod_annotations(h)?);

    let pod = spec.template.spec.get_or_insert_with(Default::default);
    pod.image_pull_secrets = h.spec.image_pull_secrets.clone();
    match &h.spec.scheduling {
        Some(s) => {
            pod.affinity = s.affinity.clone();
            pod.tolerations = s.tolerations.clone();
            pod.node_selector = s.node_selector.clone();
            pod.topology_spread_constraints = s.topology_spread_constraints.clone();
        }
        None => {
            pod.affinity = None;
            pod.tolerations = None;
            pod.node_selector = None;
            pod.topology_spread_constraints = None;
        }
    }

    if pod.containers.is_empty() {
        pod.containers.push(hazelcast_container(h));
    }
    let container = &mut pod.containers[0];
    container.image = Some(h.spec.docker_image());
    // Unset fields are written the way the API server defaults them, so a
    // re-read object compares equal.
    container.image_pull_policy = Some(
        h.spec
            .image_pull_policy
            .clone()
            .unwrap_or_else(|| DEFAULT_PULL_POLICY.to_string()),
    );
    container.env = Some(env(h, settings));
    container.resources = Some(h.spec.resources.clone().unwrap_or_default());
    Ok(())
}

pub fn pod_annotations(h: &Hazelcast) -> Result<BTreeMap<String, String>, ReconcileError> {
    let mut ans = BTreeMap::new();
    if let Some(ee) = h.spec.expose_externally.as_ref().filter(|ee| ee.is_smart()) {
        ans.insert(
            naming::EXPOSE_EXTERNALLY_ANNOTATION.to_string(),
            format!("{:?}", ee.member_access()),
        );
    }
    ans.insert(
        naming::CONFIG_FORCING_RESTART_CHECKSUM.to_string(),
        HazelcastConfig::for_cluster(h).forcing_restart_checksum()?,
    );
    Ok(ans)
}

pub fn env(h: &Hazelcast, settings: &OperatorSettings) -> Vec<EnvVar> {
    let mut envs = vec![
        EnvVar {
            name: "JAVA_OPTS".into(),
            value: Some(format!(
                "-Dhazelcast.config={}/{}",
                naming::HAZELCAST_MOUNT_PATH,
                naming::CONFIG_FILE_NAME
            )),
            ..Default::default()
        },
        EnvVar {
            name: "HZ_PARDOT_ID".into(),
            value: Some("operator".into()),
            ..Default::default()
        },
        EnvVar {
            name: "HZ_PHONE_HOME_ENABLED".into(),
            value: Some(settings.phone_home_enabled.to_string()),
            ..Default::default()
        },
    ];
    if !h.spec.license_key_secret.is_empty() {
        envs.push(EnvVar {
            name: naming::LICENSE_KEY_ENV.into(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: h.spec.license_key_secret.clone(),
                    key: naming::LICENSE_DATA_KEY.into(),
                    optional: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    envs
}

fn http_probe(path: &str, port: i32, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.into()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(10),
        period_seconds: Some(10),
        success_threshold: Some(1),
        failure_threshold: Some(10),
        ..Default::default()
    }
}

fn hazelcast_container(h: &Hazelcast) -> Container {
    let persistence_enabled = h.spec.persistence_enabled();
    Container {
        name: naming::HAZELCAST.into(),
        image: Some(h.spec.docker_image()),
        ports: Some(vec![ContainerPort {
            container_port: naming::DEFAULT_HZ_PORT,
            name: Some(naming::HAZELCAST.into()),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        liveness_probe: Some(http_probe(
            "/hazelcast/health/node-state",
            naming::DEFAULT_HZ_PORT,
            0,
        )),
        readiness_probe: Some(http_probe(
            "/hazelcast/health/node-state",
            naming::DEFAULT_HZ_PORT,
            0,
        )),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(NOBODY),
            privileged: Some(false),
            read_only_root_filesystem: Some(!persistence_enabled),
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".into()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(hazelcast_volume_mounts(h)),
        ..Default::default()
    }
}

/// Host-path volumes are owned by root on the node.
fn relax_for_host_path(container: &mut Container, platform: Platform) {
    let sc = container.security_context.get_or_insert_with(Default::default);
    sc.run_as_non_root = Some(false);
    sc.run_as_user = Some(0);
    if platform == Platform::OpenShift {
        sc.privileged = Some(true);
        sc.allow_privilege_escalation = Some(true);
    }
}

fn hazelcast_volume_mounts(h: &Hazelcast) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        name: naming::HAZELCAST_STORAGE_NAME.into(),
        mount_path: naming::HAZELCAST_MOUNT_PATH.into(),
        ..Default::default()
    }];
    if let Some(p) = h.spec.persistence.as_ref().filter(|p| p.is_enabled()) {
        mounts.push(data_volume_mount(p));
    }
    mounts
}

fn data_volume_mount(p: &PersistenceConfiguration) -> VolumeMount {
    VolumeMount {
        name: naming::PERSISTENCE_VOLUME_NAME.into(),
        mount_path: p.base_dir.clone(),
        ..Default::default()
    }
}

fn backup_agent_container(h: &Hazelcast, p: &PersistenceConfiguration) -> Container {
    Container {
        name: naming::BACKUP_AGENT.into(),
        image: Some(h.spec.agent_docker_image()),
        ports: Some(vec![ContainerPort {
            container_port: naming::DEFAULT_AGENT_PORT,
            name: Some(naming::BACKUP_AGENT.into()),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        args: Some(vec!["backup".into()]),
        liveness_probe: Some(http_probe("/health", naming::DEFAULT_AGENT_PORT, 10)),
        readiness_probe: Some(http_probe("/health", naming::DEFAULT_AGENT_PORT, 10)),
        volume_mounts: Some(vec![data_volume_mount(p)]),
        ..Default::default()
    }
}

fn restore_agent_container(
    h: &Hazelcast,
    p: &PersistenceConfiguration,
    provider: RestoreProvider,
) -> Container {
    let restore = p.restore.clone().unwrap_or_default();
    let mut env = provider.credential_env(&restore.secret);
    env.extend([
        EnvVar {
            name: "RESTORE_BUCKET".into(),
            value: Some(restore.bucket_uri),
            ..Default::default()
        },
        EnvVar {
            name: "RESTORE_DESTINATION".into(),
            value: Some(p.base_dir.clone()),
            ..Default::default()
        },
        EnvVar {
            name: "RESTORE_HOSTNAME".into(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]);
    let mut mounts = vec![data_volume_mount(p)];
    mounts.extend(provider.extra_volume_mounts());
    Container {
        name: naming::RESTORE_AGENT.into(),
        image: Some(h.spec.agent_docker_image()),
        args: Some(vec!["restore".into()]),
        env: Some(env),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn config_volume(name: &str) -> Volume {
    Volume {
        name: naming::HAZELCAST_STORAGE_NAME.into(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn host_path_volume(p: &PersistenceConfiguration) -> Volume {
    Volume {
        name: naming::PERSISTENCE_VOLUME_NAME.into(),
        host_path: Some(HostPathVolumeSource {
            path: p.host_path.clone(),
            type_: Some("DirectoryOrCreate".into()),
        }),
        ..Default::default()
    }
}

fn push_volume(pod: &mut PodSpec, volume: Volume) {
    pod.volumes.get_or_insert_with(Vec::new).push(volume);
}

fn persistent_volume_claim(h: &Hazelcast, p: &PersistenceConfiguration) -> PersistentVolumeClaim {
    let pvc = p.pvc.clone().unwrap_or_default();
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(naming::PERSISTENCE_VOLUME_NAME.into()),
            namespace: h.metadata.namespace.clone(),
            labels: Some(labels(h)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(if pvc.access_modes.is_empty() {
                vec!["ReadWriteOnce".into()]
            } else {
                pvc.access_modes
            }),
            resources: Some(VolumeResourceRequirements {
                requests: pvc
                    .request_storage
                    .map(|q| BTreeMap::from([("storage".to_string(), q)])),
                limits: None,
            }),
            storage_class_name: pvc.storage_class_name,
            ..Default::default()
        }),
        ..Default::default()
    }
}
