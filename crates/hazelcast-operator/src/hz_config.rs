//! Typed model of the `hazelcast.yaml` document written into the cluster ConfigMap.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::crds::hazelcast::{DataRecoveryPolicy, Hazelcast};
use crate::crds::map::MapSpec;
use crate::error::ReconcileError;
use crate::naming;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HazelcastWrapper {
    pub hazelcast: HazelcastConfig,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct HazelcastConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jet: Option<Jet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<Persistence>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, MapConfig>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Jet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Network {
    pub join: Join,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_api: Option<RestApi>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Join {
    pub kubernetes: Kubernetes,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubernetes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_node_name_as_external_address: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_per_pod_label_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_per_pod_label_value: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RestApi {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub endpoint_groups: EndpointGroups,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct EndpointGroups {
    pub health_check: EndpointGroup,
    pub cluster_write: EndpointGroup,
    pub persistence: EndpointGroup,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EndpointGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl EndpointGroup {
    fn enabled() -> Self {
        Self {
            enabled: Some(true),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Persistence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub base_dir: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub backup_dir: String,
    pub parallelism: i32,
    #[serde(rename = "validation-timeout-seconds")]
    pub validation_timeout_sec: i32,
    #[serde(rename = "data-load-timeout-seconds")]
    pub data_load_timeout_sec: i32,
    pub cluster_data_recovery_policy: String,
    pub auto_remove_stale_data: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MapConfig {
    pub backup_count: i32,
    pub async_backup_count: i32,
    pub time_to_live_seconds: i32,
    pub max_idle_seconds: i32,
    pub eviction: MapEviction,
    pub read_backup_data: bool,
    pub in_memory_format: String,
    pub statistics_enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<MapIndex>,
    pub hot_restart: MapHotRestart,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MapEviction {
    pub size: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub max_size_policy: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub eviction_policy: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MapIndex {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub attributes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitmap_index_options: Option<BitmapIndexOptions>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BitmapIndexOptions {
    pub unique_key: String,
    pub unique_key_transformation: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MapHotRestart {
    pub enabled: bool,
    pub fsync: bool,
}

pub fn cluster_data_recovery_policy(policy: DataRecoveryPolicy) -> &'static str {
    match policy {
        DataRecoveryPolicy::FullRecoveryOnly => "FULL_RECOVERY_ONLY",
        DataRecoveryPolicy::PartialRecoveryMostRecent => "PARTIAL_RECOVERY_MOST_RECENT",
        DataRecoveryPolicy::PartialRecoveryMostComplete => "PARTIAL_RECOVERY_MOST_COMPLETE",
    }
}

impl HazelcastConfig {
    /// Cluster-level part of the document, without maps.
    pub fn for_cluster(h: &Hazelcast) -> Self {
        let spec = &h.spec;
        let mut kubernetes = Kubernetes {
            enabled: Some(true),
            service_name: h.metadata.name.clone().unwrap_or_default(),
            ..Default::default()
        };
        if let Some(ee) = &spec.expose_externally {
            if ee.uses_node_name() {
                kubernetes.use_node_name_as_external_address = Some(true);
            }
            if ee.is_smart() {
                kubernetes.service_per_pod_label_name = naming::SERVICE_PER_POD_LABEL_NAME.into();
                kubernetes.service_per_pod_label_value = naming::LABEL_VALUE_TRUE.into();
            }
        }

        let persistence = spec
            .persistence
            .as_ref()
            .filter(|p| p.is_enabled())
            .map(|p| {
                let timeout = if p.data_recovery_timeout != 0 {
                    (p.data_recovery_timeout, p.data_recovery_timeout)
                } else {
                    (120, 900)
                };
                Persistence {
                    enabled: Some(true),
                    base_dir: p.base_dir.clone(),
                    backup_dir: format!("{}/hot-backup", p.base_dir),
                    parallelism: 1,
                    validation_timeout_sec: timeout.0,
                    data_load_timeout_sec: timeout.1,
                    cluster_data_recovery_policy: cluster_data_recovery_policy(
                        p.cluster_data_recovery_policy,
                    )
                    .into(),
                    auto_remove_stale_data: Some(p.auto_remove_stale_data()),
                }
            });

        HazelcastConfig {
            jet: Some(Jet {
                enabled: Some(true),
            }),
            network: Some(Network {
                join: Join { kubernetes },
                rest_api: Some(RestApi {
                    enabled: Some(true),
                    endpoint_groups: EndpointGroups {
                        health_check: EndpointGroup::enabled(),
                        cluster_write: EndpointGroup::enabled(),
                        persistence: EndpointGroup::enabled(),
                    },
                }),
            }),
            cluster_name: spec.cluster_name.clone(),
            persistence,
            map: BTreeMap::new(),
        }
    }

    pub fn with_maps<'a>(mut self, maps: impl IntoIterator<Item = (String, &'a MapSpec)>) -> Self {
        for (name, spec) in maps {
            self.map.insert(name, MapConfig::from(spec));
        }
        self
    }

    /// The fields whose change needs a rolling restart of the members.
    pub fn forcing_restart(&self) -> Self {
        let kubernetes = self
            .network
            .as_ref()
            .map(|n| &n.join.kubernetes)
            .map(|k| Kubernetes {
                use_node_name_as_external_address: k.use_node_name_as_external_address,
                service_per_pod_label_name: k.service_per_pod_label_name.clone(),
                service_per_pod_label_value: k.service_per_pod_label_value.clone(),
                ..Default::default()
            })
            .unwrap_or_default();
        HazelcastConfig {
            network: Some(Network {
                join: Join { kubernetes },
                rest_api: None,
            }),
            cluster_name: self.cluster_name.clone(),
            ..Default::default()
        }
    }

    pub fn to_yaml(&self) -> Result<String, ReconcileError> {
        Ok(serde_yaml::to_string(&HazelcastWrapper {
            hazelcast: self.clone(),
        })?)
    }

    /// CRC32 of the restart-forcing subset, as a decimal string.
    pub fn forcing_restart_checksum(&self) -> Result<String, ReconcileError> {
        let yaml = self.forcing_restart().to_yaml()?;
        Ok(crc32fast::hash(yaml.as_bytes()).to_string())
    }
}

impl From<&MapSpec> for MapConfig {
    fn from(ms: &MapSpec) -> Self {
        MapConfig {
            backup_count: ms.backup_count,
            async_backup_count: 0,
            time_to_live_seconds: ms.time_to_live_seconds,
            max_idle_seconds: 0,
            eviction: MapEviction {
                size: ms.eviction.max_size,
                max_size_policy: ms.eviction.max_size_policy.clone(),
                eviction_policy: ms.eviction.eviction_policy.clone(),
            },
            read_backup_data: false,
            in_memory_format: "BINARY".into(),
            statistics_enabled: true,
            indexes: ms
                .indexes
                .iter()
                .map(|idx| MapIndex {
                    name: idx.name.clone().unwrap_or_default(),
                    type_: idx.type_.clone(),
                    attributes: idx.attributes.clone(),
                    bitmap_index_options: idx.bitmap_index_options.as_ref().map(|b| {
                        BitmapIndexOptions {
                            unique_key: b.unique_key.clone(),
                            unique_key_transformation: b.unique_key_transition.clone(),
                        }
                    }),
                })
                .collect(),
            hot_restart: MapHotRestart {
                enabled: ms.persistence_enabled,
                fsync: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::hazelcast::{
        ExposeExternallyConfiguration, ExposeExternallyType, HazelcastSpec, MemberAccess,
        PersistenceConfiguration,
    };

    fn hazelcast(spec_json: serde_json::Value) -> Hazelcast {
        let spec: HazelcastSpec = serde_json::from_value(spec_json).unwrap();
        let mut h = Hazelcast::new("hz", spec);
        h.metadata.namespace = Some("default".into());
        h
    }

    fn with_persistence(timeout: i32) -> Hazelcast {
        let mut h = hazelcast(serde_json::json!({}));
        h.spec.persistence = Some(PersistenceConfiguration {
            base_dir: "/data/hot-restart".into(),
            data_recovery_timeout: timeout,
            ..Default::default()
        });
        h
    }

    #[test]
    fn renders_discovery_and_rest_api() {
        let yaml = HazelcastConfig::for_cluster(&hazelcast(serde_json::json!({})))
            .to_yaml()
            .unwrap();
        assert!(yaml.starts_with("hazelcast:"));
        assert!(yaml.contains("service-name: hz"));
        assert!(yaml.contains("HEALTH_CHECK"));
        assert!(yaml.contains("cluster-name: dev"));
        assert!(!yaml.contains("persistence:\n    enabled"));
        assert!(!yaml.contains("service-per-pod-label-name"));
    }

    #[test]
    fn renders_persistence_defaults_and_override() {
        let cfg = HazelcastConfig::for_cluster(&with_persistence(0));
        let p = cfg.persistence.unwrap();
        assert_eq!(p.backup_dir, "/data/hot-restart/hot-backup");
        assert_eq!((p.validation_timeout_sec, p.data_load_timeout_sec), (120, 900));
        assert_eq!(p.cluster_data_recovery_policy, "FULL_RECOVERY_ONLY");
        assert_eq!(p.auto_remove_stale_data, Some(false));

        let p = HazelcastConfig::for_cluster(&with_persistence(60)).persistence.unwrap();
        assert_eq!((p.validation_timeout_sec, p.data_load_timeout_sec), (60, 60));
    }

    #[test]
    fn smart_exposure_enables_per_pod_discovery() {
        let mut h = hazelcast(serde_json::json!({}));
        h.spec.expose_externally = Some(ExposeExternallyConfiguration {
            type_: ExposeExternallyType::Smart,
            discovery_service_type: "LoadBalancer".into(),
            member_access: Some(MemberAccess::NodePortNodeName),
        });
        let k = HazelcastConfig::for_cluster(&h).network.unwrap().join.kubernetes;
        assert_eq!(k.service_per_pod_label_name, naming::SERVICE_PER_POD_LABEL_NAME);
        assert_eq!(k.use_node_name_as_external_address, Some(true));
    }

    #[test]
    fn recovery_policy_tokens() {
        let policy = |token: &str| -> DataRecoveryPolicy {
            serde_json::from_value(serde_json::json!(token)).unwrap()
        };
        assert_eq!(
            cluster_data_recovery_policy(policy("PartialRecoveryMostRecent")),
            "PARTIAL_RECOVERY_MOST_RECENT"
        );
        assert_eq!(
            cluster_data_recovery_policy(policy("PartialRecoveryMostComplete")),
            "PARTIAL_RECOVERY_MOST_COMPLETE"
        );
        assert_eq!(
            cluster_data_recovery_policy(policy("FullRecoveryOnly")),
            "FULL_RECOVERY_ONLY"
        );
        assert_eq!(cluster_data_recovery_policy(policy("Whatever")), "FULL_RECOVERY_ONLY");
    }

    #[test]
    fn checksum_tracks_only_restart_forcing_fields() {
        let base = HazelcastConfig::for_cluster(&with_persistence(0))
            .forcing_restart_checksum()
            .unwrap();

        let mut renamed = with_persistence(0);
        renamed.spec.cluster_name = "prod".into();
        let renamed = HazelcastConfig::for_cluster(&renamed)
            .forcing_restart_checksum()
            .unwrap();
        assert_ne!(base, renamed);

        let retimed = HazelcastConfig::for_cluster(&with_persistence(300))
            .forcing_restart_checksum()
            .unwrap();
        assert_eq!(base, retimed);
    }

    #[test]
    fn map_config_from_spec() {
        let spec: MapSpec = serde_json::from_value(serde_json::json!({
            "hazelcastResourceName": "hz",
            "backupCount": 2,
            "indexes": [{"type": "SORTED", "attributes": ["age"]}],
            "persistenceEnabled": true
        }))
        .unwrap();
        let cfg = HazelcastConfig::default().with_maps([("people".to_string(), &spec)]);
        let m = &cfg.map["people"];
        assert_eq!(m.backup_count, 2);
        assert_eq!(m.eviction.eviction_policy, "NONE");
        assert_eq!(m.indexes[0].type_, "SORTED");
        assert!(m.hot_restart.enabled);
    }
}
