use k8s_openapi::api::core::v1::{
    Affinity, LocalObjectReference, ResourceRequirements, Toleration, TopologySpreadConstraint,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "hazelcast.com",
    version = "v1alpha1",
    kind = "Hazelcast",
    plural = "hazelcasts",
    namespaced,
    status = "HazelcastStatus",
    shortname = "hz"
)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastSpec {
    /// Number of members in the cluster
    #[serde(default = "default_cluster_size")]
    pub cluster_size: i32,
    #[serde(default = "default_repository")]
    pub repository: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub image_pull_policy: Option<String>,
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
    /// Name of the Secret holding the enterprise license under `license-key`
    #[serde(default)]
    pub license_key_secret: String,
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    pub expose_externally: Option<ExposeExternallyConfiguration>,
    pub persistence: Option<PersistenceConfiguration>,
    pub scheduling: Option<SchedulingConfiguration>,
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub agent: AgentConfiguration,
}

fn default_cluster_size() -> i32 {
    3
}
fn default_repository() -> String {
    "docker.io/hazelcast/hazelcast".into()
}
fn default_version() -> String {
    "5.1.2".into()
}
fn default_cluster_name() -> String {
    "dev".into()
}

/// Image of the backup/restore agent running next to the members.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfiguration {
    #[serde(default = "default_agent_repository")]
    pub repository: String,
    #[serde(default = "default_agent_version")]
    pub version: String,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            repository: default_agent_repository(),
            version: default_agent_version(),
        }
    }
}

fn default_agent_repository() -> String {
    "docker.io/hazelcast/platform-operator-agent".into()
}
fn default_agent_version() -> String {
    "0.1.0".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum ExposeExternallyType {
    /// One service, clients talk to a single member
    Unisocket,
    /// One service per member, clients route to the owning member
    Smart,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
pub enum MemberAccess {
    #[default]
    NodePortExternalIP,
    NodePortNodeName,
    LoadBalancer,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeExternallyConfiguration {
    #[serde(rename = "type", default = "default_expose_type")]
    pub type_: ExposeExternallyType,
    /// Service type of the discovery service: NodePort or LoadBalancer
    #[serde(default = "default_discovery_service_type")]
    pub discovery_service_type: String,
    /// How members are reached from outside; only valid for Smart
    pub member_access: Option<MemberAccess>,
}

fn default_expose_type() -> ExposeExternallyType {
    ExposeExternallyType::Smart
}
fn default_discovery_service_type() -> String {
    "LoadBalancer".into()
}

impl ExposeExternallyConfiguration {
    pub fn is_smart(&self) -> bool {
        self.type_ == ExposeExternallyType::Smart
    }

    pub fn member_access(&self) -> MemberAccess {
        self.member_access.unwrap_or_default()
    }

    pub fn uses_node_name(&self) -> bool {
        self.member_access() == MemberAccess::NodePortNodeName
    }

    pub fn discovery_service_type(&self) -> &str {
        if self.discovery_service_type.is_empty() {
            "LoadBalancer"
        } else {
            &self.discovery_service_type
        }
    }

    pub fn member_access_service_type(&self) -> &'static str {
        match self.member_access() {
            MemberAccess::LoadBalancer => "LoadBalancer",
            MemberAccess::NodePortExternalIP | MemberAccess::NodePortNodeName => "NodePort",
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
pub enum DataRecoveryPolicy {
    #[default]
    FullRecoveryOnly,
    PartialRecoveryMostRecent,
    PartialRecoveryMostComplete,
}

/// Unknown policies fall back to full recovery only.
impl From<&str> for DataRecoveryPolicy {
    fn from(token: &str) -> Self {
        match token {
            "PartialRecoveryMostRecent" => DataRecoveryPolicy::PartialRecoveryMostRecent,
            "PartialRecoveryMostComplete" => DataRecoveryPolicy::PartialRecoveryMostComplete,
            _ => DataRecoveryPolicy::FullRecoveryOnly,
        }
    }
}

impl<'de> Deserialize<'de> for DataRecoveryPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let token = String::deserialize(d)?;
        Ok(DataRecoveryPolicy::from(token.as_str()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
pub enum BackupType {
    /// Backups stay on the member volumes
    #[default]
    Disk,
    /// A backup-agent sidecar ships backups to a bucket
    External,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfiguration {
    /// Persistence is enabled when the base directory is set
    #[serde(default)]
    pub base_dir: String,
    #[serde(default)]
    pub cluster_data_recovery_policy: DataRecoveryPolicy,
    /// Force-start members stuck in a crash loop while the cluster is passive
    #[serde(default)]
    pub auto_force_start: bool,
    /// Overrides validation and data-load timeouts, in seconds
    #[serde(default)]
    pub data_recovery_timeout: i32,
    #[serde(default)]
    pub backup_type: BackupType,
    /// Node directory used instead of provisioned volumes
    #[serde(default)]
    pub host_path: String,
    pub pvc: Option<PersistencePvcConfiguration>,
    pub restore: Option<RestoreConfiguration>,
}

impl PersistenceConfiguration {
    pub fn is_enabled(&self) -> bool {
        !self.base_dir.is_empty()
    }

    pub fn uses_host_path(&self) -> bool {
        !self.host_path.is_empty()
    }

    pub fn is_external(&self) -> bool {
        self.is_enabled() && self.backup_type == BackupType::External
    }

    pub fn is_restore_enabled(&self) -> bool {
        self.is_enabled() && self.restore.is_some()
    }

    pub fn auto_remove_stale_data(&self) -> bool {
        self.cluster_data_recovery_policy != DataRecoveryPolicy::FullRecoveryOnly
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistencePvcConfiguration {
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
    pub request_storage: Option<Quantity>,
    pub storage_class_name: Option<String>,
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".into()]
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreConfiguration {
    /// Source of the backup, e.g. s3://bucket/path, gs://bucket, azblob://container
    #[serde(rename = "bucketURI", default)]
    pub bucket_uri: String,
    /// Secret with the storage provider credentials
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConfiguration {
    pub affinity: Option<Affinity>,
    pub tolerations: Option<Vec<Toleration>>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,
}

impl HazelcastSpec {
    pub fn exposes_externally(&self) -> bool {
        self.expose_externally.is_some()
    }

    /// Smart routing with one externally reachable service per member.
    pub fn is_smart(&self) -> bool {
        self.expose_externally.as_ref().is_some_and(|e| e.is_smart())
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence.as_ref().is_some_and(|p| p.is_enabled())
    }

    pub fn persistence_external(&self) -> bool {
        self.persistence.as_ref().is_some_and(|p| p.is_external())
    }

    pub fn restore(&self) -> Option<&RestoreConfiguration> {
        self.persistence
            .as_ref()
            .filter(|p| p.is_restore_enabled())
            .and_then(|p| p.restore.as_ref())
    }

    pub fn is_enterprise(&self) -> bool {
        self.repository.contains("hazelcast-enterprise")
    }

    pub fn docker_image(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }

    pub fn agent_docker_image(&self) -> String {
        format!("{}:{}", self.agent.repository, self.agent.version)
    }
}

impl Hazelcast {
    /// Name for objects without a namespace (ClusterRole, ClusterRoleBinding).
    pub fn cluster_scoped_name(&self) -> String {
        format!(
            "{}-{}",
            self.metadata.name.as_deref().unwrap_or_default(),
            self.metadata.namespace.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Terminating,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
pub enum RestoreState {
    #[default]
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub cluster: HazelcastClusterStatus,
    pub message: Option<String>,
    #[serde(default)]
    pub members: Vec<HazelcastMemberStatus>,
    pub restore: Option<RestoreStatus>,
    #[serde(default)]
    pub external_addresses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastClusterStatus {
    /// e.g. "2/3"
    #[serde(default)]
    pub ready_members: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HazelcastMemberStatus {
    pub pod_name: String,
    pub ip: Option<String>,
    #[serde(default)]
    pub ready: bool,
    /// Last cluster state reported by the member, e.g. "ACTIVE" or "PASSIVE"
    pub state: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub restart_count: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct RestoreStatus {
    pub state: RestoreState,
}
