use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "hazelcast.com",
    version = "v1alpha1",
    kind = "Map",
    plural = "maps",
    namespaced,
    status = "MapStatus",
    shortname = "hzmap"
)]
#[serde(rename_all = "camelCase")]
pub struct MapSpec {
    /// Map name inside the cluster; defaults to the resource name
    pub name: Option<String>,
    pub hazelcast_resource_name: String,
    #[serde(default = "default_backup_count")]
    pub backup_count: i32,
    #[serde(default)]
    pub time_to_live_seconds: i32,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub persistence_enabled: bool,
}

fn default_backup_count() -> i32 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvictionConfig {
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,
    #[serde(default)]
    pub max_size: i32,
    #[serde(default = "default_max_size_policy")]
    pub max_size_policy: String,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            eviction_policy: default_eviction_policy(),
            max_size: 0,
            max_size_policy: default_max_size_policy(),
        }
    }
}

fn default_eviction_policy() -> String {
    "NONE".into()
}
fn default_max_size_policy() -> String {
    "PER_NODE".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    pub name: Option<String>,
    /// SORTED, HASH or BITMAP
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    pub bitmap_index_options: Option<BitmapIndexOptions>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BitmapIndexOptions {
    pub unique_key: String,
    pub unique_key_transition: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
pub enum MapConfigState {
    #[default]
    Pending,
    Persisting,
    Success,
    Failed,
    Terminating,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct MapStatus {
    #[serde(default)]
    pub state: MapConfigState,
}

impl Map {
    pub fn map_name(&self) -> String {
        self.spec.name.clone().unwrap_or_else(|| self.name_any())
    }
}
