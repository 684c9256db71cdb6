use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[kube(
    group = "hazelcast.com",
    version = "v1alpha1",
    kind = "HotBackup",
    plural = "hotbackups",
    namespaced,
    shortname = "hb"
)]
#[serde(rename_all = "camelCase")]
pub struct HotBackupSpec {
    /// Name of the Hazelcast resource in the same namespace
    pub hazelcast_resource_name: String,
    /// Cron expression; when empty the backup runs once
    #[serde(default)]
    pub schedule: String,
    /// Secret with the external storage credentials
    #[serde(default)]
    pub secret: String,
}
