//! Names, labels and annotation keys shared by the controllers.

pub const OPERATOR_NAME: &str = "hazelcast-platform-operator";
pub const FIELD_MANAGER: &str = "hazelcast-operator";
pub const FINALIZER: &str = "hazelcast.com/finalizer";

pub const HAZELCAST: &str = "hazelcast";
pub const BACKUP_AGENT: &str = "backup-agent";
pub const RESTORE_AGENT: &str = "restore-agent";

pub const HAZELCAST_PORT_NAME: &str = "hazelcast-port";
pub const BACKUP_AGENT_PORT_NAME: &str = "backup-agent-port";
pub const DEFAULT_HZ_PORT: i32 = 5701;
pub const DEFAULT_AGENT_PORT: i32 = 8080;

pub const HAZELCAST_STORAGE_NAME: &str = "hazelcast-storage";
pub const HAZELCAST_MOUNT_PATH: &str = "/data/hazelcast";
pub const PERSISTENCE_VOLUME_NAME: &str = "hot-restart-persistence";
pub const CONFIG_FILE_NAME: &str = "hazelcast.yaml";

pub const LICENSE_DATA_KEY: &str = "license-key";
pub const LICENSE_KEY_ENV: &str = "HZ_LICENSEKEY";

// Labels
pub const APPLICATION_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APPLICATION_INSTANCE_NAME_LABEL: &str = "app.kubernetes.io/instance";
pub const APPLICATION_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";
pub const SERVICE_PER_POD_LABEL_NAME: &str = "hazelcast.com/service-per-pod";
pub const LABEL_VALUE_TRUE: &str = "true";

// Annotations
pub const LAST_SUCCESSFUL_SPEC_ANNOTATION: &str = "hazelcast.com/last-successful-spec";
pub const CONVERGED_TOPOLOGY_ANNOTATION: &str = "hazelcast.com/last-converged-topology";
pub const EXPOSE_EXTERNALLY_ANNOTATION: &str = "hazelcast.com/expose-externally-member-access";
pub const CONFIG_FORCING_RESTART_CHECKSUM: &str =
    "hazelcast.com/current-hazelcast-config-forcing-restart-checksum";

// Restore credentials
pub const S3_ACCESS_KEY_ID: &str = "access-key-id";
pub const S3_SECRET_ACCESS_KEY: &str = "secret-access-key";
pub const S3_REGION: &str = "region";
pub const S3_ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const S3_ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const S3_ENV_REGION: &str = "AWS_REGION";

pub const GCP_CREDENTIAL_FILE: &str = "google-credentials-path";
pub const GCP_CREDENTIAL_VOLUME_NAME: &str = "gcp-credentials";
pub const GCP_CREDENTIAL_VOLUME_PATH: &str = "/var/secrets/gcp";
pub const GCP_ENV_CREDENTIAL_FILE: &str = "GOOGLE_APPLICATION_CREDENTIALS";

pub const AZURE_STORAGE_ACCOUNT: &str = "storage-account";
pub const AZURE_STORAGE_KEY: &str = "storage-key";
pub const AZURE_ENV_STORAGE_ACCOUNT: &str = "AZURE_STORAGE_ACCOUNT";
pub const AZURE_ENV_STORAGE_KEY: &str = "AZURE_STORAGE_KEY";

// Container state reasons
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
