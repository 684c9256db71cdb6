//! Storage providers a restore can pull backups from, and how each one gets its credentials.

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};

use crate::crds::hazelcast::RestoreConfiguration;
use crate::error::ReconcileError;
use crate::naming;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreProvider {
    /// `s3://`: access key, secret key and region from the secret
    S3,
    /// `gs://`: a credentials file mounted from the secret
    Gcs,
    /// `azblob://`: storage account and key from the secret
    AzureBlob,
}

impl RestoreProvider {
    pub fn from_bucket_uri(uri: &str) -> Result<Self, ReconcileError> {
        let scheme = uri.split_once("://").map(|(s, _)| s).unwrap_or_default();
        match scheme {
            "s3" => Ok(RestoreProvider::S3),
            "gs" => Ok(RestoreProvider::Gcs),
            "azblob" => Ok(RestoreProvider::AzureBlob),
            _ => Err(ReconcileError::validation(format!(
                "restore bucket URI {uri:?} has no supported provider scheme (s3://, gs://, azblob://)"
            ))),
        }
    }

    pub fn credential_env(&self, secret: &str) -> Vec<EnvVar> {
        match self {
            RestoreProvider::S3 => vec![
                secret_env(naming::S3_ENV_ACCESS_KEY_ID, secret, naming::S3_ACCESS_KEY_ID),
                secret_env(
                    naming::S3_ENV_SECRET_ACCESS_KEY,
                    secret,
                    naming::S3_SECRET_ACCESS_KEY,
                ),
                secret_env(naming::S3_ENV_REGION, secret, naming::S3_REGION),
            ],
            RestoreProvider::Gcs => vec![EnvVar {
                name: naming::GCP_ENV_CREDENTIAL_FILE.into(),
                value: Some(format!(
                    "{}/{}",
                    naming::GCP_CREDENTIAL_VOLUME_PATH,
                    naming::GCP_CREDENTIAL_FILE
                )),
                ..Default::default()
            }],
            RestoreProvider::AzureBlob => vec![
                secret_env(
                    naming::AZURE_ENV_STORAGE_ACCOUNT,
                    secret,
                    naming::AZURE_STORAGE_ACCOUNT,
                ),
                secret_env(naming::AZURE_ENV_STORAGE_KEY, secret, naming::AZURE_STORAGE_KEY),
            ],
        }
    }

    /// Pod volumes the provider needs besides the data volume.
    pub fn extra_volumes(&self, secret: &str) -> Vec<Volume> {
        match self {
            RestoreProvider::Gcs => vec![Volume {
                name: naming::GCP_CREDENTIAL_VOLUME_NAME.into(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            RestoreProvider::S3 | RestoreProvider::AzureBlob => Vec::new(),
        }
    }

    pub fn extra_volume_mounts(&self) -> Vec<VolumeMount> {
        match self {
            RestoreProvider::Gcs => vec![VolumeMount {
                name: naming::GCP_CREDENTIAL_VOLUME_NAME.into(),
                mount_path: naming::GCP_CREDENTIAL_VOLUME_PATH.into(),
                ..Default::default()
            }],
            RestoreProvider::S3 | RestoreProvider::AzureBlob => Vec::new(),
        }
    }
}

impl TryFrom<&RestoreConfiguration> for RestoreProvider {
    type Error = ReconcileError;

    fn try_from(rc: &RestoreConfiguration) -> Result<Self, Self::Error> {
        RestoreProvider::from_bucket_uri(&rc.bucket_uri)
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.into(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
