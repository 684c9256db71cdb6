//! Client for the members' management REST endpoints.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::ResourceExt;
use serde::Deserialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::apply::ObjectKey;
use crate::crds::hazelcast::Hazelcast;
use crate::error::ReconcileError;
use crate::naming;

/// Administrative mode of the live cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Active,
    Passive,
}

impl ClusterState {
    /// Upper-case form reported in member statuses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Active => "ACTIVE",
            ClusterState::Passive => "PASSIVE",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        match raw.to_ascii_lowercase().as_str() {
            "active" => Ok(ClusterState::Active),
            "passive" => Ok(ClusterState::Passive),
            _ => Err(ReconcileError::UnexpectedClusterState(raw.to_string())),
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStateClient: Send + Sync {
    async fn get_state(&self) -> Result<ClusterState, ReconcileError>;
    async fn change_state(&self, state: ClusterState) -> Result<(), ReconcileError>;
    async fn force_start(&self) -> Result<(), ReconcileError>;
    async fn hot_backup(&self) -> Result<(), ReconcileError>;
}

#[derive(Debug, Deserialize)]
struct ManagementResponse {
    status: String,
    state: Option<String>,
    message: Option<String>,
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ReconcileError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    cluster_name: String,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        cluster_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ReconcileError> {
        Ok(Self::with_http(http_client(timeout)?, base_url, cluster_name))
    }

    /// Builds a client on top of an existing connection pool.
    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Talks to whichever member the discovery service routes to.
    pub fn for_cluster(h: &Hazelcast, http: reqwest::Client) -> Self {
        let url = format!(
            "http://{}.{}.svc.cluster.local:{}",
            h.name_any(),
            h.namespace().unwrap_or_default(),
            naming::DEFAULT_HZ_PORT
        );
        Self::with_http(http, url, h.spec.cluster_name.clone())
    }

    pub fn for_member(h: &Hazelcast, ip: &str, http: reqwest::Client) -> Self {
        let url = format!("http://{ip}:{}", naming::DEFAULT_HZ_PORT);
        Self::with_http(http, url, h.spec.cluster_name.clone())
    }

    async fn post(&self, operation: &str, extra: &str) -> Result<ManagementResponse, ReconcileError> {
        let url = format!(
            "{}/hazelcast/rest/management/cluster/{operation}",
            self.base_url
        );
        // Credentials are "<cluster name>&<password>"; the password is always empty.
        let mut body = format!("{}&", self.cluster_name);
        if !extra.is_empty() {
            body.push('&');
            body.push_str(extra);
        }
        debug!(%url, "calling cluster management API");
        let resp: ManagementResponse = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if resp.status != "success" {
            return Err(ReconcileError::ClusterApi {
                operation: operation.to_string(),
                message: resp.message.unwrap_or(resp.status),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ClusterStateClient for RestClient {
    async fn get_state(&self) -> Result<ClusterState, ReconcileError> {
        let resp = self.post("state", "").await?;
        ClusterState::parse(resp.state.as_deref().unwrap_or_default())
    }

    async fn change_state(&self, state: ClusterState) -> Result<(), ReconcileError> {
        self.post("changeState", &state.as_str().to_ascii_lowercase())
            .await
            .map(|_| ())
    }

    async fn force_start(&self) -> Result<(), ReconcileError> {
        self.post("forceStart", "").await.map(|_| ())
    }

    async fn hot_backup(&self) -> Result<(), ReconcileError> {
        self.post("hotBackup", "").await.map(|_| ())
    }
}

/// One management client per cluster, dropped when the cluster is finalized.
/// All clients share a single HTTP connection pool.
pub struct ClientRegistry {
    http: reqwest::Client,
    clients: DashMap<ObjectKey, (String, Arc<dyn ClusterStateClient>)>,
}

impl ClientRegistry {
    pub fn new(timeout: Duration) -> Result<Self, ReconcileError> {
        Ok(Self {
            http: http_client(timeout)?,
            clients: DashMap::new(),
        })
    }

    /// Cached client for `h`; rebuilt when the cluster name changed since it was created.
    pub fn client_for(&self, h: &Hazelcast) -> Arc<dyn ClusterStateClient> {
        let key = ObjectKey::of(h);
        if let Some(entry) = self.clients.get(&key)
            && entry.0 == h.spec.cluster_name
        {
            return entry.1.clone();
        }
        let client: Arc<dyn ClusterStateClient> =
            Arc::new(RestClient::for_cluster(h, self.http.clone()));
        self.clients
            .insert(key, (h.spec.cluster_name.clone(), client.clone()));
        client
    }

    /// Uncached client for one member, used to read its own view of the cluster state.
    pub fn member_client(&self, h: &Hazelcast, ip: &str) -> Arc<dyn ClusterStateClient> {
        Arc::new(RestClient::for_member(h, ip, self.http.clone()))
    }

    pub fn release(&self, key: &ObjectKey) -> bool {
        self.clients.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
