use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Another writer updated the object since it was read; retry on the next pass.
    #[error("conflict updating {kind} {name}: object was modified concurrently")]
    Conflict { kind: String, name: String },
    #[error("invalid specification: {0}")]
    Validation(String),
    #[error("cluster API call {operation} failed: {message}")]
    ClusterApi { operation: String, message: String },
    #[error("unexpected cluster state {0:?}")]
    UnexpectedClusterState(String),
    #[error("invalid backup schedule {schedule:?}: {source}")]
    Schedule {
        schedule: String,
        #[source]
        source: cron::error::Error,
    },
}

impl ReconcileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ReconcileError::Validation(msg.into())
    }

    /// Whether re-running the same reconciliation may succeed without a spec change.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::Validation(_) | ReconcileError::Schedule { .. }
        )
    }
}
