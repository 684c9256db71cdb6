use std::time::Duration;

use anyhow::Context;

/// Container platform flavour. OpenShift needs explicit privilege grants for host-path volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Kubernetes,
    OpenShift,
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "kubernetes" | "k8s" => Ok(Platform::Kubernetes),
            "openshift" => Ok(Platform::OpenShift),
            other => Err(anyhow::anyhow!("unknown platform type {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorSettings {
    pub operator_namespace: String,
    pub platform: Platform,
    pub phone_home_enabled: bool,
    /// Upper bound for each call to a cluster's administrative API.
    pub cluster_api_timeout: Duration,
    pub cron_tick: Duration,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            operator_namespace: "hazelcast-operator".into(),
            platform: Platform::Kubernetes,
            phone_home_enabled: false,
            cluster_api_timeout: Duration::from_secs(10),
            cron_tick: Duration::from_millis(1000),
        }
    }
}

impl OperatorSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let platform = match lookup("PLATFORM_TYPE") {
            Some(v) => v.parse()?,
            None => defaults.platform,
        };
        let phone_home_enabled = match lookup("PHONE_HOME_ENABLED") {
            Some(v) => v
                .parse::<bool>()
                .with_context(|| format!("PHONE_HOME_ENABLED={v:?}"))?,
            None => defaults.phone_home_enabled,
        };
        let cluster_api_timeout = match lookup("CLUSTER_API_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("CLUSTER_API_TIMEOUT_SECS={v:?}"))?,
            ),
            None => defaults.cluster_api_timeout,
        };
        let cron_tick = match lookup("CRON_TICK_MILLIS") {
            Some(v) => Duration::from_millis(
                v.parse()
                    .with_context(|| format!("CRON_TICK_MILLIS={v:?}"))?,
            ),
            None => defaults.cron_tick,
        };
        Ok(Self {
            operator_namespace: lookup("OPERATOR_NAMESPACE").unwrap_or(defaults.operator_namespace),
            platform,
            phone_home_enabled,
            cluster_api_timeout,
            cron_tick,
        })
    }
}
