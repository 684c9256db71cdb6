use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use tracing::warn;

use super::metadata;
use crate::crds::hazelcast::Hazelcast;
use crate::crds::map::{Map, MapConfigState, MapSpec};
use crate::error::ReconcileError;
use crate::hz_config::HazelcastConfig;
use crate::naming;

/// Maps that may go into the live configuration, paired with the spec to render.
///
/// Persisting and successful maps are taken as they are. Failed and pending maps
/// fall back to their last successful spec, or are left out when they never had one,
/// so a broken edit never reaches the members.
pub fn persisted_maps(maps: &[Map]) -> Vec<(String, MapSpec)> {
    maps.iter()
        .filter_map(|mp| {
            let state = mp.status.as_ref().map(|s| s.state).unwrap_or_default();
            match state {
                MapConfigState::Persisting | MapConfigState::Success => {
                    Some((mp.map_name(), mp.spec.clone()))
                }
                MapConfigState::Failed | MapConfigState::Pending => {
                    last_successful_spec(mp).map(|spec| (mp.map_name(), spec))
                }
                MapConfigState::Terminating => None,
            }
        })
        .collect()
}

fn last_successful_spec(mp: &Map) -> Option<MapSpec> {
    let raw = mp
        .metadata
        .annotations
        .as_ref()?
        .get(naming::LAST_SUCCESSFUL_SPEC_ANNOTATION)?;
    match serde_json::from_str(raw) {
        Ok(spec) => Some(spec),
        Err(e) => {
            warn!(map = %mp.map_name(), error = %e, "ignoring unparsable last successful spec");
            None
        }
    }
}

pub fn config_map_data(
    h: &Hazelcast,
    maps: &[Map],
) -> Result<BTreeMap<String, String>, ReconcileError> {
    let persisted = persisted_maps(maps);
    let cfg = HazelcastConfig::for_cluster(h)
        .with_maps(persisted.iter().map(|(name, spec)| (name.clone(), spec)));
    Ok(BTreeMap::from([(
        naming::CONFIG_FILE_NAME.to_string(),
        cfg.to_yaml()?,
    )]))
}

pub fn config_map(h: &Hazelcast, maps: &[Map]) -> Result<ConfigMap, ReconcileError> {
    Ok(ConfigMap {
        metadata: metadata(h),
        data: Some(config_map_data(h, maps)?),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::map::MapStatus;
    use crate::resources::fixtures::hazelcast;

    fn map(name: &str, backup_count: i32, state: MapConfigState, last_good: Option<i32>) -> Map {
        let spec: MapSpec = serde_json::from_value(serde_json::json!({
            "hazelcastResourceName": "hz",
            "backupCount": backup_count,
        }))
        .unwrap();
        let mut mp = Map::new(name, spec.clone());
        mp.status = Some(MapStatus { state });
        if let Some(count) = last_good {
            let good = MapSpec {
                backup_count: count,
                ..spec
            };
            mp.metadata.annotations = Some(BTreeMap::from([(
                naming::LAST_SUCCESSFUL_SPEC_ANNOTATION.to_string(),
                serde_json::to_string(&good).unwrap(),
            )]));
        }
        mp
    }

    #[test]
    fn failed_map_without_history_is_excluded() {
        let maps = [map("broken", 3, MapConfigState::Failed, None)];
        assert!(persisted_maps(&maps).is_empty());
    }

    #[test]
    fn failed_map_falls_back_to_last_successful_spec() {
        let maps = [map("edited", 5, MapConfigState::Failed, Some(1))];
        let out = persisted_maps(&maps);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "edited");
        assert_eq!(out[0].1.backup_count, 1);
    }

    #[test]
    fn healthy_maps_are_taken_as_is() {
        let maps = [
            map("a", 2, MapConfigState::Success, Some(1)),
            map("b", 4, MapConfigState::Persisting, None),
            map("c", 4, MapConfigState::Terminating, Some(1)),
        ];
        let out = persisted_maps(&maps);
        let counts: Vec<_> = out.iter().map(|(n, s)| (n.as_str(), s.backup_count)).collect();
        assert_eq!(counts, [("a", 2), ("b", 4)]);
    }

    #[test]
    fn config_map_renders_maps_into_yaml() {
        let h = hazelcast(serde_json::json!({}));
        let cm = config_map(&h, &[map("people", 2, MapConfigState::Success, None)]).unwrap();
        let yaml = &cm.data.unwrap()[naming::CONFIG_FILE_NAME];
        assert!(yaml.contains("people:"));
        assert!(yaml.contains("backup-count: 2"));
    }
}
