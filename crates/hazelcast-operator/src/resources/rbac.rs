use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::core::ObjectMeta;

use super::{labels, metadata};
use crate::crds::hazelcast::Hazelcast;
use crate::settings::Platform;

/// Lets members discover each other through the API server. Cluster scoped, so no owner reference.
pub fn cluster_role(h: &Hazelcast, platform: Platform) -> ClusterRole {
    let mut rules = vec![PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(
            ["endpoints", "pods", "nodes", "services", "secrets"]
                .into_iter()
                .map(String::from)
                .collect(),
        ),
        verbs: vec!["get".into(), "list".into()],
        ..Default::default()
    }];
    if platform == Platform::OpenShift {
        rules.push(PolicyRule {
            api_groups: Some(vec!["security.openshift.io".into()]),
            resources: Some(vec!["securitycontextconstraints".into()]),
            verbs: vec!["use".into()],
            ..Default::default()
        });
    }
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(h.cluster_scoped_name()),
            labels: Some(labels(h)),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

pub fn service_account(h: &Hazelcast) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(h),
        ..Default::default()
    }
}

pub fn cluster_role_binding(h: &Hazelcast) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(h.cluster_scoped_name()),
            labels: Some(labels(h)),
            ..Default::default()
        },
        role_ref: role_ref(h),
        subjects: Some(subjects(h)),
    }
}

pub fn role_ref(h: &Hazelcast) -> RoleRef {
    RoleRef {
        api_group: "rbac.authorization.k8s.io".into(),
        kind: "ClusterRole".into(),
        name: h.cluster_scoped_name(),
    }
}

pub fn subjects(h: &Hazelcast) -> Vec<Subject> {
    vec![Subject {
        kind: "ServiceAccount".into(),
        name: h.metadata.name.clone().unwrap_or_default(),
        namespace: h.metadata.namespace.clone(),
        api_group: None,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures::hazelcast;

    #[test]
    fn cluster_scoped_objects_are_named_after_namespace() {
        let h = hazelcast(serde_json::json!({}));
        let role = cluster_role(&h, Platform::Kubernetes);
        assert_eq!(role.metadata.name.as_deref(), Some("hz-default"));
        assert!(role.metadata.owner_references.is_none());
        assert_eq!(role.rules.as_ref().unwrap().len(), 1);

        let crb = cluster_role_binding(&h);
        assert_eq!(crb.role_ref.name, "hz-default");
        let subject = &crb.subjects.unwrap()[0];
        assert_eq!(subject.name, "hz");
        assert_eq!(subject.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn openshift_adds_scc_rule() {
        let h = hazelcast(serde_json::json!({}));
        let role = cluster_role(&h, Platform::OpenShift);
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].verbs, vec!["use".to_string()]);
    }
}
