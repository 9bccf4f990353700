//! PodGroup custom resource: a set of pods which must be admitted together.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::common::{namespaced_name, ObjectMeta};
use crate::core::pod::Pod;
use crate::core::resources::ResourceList;

/// Label on a pod with the name of its PodGroup in the pod's namespace.
pub const POD_GROUP_LABEL: &str = "scheduling.x-k8s.io/pod-group";

/// Wait time used when neither PodGroup nor plugin configuration define one.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PodGroupSpec {
    /// Minimal number of pods which have to be admitted as a unit. Always at least 1.
    pub min_member: i32,
    /// Minimal aggregate resources the cluster must be able to give to the group.
    #[serde(default)]
    pub min_resources: Option<ResourceList>,
    #[serde(default)]
    pub schedule_timeout_seconds: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PodGroup {
    pub metadata: ObjectMeta,
    pub spec: PodGroupSpec,
}

impl PodGroup {
    pub fn new(namespace: &str, name: &str, min_member: i32) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: PodGroupSpec {
                min_member,
                min_resources: None,
                schedule_timeout_seconds: None,
            },
        }
    }

    pub fn full_name(&self) -> String {
        self.metadata.namespaced_name()
    }
}

/// PodGroup name from the pod label or empty string.
pub fn pod_group_label(pod: &Pod) -> &str {
    pod.metadata.label(POD_GROUP_LABEL).unwrap_or("")
}

/// `namespace/pod-group` of the pod or empty string for pods outside of any group.
pub fn pod_group_full_name(pod: &Pod) -> String {
    let pg_name = pod_group_label(pod);
    if pg_name.is_empty() {
        return String::new();
    }
    namespaced_name(&pod.metadata.namespace, pg_name)
}

/// How long pods of the group may wait in permit stage.
pub fn wait_time_duration(pg: Option<&PodGroup>, schedule_timeout: Option<Duration>) -> Duration {
    if let Some(seconds) = pg.and_then(|pg| pg.spec.schedule_timeout_seconds) {
        return Duration::from_secs(seconds.max(0) as u64);
    }
    match schedule_timeout {
        Some(timeout) if !timeout.is_zero() => timeout,
        _ => DEFAULT_WAIT_TIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_group_full_name() {
        let pod = Pod::new("ns1", "p1", Default::default());
        assert_eq!("", pod_group_full_name(&pod));

        let pod = pod.with_label(POD_GROUP_LABEL, "pg1");
        assert_eq!("ns1/pg1", pod_group_full_name(&pod));
    }

    #[test]
    fn test_wait_time_duration() {
        let mut pg = PodGroup::new("ns1", "pg1", 3);
        assert_eq!(DEFAULT_WAIT_TIME, wait_time_duration(Some(&pg), None));
        assert_eq!(
            Duration::from_secs(10),
            wait_time_duration(Some(&pg), Some(Duration::from_secs(10)))
        );
        assert_eq!(
            DEFAULT_WAIT_TIME,
            wait_time_duration(None, Some(Duration::ZERO))
        );

        pg.spec.schedule_timeout_seconds = Some(30);
        assert_eq!(
            Duration::from_secs(30),
            wait_time_duration(Some(&pg), Some(Duration::from_secs(10)))
        );
    }

    #[test]
    fn test_parse_pod_group() {
        let pg: PodGroup = serde_yaml::from_str(
            r#"
        metadata:
          name: pg1
          namespace: team-a
          uid: abc
        spec:
          min_member: 3
          min_resources:
            cpu: 3000
            memory: 3072
        "#,
        )
        .unwrap();
        assert_eq!("team-a/pg1", pg.full_name());
        assert_eq!(Some(&3000), pg.spec.min_resources.unwrap().get("cpu"));
    }
}
