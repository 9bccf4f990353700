//! AppGroup custom resource: workloads of one application and network dependencies among them.

use serde::{Deserialize, Serialize};

use crate::core::common::ObjectMeta;
use crate::core::pod::Pod;

/// Label on a pod with the name of its AppGroup.
pub const APP_GROUP_LABEL: &str = "appgroup.diktyo.x-k8s.io";
/// Label on a pod with the workload selector inside its AppGroup.
pub const APP_GROUP_SELECTOR_LABEL: &str = "appgroup.diktyo.x-k8s.io.workload";

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppGroupWorkloadInfo {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DependenciesInfo {
    pub workload: AppGroupWorkloadInfo,
    /// Maximum network cost tolerated between this workload and the dependent one.
    pub max_network_cost: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppGroupWorkload {
    pub workload: AppGroupWorkloadInfo,
    #[serde(default)]
    pub dependencies: Vec<DependenciesInfo>,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppGroupSpec {
    #[serde(default)]
    pub num_members: i32,
    #[serde(default)]
    pub workloads: Vec<AppGroupWorkload>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppGroup {
    pub metadata: ObjectMeta,
    pub spec: AppGroupSpec,
}

/// Pod that is already placed and belongs to the AppGroup being scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledInfo {
    pub name: String,
    pub selector: String,
    pub replica_id: String,
    pub hostname: String,
}

pub type ScheduledList = Vec<ScheduledInfo>;

pub fn pod_app_group_label(pod: &Pod) -> &str {
    pod.metadata.label(APP_GROUP_LABEL).unwrap_or("")
}

pub fn pod_app_group_selector(pod: &Pod) -> &str {
    pod.metadata.label(APP_GROUP_SELECTOR_LABEL).unwrap_or("")
}

/// Dependencies declared for the workload of `pod`. Empty when the AppGroup has no such workload.
pub fn dependency_list(pod: &Pod, app_group: &AppGroup) -> Vec<DependenciesInfo> {
    let selector = pod_app_group_selector(pod);
    app_group
        .spec
        .workloads
        .iter()
        .find(|w| w.workload.selector == selector)
        .map(|w| w.dependencies.clone())
        .unwrap_or_default()
}

/// Placed pods of the AppGroup which carry a workload selector.
pub fn scheduled_list(pods: &[Pod]) -> ScheduledList {
    pods.iter()
        .filter(|pod| pod.is_assigned())
        .filter(|pod| !pod_app_group_selector(pod).is_empty())
        .map(|pod| ScheduledInfo {
            name: pod.metadata.name.clone(),
            selector: pod_app_group_selector(pod).to_string(),
            replica_id: pod.metadata.uid.clone(),
            hostname: pod.spec.node_name.clone(),
        })
        .collect()
}
