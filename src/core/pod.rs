//! Type definition for Pod primitive in k8s cluster

use serde::{Deserialize, Serialize};

use crate::core::common::{namespaced_name, ObjectMeta};
use crate::core::resources::ResourceList;

pub const DEFAULT_SCHEDULER_NAME: &str = "default_scheduler";

fn default_scheduler_name() -> String {
    DEFAULT_SCHEDULER_NAME.to_string()
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Resources {
    #[serde(default)]
    pub limits: ResourceList,
    #[serde(default)]
    pub requests: ResourceList,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodSpec {
    /// Simplified: instead of vector of containers - summary of container requests
    #[serde(default)]
    pub resources: Resources,
    /// Name of the node the pod is bound or assumed to. Empty while pending.
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub priority: i32,
    /// Scheduler profile which should handle this pod.
    #[serde(default = "default_scheduler_name")]
    pub scheduler_name: String,
}

impl Default for PodSpec {
    fn default() -> Self {
        Self {
            resources: Default::default(),
            node_name: Default::default(),
            priority: 0,
            scheduler_name: default_scheduler_name(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub enum PodConditionType {
    // Pod is scheduled to a node but is not bound to a node
    PodScheduled,
    // Pod passed scheduling filters but waits in permit stage for its group
    PodWaitingOnPermit,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PodCondition {
    // True, False or Unknown
    pub status: String,
    pub condition_type: PodConditionType,
    /// Human readable reason of the last transition.
    pub message: String,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodStatus {
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn new(namespace: &str, name: &str, requests: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: PodSpec {
                resources: Resources {
                    limits: requests.clone(),
                    requests,
                },
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_node_name(mut self, node_name: &str) -> Self {
        self.spec.node_name = node_name.to_string();
        self
    }

    pub fn namespaced_name(&self) -> String {
        namespaced_name(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn is_assigned(&self) -> bool {
        !self.spec.node_name.is_empty()
    }

    pub fn update_condition(
        &mut self,
        status: String,
        condition_type: PodConditionType,
        message: String,
    ) {
        let conditions = &mut self.status.conditions;
        match conditions
            .iter_mut()
            .find(|elem| elem.condition_type == condition_type)
        {
            Some(condition) => {
                condition.status = status;
                condition.message = message;
            }
            None => {
                conditions.push(PodCondition {
                    status,
                    condition_type,
                    message,
                });
            }
        }
    }

    // Ref to condition if it exists else None.
    pub fn get_condition(&self, condition_type: PodConditionType) -> Option<&PodCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}
