//! Type definitions for node specification and state used in the cluster snapshot and cluster files

use serde::{Deserialize, Serialize};

use crate::core::common::ObjectMeta;
use crate::core::resources::ResourceList;

pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeStatus {
    // Total amount of resources
    pub capacity: ResourceList,
    // Resources available for pods, defaults to capacity when omitted.
    #[serde(default)]
    pub allocatable: ResourceList,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Node {
    pub metadata: ObjectMeta,
    pub status: NodeStatus,
}

impl Node {
    pub fn new(name: &str, allocatable: ResourceList) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                uid: name.to_string(),
                namespace: String::new(),
                ..Default::default()
            },
            status: NodeStatus {
                capacity: allocatable.clone(),
                allocatable,
            },
        }
    }

    pub fn with_topology(mut self, region: &str, zone: &str) -> Self {
        if !region.is_empty() {
            self.metadata
                .labels
                .insert(LABEL_TOPOLOGY_REGION.to_string(), region.to_string());
        }
        if !zone.is_empty() {
            self.metadata
                .labels
                .insert(LABEL_TOPOLOGY_ZONE.to_string(), zone.to_string());
        }
        self
    }

    /// Allocatable resources, falling back to capacity for nodes declared without them.
    pub fn allocatable(&self) -> &ResourceList {
        if self.status.allocatable.is_empty() {
            &self.status.capacity
        } else {
            &self.status.allocatable
        }
    }

    /// Region label or empty string when not defined.
    pub fn region(&self) -> &str {
        self.metadata.label(LABEL_TOPOLOGY_REGION).unwrap_or("")
    }

    /// Zone label or empty string when not defined.
    pub fn zone(&self) -> &str {
        self.metadata.label(LABEL_TOPOLOGY_ZONE).unwrap_or("")
    }
}
