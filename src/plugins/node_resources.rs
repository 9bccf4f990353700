//! Resource-based filtering and scoring of nodes.

use std::sync::Arc;

use crate::config::{ConfigError, PluginArgs};
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;
use crate::core::resources::{
    Resource, RESOURCE_CPU, RESOURCE_EPHEMERAL_STORAGE, RESOURCE_MEMORY, RESOURCE_PODS,
};
use crate::core::scheduler::cycle_state::CycleState;
use crate::core::scheduler::framework::FrameworkHandle;
use crate::core::scheduler::interface::{FilterPlugin, Plugin, ScorePlugin, MAX_NODE_SCORE};
use crate::core::scheduler::status::Status;
use crate::core::snapshot::SharedLister;

pub const FIT_NAME: &str = "Fit";
pub const LEAST_ALLOCATED_NAME: &str = "LeastAllocatedResources";

// Fit is a plugin that checks if a node has sufficient resources.
pub struct Fit {}

pub fn new_fit(_args: &PluginArgs, _handle: &FrameworkHandle) -> Result<Arc<dyn Plugin>, ConfigError> {
    Ok(Arc::new(Fit {}))
}

impl Plugin for Fit {
    fn name(&self) -> &'static str {
        FIT_NAME
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for Fit {
    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        let insufficient = insufficient_resources(pod, node_info);
        if insufficient.is_empty() {
            return Status::success();
        }
        Status::unschedulable(
            insufficient
                .iter()
                .map(|name| format!("Insufficient {}", name))
                .collect::<Vec<String>>()
                .join(", "),
        )
    }
}

/// Names of resources the node lacks to host the pod. Nodes which do not report pod capacity
/// are not limited by pod count.
fn insufficient_resources(pod: &Pod, node_info: &NodeInfo) -> Vec<String> {
    let left = node_info.left_resource();
    let request = Resource::from_resource_list(&pod.spec.resources.requests);
    let mut insufficient = vec![];

    if node_info.allocatable().allowed_pod_number > 0 && left.allowed_pod_number < 1 {
        insufficient.push(RESOURCE_PODS.to_string());
    }
    if request.milli_cpu > left.milli_cpu {
        insufficient.push(RESOURCE_CPU.to_string());
    }
    if request.memory > left.memory {
        insufficient.push(RESOURCE_MEMORY.to_string());
    }
    if request.ephemeral_storage > left.ephemeral_storage {
        insufficient.push(RESOURCE_EPHEMERAL_STORAGE.to_string());
    }
    for (name, quantity) in request.scalar_resources.iter() {
        if *quantity > *left.scalar_resources.get(name).unwrap_or(&0) {
            insufficient.push(name.clone());
        }
    }
    insufficient
}

// Least allocated resources plugin is a score plugin. Its score means that after adding pod's
// requests to what is already requested on the node, the node with the highest free
// percentage (relatively to allocatable) is prioritized for scheduling.
//
// Weights for cpu and memory are equal.
pub struct LeastAllocatedResources {
    snapshot: Arc<dyn SharedLister>,
}

pub fn new_least_allocated(
    _args: &PluginArgs,
    handle: &FrameworkHandle,
) -> Result<Arc<dyn Plugin>, ConfigError> {
    Ok(Arc::new(LeastAllocatedResources {
        snapshot: handle.snapshot.clone(),
    }))
}

impl Plugin for LeastAllocatedResources {
    fn name(&self) -> &'static str {
        LEAST_ALLOCATED_NAME
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

fn least_allocated_score(requested: i64, allocatable: i64) -> i64 {
    if allocatable == 0 || requested > allocatable {
        return 0;
    }
    (allocatable - requested) * MAX_NODE_SCORE / allocatable
}

impl ScorePlugin for LeastAllocatedResources {
    fn score(&self, _state: &CycleState, pod: &Pod, node_name: &str) -> Result<i64, Status> {
        let node_info = self
            .snapshot
            .get_node(node_name)
            .map_err(|e| Status::error(e.to_string()))?;
        let mut requested = node_info.requested().clone();
        requested.add(&pod.spec.resources.requests);
        let allocatable = node_info.allocatable();

        let cpu_score = least_allocated_score(requested.milli_cpu, allocatable.milli_cpu);
        let memory_score = least_allocated_score(requested.memory, allocatable.memory);
        Ok((cpu_score + memory_score) / 2)
    }
}
