//! Node together with the pods placed on it and aggregated resource accounting.

use serde::Serialize;

use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::resources::Resource;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NodeInfo {
    node: Node,
    /// Pods which are bound or assumed to this node.
    pods: Vec<Pod>,
    /// Sum of requests of all pods on the node.
    requested: Resource,
    allocatable: Resource,
}

impl NodeInfo {
    pub fn new(node: Node, pods: Vec<Pod>) -> Self {
        let allocatable = Resource::from_resource_list(node.allocatable());
        let mut requested = Resource::default();
        for pod in pods.iter() {
            requested.add(&pod.spec.resources.requests);
        }
        Self {
            node,
            pods,
            requested,
            allocatable,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn name(&self) -> &str {
        &self.node.metadata.name
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    pub fn requested(&self) -> &Resource {
        &self.requested
    }

    pub fn allocatable(&self) -> &Resource {
        &self.allocatable
    }

    pub fn add_pod(&mut self, pod: Pod) {
        self.requested.add(&pod.spec.resources.requests);
        self.pods.push(pod);
    }

    /// Removes pod by uid, returns whether it was present.
    pub fn remove_pod(&mut self, uid: &str) -> bool {
        match self.pods.iter().position(|p| p.metadata.uid == uid) {
            Some(idx) => {
                let pod = self.pods.remove(idx);
                self.requested.sub(&pod.spec.resources.requests);
                true
            }
            None => false,
        }
    }

    /// Returns a copy of this node info without the pods matching `predicate`. The receiver
    /// stays untouched, so it is safe to call on shared snapshot data.
    pub fn without_pods<F>(&self, predicate: F) -> NodeInfo
    where
        F: Fn(&Pod) -> bool,
    {
        let mut clone = self.clone();
        let removed: Vec<String> = clone
            .pods
            .iter()
            .filter(|pod| predicate(pod))
            .map(|pod| pod.metadata.uid.clone())
            .collect();
        for uid in removed.iter() {
            clone.remove_pod(uid);
        }
        clone
    }

    /// Resources left on the node: allocatable minus requested per dimension. Pods dimension is
    /// the number of free pod slots. Extended resources absent from requests are fully free.
    pub fn left_resource(&self) -> Resource {
        let mut left = Resource {
            milli_cpu: self.allocatable.milli_cpu - self.requested.milli_cpu,
            memory: self.allocatable.memory - self.requested.memory,
            ephemeral_storage: self.allocatable.ephemeral_storage
                - self.requested.ephemeral_storage,
            allowed_pod_number: self.allocatable.allowed_pod_number - self.pods.len() as i64,
            scalar_resources: Default::default(),
        };
        for (name, allocatable) in self.allocatable.scalar_resources.iter() {
            let requested = self.requested.scalar_resources.get(name).unwrap_or(&0);
            left.scalar_resources
                .insert(name.clone(), allocatable - requested);
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use crate::core::resources::{ResourceList, RESOURCE_CPU, RESOURCE_PODS};
    use crate::test_util::helpers::{make_node, resource_list};

    use super::*;

    #[test]
    fn test_left_resource() {
        let node = make_node("node1", 4000, 8192, 10);
        let pods = vec![
            Pod::new("default", "p1", resource_list(1000, 1024)),
            Pod::new("default", "p2", resource_list(500, 1024)),
        ];
        let info = NodeInfo::new(node, pods);

        let left = info.left_resource();
        assert_eq!(2500, left.milli_cpu);
        assert_eq!(6144, left.memory);
        assert_eq!(8, left.allowed_pod_number);
    }

    #[test]
    fn test_without_pods_does_not_mutate_original() {
        let node = make_node("node1", 4000, 8192, 10);
        let pods = vec![
            Pod::new("default", "p1", resource_list(1000, 1024)).with_label("group", "a"),
            Pod::new("default", "p2", resource_list(500, 1024)),
        ];
        let info = NodeInfo::new(node, pods);

        let clone = info.without_pods(|pod| pod.metadata.label("group") == Some("a"));
        assert_eq!(1, clone.pods().len());
        assert_eq!(3500, clone.left_resource().milli_cpu);
        assert_eq!(9, clone.left_resource().allowed_pod_number);

        assert_eq!(2, info.pods().len());
        assert_eq!(2500, info.left_resource().milli_cpu);
    }

    #[test]
    fn test_left_scalar_resources() {
        let mut allocatable = ResourceList::from([
            (RESOURCE_CPU.to_string(), 1000),
            (RESOURCE_PODS.to_string(), 10),
        ]);
        allocatable.insert("nvidia.com/gpu".to_string(), 4);
        allocatable.insert("example.com/foo".to_string(), 2);
        let node = Node::new("gpu-node", allocatable);
        let pod = Pod::new(
            "default",
            "p1",
            ResourceList::from([("nvidia.com/gpu".to_string(), 3)]),
        );
        let info = NodeInfo::new(node, vec![pod]);

        let left = info.left_resource();
        assert_eq!(Some(&1), left.scalar_resources.get("nvidia.com/gpu"));
        assert_eq!(Some(&2), left.scalar_resources.get("example.com/foo"));
    }
}
