//! Point-in-time view of the cluster which plugins read during a scheduling cycle.
//!
//! `Snapshot` is immutable once built. `SharedSnapshot` holds the current snapshot behind an
//! `Arc` and is refreshed between cycles by swapping the whole `Arc`, so concurrent readers
//! always observe one consistent view.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::core::node::Node;
use crate::core::node_info::NodeInfo;
use crate::core::pod::Pod;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("nodeinfo not found for node name {0:?}")]
    NodeNotFound(String),
    #[error("cluster snapshot is unavailable: {0}")]
    Unavailable(String),
}

/// Read access to nodes of the cluster snapshot.
pub trait SharedLister: Send + Sync {
    fn list_nodes(&self) -> Result<Vec<Arc<NodeInfo>>, SnapshotError>;
    fn get_node(&self, node_name: &str) -> Result<Arc<NodeInfo>, SnapshotError>;
}

#[derive(Default, Debug, Clone)]
pub struct Snapshot {
    // Ordered by node name so that iteration order is deterministic.
    node_infos: BTreeMap<String, Arc<NodeInfo>>,
}

impl Snapshot {
    /// Builds a snapshot from nodes and pods. Pods with an empty node name or a node name not
    /// present in `nodes` are skipped.
    pub fn new(nodes: Vec<Node>, pods: &[Pod]) -> Self {
        let mut pods_by_node: BTreeMap<&str, Vec<Pod>> = BTreeMap::new();
        for pod in pods.iter().filter(|p| p.is_assigned()) {
            pods_by_node
                .entry(pod.spec.node_name.as_str())
                .or_default()
                .push(pod.clone());
        }

        let mut node_infos = BTreeMap::new();
        for node in nodes.into_iter() {
            let node_pods = pods_by_node
                .remove(node.metadata.name.as_str())
                .unwrap_or_default();
            node_infos.insert(
                node.metadata.name.clone(),
                Arc::new(NodeInfo::new(node, node_pods)),
            );
        }
        Self { node_infos }
    }

    /// Returns new snapshot with `pod` placed on `node_name`. Node infos which are not touched
    /// are shared with the receiver.
    pub fn with_pod_assumed(&self, pod: Pod, node_name: &str) -> Result<Snapshot, SnapshotError> {
        let mut node_infos = self.node_infos.clone();
        let info = node_infos
            .get(node_name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))?;
        let mut updated = NodeInfo::clone(info);
        updated.add_pod(pod);
        node_infos.insert(node_name.to_string(), Arc::new(updated));
        Ok(Snapshot { node_infos })
    }

    /// Returns new snapshot without the pod with `uid` on `node_name`.
    pub fn with_pod_forgotten(&self, uid: &str, node_name: &str) -> Result<Snapshot, SnapshotError> {
        let mut node_infos = self.node_infos.clone();
        let info = node_infos
            .get(node_name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))?;
        let mut updated = NodeInfo::clone(info);
        updated.remove_pod(uid);
        node_infos.insert(node_name.to_string(), Arc::new(updated));
        Ok(Snapshot { node_infos })
    }
}

impl SharedLister for Snapshot {
    fn list_nodes(&self) -> Result<Vec<Arc<NodeInfo>>, SnapshotError> {
        Ok(self.node_infos.values().cloned().collect())
    }

    fn get_node(&self, node_name: &str) -> Result<Arc<NodeInfo>, SnapshotError> {
        self.node_infos
            .get(node_name)
            .cloned()
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))
    }
}

/// Holder of the current snapshot shared by the scheduler and all plugins.
#[derive(Default)]
pub struct SharedSnapshot {
    current: RwLock<Arc<Snapshot>>,
}

impl SharedSnapshot {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn load(&self) -> Result<Arc<Snapshot>, SnapshotError> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .map_err(|e| SnapshotError::Unavailable(e.to_string()))
    }

    /// Atomically replaces the current snapshot.
    pub fn update(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let mut guard = self
            .current
            .write()
            .map_err(|e| SnapshotError::Unavailable(e.to_string()))?;
        *guard = Arc::new(snapshot);
        Ok(())
    }
}

impl SharedLister for SharedSnapshot {
    fn list_nodes(&self) -> Result<Vec<Arc<NodeInfo>>, SnapshotError> {
        self.load()?.list_nodes()
    }

    fn get_node(&self, node_name: &str) -> Result<Arc<NodeInfo>, SnapshotError> {
        self.load()?.get_node(node_name)
    }
}
