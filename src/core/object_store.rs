//! Read access to api objects which scheduling plugins consume, plus a simple in-memory
//! key-value implementation used by the scheduler binary and in tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use log::debug;
use thiserror::Error;

use crate::core::app_group::AppGroup;
use crate::core::common::{namespaced_name, selector_matches, Labels};
use crate::core::network_topology::NetworkTopology;
use crate::core::pod::Pod;
use crate::core::pod_group::PodGroup;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} is invalid: {reason}")]
    Invalid {
        kind: &'static str,
        namespace: String,
        name: String,
        reason: String,
    },
    #[error("api request failed: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

pub trait ObjectStore: Send + Sync {
    fn get_pod_group(&self, namespace: &str, name: &str) -> Result<PodGroup, ApiError>;
    fn get_app_group(&self, namespace: &str, name: &str) -> Result<AppGroup, ApiError>;
    fn get_network_topology(&self, namespace: &str, name: &str)
        -> Result<NetworkTopology, ApiError>;
    /// Pods matching `selector`, in `namespace` or in all namespaces when it is `None`.
    fn list_pods(&self, namespace: Option<&str>, selector: &Labels) -> Result<Vec<Pod>, ApiError>;
}

#[derive(Default)]
pub struct StorageData {
    // All maps are keyed by `namespace/name`.
    pub pods: BTreeMap<String, Pod>,
    pub pod_groups: BTreeMap<String, PodGroup>,
    pub app_groups: BTreeMap<String, AppGroup>,
    pub network_topologies: BTreeMap<String, NetworkTopology>,
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    storage_data: RwLock<StorageData>,
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> ApiError {
    ApiError::Internal(err.to_string())
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Inserts or replaces the pod.
    pub fn add_pod(&self, pod: Pod) -> Result<(), ApiError> {
        let key = pod.namespaced_name();
        debug!("Storing pod {:?}", key);
        self.storage_data
            .write()
            .map_err(poisoned)?
            .pods
            .insert(key, pod);
        Ok(())
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ApiError> {
        Ok(self
            .storage_data
            .write()
            .map_err(poisoned)?
            .pods
            .remove(&namespaced_name(namespace, name)))
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ApiError> {
        self.storage_data
            .read()
            .map_err(poisoned)?
            .pods
            .get(&namespaced_name(namespace, name))
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                kind: "Pod",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    pub fn pods(&self) -> Result<Vec<Pod>, ApiError> {
        Ok(self
            .storage_data
            .read()
            .map_err(poisoned)?
            .pods
            .values()
            .cloned()
            .collect())
    }

    /// Rejects groups with `min_member` below 1.
    pub fn add_pod_group(&self, pod_group: PodGroup) -> Result<(), ApiError> {
        if pod_group.spec.min_member < 1 {
            return Err(ApiError::Invalid {
                kind: "PodGroup",
                namespace: pod_group.metadata.namespace.clone(),
                name: pod_group.metadata.name.clone(),
                reason: format!("min_member must be at least 1, got {}", pod_group.spec.min_member),
            });
        }
        self.storage_data
            .write()
            .map_err(poisoned)?
            .pod_groups
            .insert(pod_group.metadata.namespaced_name(), pod_group);
        Ok(())
    }

    pub fn add_app_group(&self, app_group: AppGroup) -> Result<(), ApiError> {
        self.storage_data
            .write()
            .map_err(poisoned)?
            .app_groups
            .insert(app_group.metadata.namespaced_name(), app_group);
        Ok(())
    }

    pub fn add_network_topology(&self, network_topology: NetworkTopology) -> Result<(), ApiError> {
        self.storage_data
            .write()
            .map_err(poisoned)?
            .network_topologies
            .insert(network_topology.metadata.namespaced_name(), network_topology);
        Ok(())
    }
}

fn lookup<T: Clone>(
    map: &BTreeMap<String, T>,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> Result<T, ApiError> {
    map.get(&namespaced_name(namespace, name))
        .cloned()
        .ok_or_else(|| ApiError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

impl ObjectStore for InMemoryObjectStore {
    fn get_pod_group(&self, namespace: &str, name: &str) -> Result<PodGroup, ApiError> {
        let data = self.storage_data.read().map_err(poisoned)?;
        lookup(&data.pod_groups, "PodGroup", namespace, name)
    }

    fn get_app_group(&self, namespace: &str, name: &str) -> Result<AppGroup, ApiError> {
        let data = self.storage_data.read().map_err(poisoned)?;
        lookup(&data.app_groups, "AppGroup", namespace, name)
    }

    fn get_network_topology(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<NetworkTopology, ApiError> {
        let data = self.storage_data.read().map_err(poisoned)?;
        lookup(&data.network_topologies, "NetworkTopology", namespace, name)
    }

    fn list_pods(&self, namespace: Option<&str>, selector: &Labels) -> Result<Vec<Pod>, ApiError> {
        let data = self.storage_data.read().map_err(poisoned)?;
        Ok(data
            .pods
            .values()
            .filter(|pod| namespace.map_or(true, |ns| pod.metadata.namespace == ns))
            .filter(|pod| selector_matches(selector, &pod.metadata.labels))
            .cloned()
            .collect())
    }
}
