use std::sync::Arc;

use crate::core::app_group::{
    AppGroup, AppGroupSpec, AppGroupWorkload, AppGroupWorkloadInfo, DependenciesInfo,
    APP_GROUP_LABEL, APP_GROUP_SELECTOR_LABEL,
};
use crate::core::clock::FakeClock;
use crate::core::common::{Labels, ObjectMeta};
use crate::core::network_topology::{
    CostInfo, NetworkTopology, NetworkTopologySpec, OriginInfo, TopologyInfo, WeightInfo,
};
use crate::core::node::Node;
use crate::core::object_store::{ApiError, InMemoryObjectStore, ObjectStore};
use crate::core::pod::Pod;
use crate::core::pod_group::{PodGroup, POD_GROUP_LABEL};
use crate::core::resources::{ResourceList, RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS};
use crate::core::scheduler::framework::FrameworkHandle;
use crate::core::scheduler::waiting_pods::WaitingPods;
use crate::core::snapshot::{SharedSnapshot, Snapshot};

pub fn resource_list(cpu: i64, memory: i64) -> ResourceList {
    ResourceList::from([
        (RESOURCE_CPU.to_string(), cpu),
        (RESOURCE_MEMORY.to_string(), memory),
    ])
}

pub fn make_node(name: &str, cpu: i64, memory: i64, pods: i64) -> Node {
    let mut allocatable = resource_list(cpu, memory);
    allocatable.insert(RESOURCE_PODS.to_string(), pods);
    Node::new(name, allocatable)
}

pub fn make_pod_group(
    namespace: &str,
    name: &str,
    min_member: i32,
    min_resources: Option<ResourceList>,
) -> PodGroup {
    let mut pod_group = PodGroup::new(namespace, name, min_member);
    pod_group.spec.min_resources = min_resources;
    pod_group
}

pub fn make_pod_in_group(namespace: &str, name: &str, pod_group: &str, requests: ResourceList) -> Pod {
    Pod::new(namespace, name, requests).with_label(POD_GROUP_LABEL, pod_group)
}

/// AppGroup with one workload per `(selector, dependencies)` entry. Dependencies are
/// `(selector, max_network_cost)` pairs.
pub fn make_app_group(
    namespace: &str,
    name: &str,
    workloads: &[(&str, Vec<(&str, i64)>)],
) -> AppGroup {
    let workload_info = |selector: &str| AppGroupWorkloadInfo {
        kind: "Deployment".to_string(),
        name: selector.to_string(),
        selector: selector.to_string(),
        namespace: namespace.to_string(),
    };
    AppGroup {
        metadata: ObjectMeta::new(namespace, name),
        spec: AppGroupSpec {
            num_members: workloads.len() as i32,
            workloads: workloads
                .iter()
                .map(|(selector, dependencies)| AppGroupWorkload {
                    workload: workload_info(selector),
                    dependencies: dependencies
                        .iter()
                        .map(|(dependency, max_network_cost)| DependenciesInfo {
                            workload: workload_info(dependency),
                            max_network_cost: *max_network_cost,
                        })
                        .collect(),
                })
                .collect(),
        },
    }
}

pub fn make_app_pod(namespace: &str, name: &str, app_group: &str, selector: &str) -> Pod {
    Pod::new(namespace, name, resource_list(100, 128))
        .with_label(APP_GROUP_LABEL, app_group)
        .with_label(APP_GROUP_SELECTOR_LABEL, selector)
}

/// NetworkTopology with a single weighting scheme built from `(topology_key, origin,
/// destination, cost)` entries. Entries keep the given order, nothing is sorted.
pub fn make_network_topology(
    namespace: &str,
    name: &str,
    weights_name: &str,
    costs: &[(&str, &str, &str, i64)],
) -> NetworkTopology {
    let mut topology_list: Vec<TopologyInfo> = vec![];
    for (topology_key, origin, destination, network_cost) in costs.iter() {
        let idx = match topology_list
            .iter()
            .position(|t| t.topology_key == *topology_key)
        {
            Some(idx) => idx,
            None => {
                topology_list.push(TopologyInfo {
                    topology_key: topology_key.to_string(),
                    origin_list: vec![],
                });
                topology_list.len() - 1
            }
        };
        let origin_list = &mut topology_list[idx].origin_list;
        let origin_idx = match origin_list.iter().position(|o| o.origin == *origin) {
            Some(origin_idx) => origin_idx,
            None => {
                origin_list.push(OriginInfo {
                    origin: origin.to_string(),
                    cost_list: vec![],
                });
                origin_list.len() - 1
            }
        };
        origin_list[origin_idx].cost_list.push(CostInfo {
            destination: destination.to_string(),
            network_cost: *network_cost,
        });
    }

    NetworkTopology {
        metadata: ObjectMeta::new(namespace, name),
        spec: NetworkTopologySpec {
            weights: vec![WeightInfo {
                name: weights_name.to_string(),
                topology_list,
            }],
        },
    }
}

/// Framework handle over an in-memory store and a manual clock, plus direct access to both.
pub struct TestEnv {
    pub handle: FrameworkHandle,
    pub store: Arc<InMemoryObjectStore>,
    pub clock: Arc<FakeClock>,
}

/// `placed` pods go to the snapshot only, add them to the store separately when needed.
pub fn make_test_env(nodes: Vec<Node>, placed: &[Pod]) -> TestEnv {
    let store = Arc::new(InMemoryObjectStore::new());
    let clock = Arc::new(FakeClock::new());
    let handle = FrameworkHandle {
        snapshot: Arc::new(SharedSnapshot::new(Snapshot::new(nodes, placed))),
        object_store: store.clone(),
        waiting_pods: Arc::new(WaitingPods::new()),
        clock: clock.clone(),
    };
    TestEnv {
        handle,
        store,
        clock,
    }
}

pub fn make_framework_handle(nodes: Vec<Node>, placed: &[Pod]) -> FrameworkHandle {
    make_test_env(nodes, placed).handle
}

/// Store whose requests for objects of `failing_kind` fail as if the api server was down. Other
/// requests go to `inner`.
pub struct FailingObjectStore {
    inner: Arc<InMemoryObjectStore>,
    failing_kind: &'static str,
}

impl FailingObjectStore {
    pub fn new(inner: Arc<InMemoryObjectStore>, failing_kind: &'static str) -> Self {
        Self {
            inner,
            failing_kind,
        }
    }

    fn check(&self, kind: &str) -> Result<(), ApiError> {
        if kind == self.failing_kind {
            return Err(ApiError::Internal("connection refused".to_string()));
        }
        Ok(())
    }
}

impl ObjectStore for FailingObjectStore {
    fn get_pod_group(&self, namespace: &str, name: &str) -> Result<PodGroup, ApiError> {
        self.check("PodGroup")?;
        self.inner.get_pod_group(namespace, name)
    }

    fn get_app_group(&self, namespace: &str, name: &str) -> Result<AppGroup, ApiError> {
        self.check("AppGroup")?;
        self.inner.get_app_group(namespace, name)
    }

    fn get_network_topology(&self, namespace: &str, name: &str) -> Result<NetworkTopology, ApiError> {
        self.check("NetworkTopology")?;
        self.inner.get_network_topology(namespace, name)
    }

    fn list_pods(&self, namespace: Option<&str>, selector: &Labels) -> Result<Vec<Pod>, ApiError> {
        self.check("Pod")?;
        self.inner.list_pods(namespace, selector)
    }
}

/// Handle of `env` with requests for `failing_kind` objects failing.
pub fn with_failing_store(env: &TestEnv, failing_kind: &'static str) -> FrameworkHandle {
    FrameworkHandle {
        object_store: Arc::new(FailingObjectStore::new(env.store.clone(), failing_kind)),
        ..env.handle.clone()
    }
}
