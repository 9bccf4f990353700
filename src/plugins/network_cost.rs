//! Network cost aware placement: nodes are filtered and scored by network costs between them and
//! the nodes of already placed pods the pod depends on, as declared by the pod's AppGroup and
//! measured by a NetworkTopology.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, info, trace};

use crate::config::{ConfigError, PluginArgs};
use crate::core::app_group::{
    dependency_list, pod_app_group_label, scheduled_list, AppGroup, DependenciesInfo,
    ScheduledList, APP_GROUP_LABEL,
};
use crate::core::common::Labels;
use crate::core::network_topology::{
    find_origin_costs, find_topology_key, CostKey, NetworkTopology, WeightInfo,
    NETWORK_TOPOLOGY_NETPERF_COSTS, NETWORK_TOPOLOGY_REGION, NETWORK_TOPOLOGY_ZONE,
};
use crate::core::node_info::NodeInfo;
use crate::core::object_store::{ApiError, ObjectStore};
use crate::core::pod::Pod;
use crate::core::scheduler::cycle_state::CycleState;
use crate::core::scheduler::framework::FrameworkHandle;
use crate::core::scheduler::interface::{
    FilterPlugin, NodeScore, Plugin, PreFilterPlugin, ScorePlugin, MAX_NODE_SCORE, MIN_NODE_SCORE,
};
use crate::core::scheduler::status::{Code, Status};
use crate::core::snapshot::{SharedLister, SnapshotError};

pub const NAME: &str = "NetworkCostAware";

/// Cost of a dependency when nothing is known about the distance.
pub const MAX_COST: i64 = 100;
/// Cost of a dependency placed on the same node.
pub const SAME_HOSTNAME: i64 = 0;
/// Cost of a dependency placed on another node of the same zone.
pub const SAME_ZONE: i64 = 1;

pub type CostMap = HashMap<CostKey, i64>;

/// Data computed at pre-filter stage for filter and score stages of the same cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCostState {
    /// The pod has no dependencies to account for, every node is equally good.
    ScoreEqually,
    Computed(Box<ComputedCosts>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedCosts {
    pub app_group_name: String,
    pub dependency_list: Vec<DependenciesInfo>,
    pub scheduled_list: ScheduledList,
    /// Costs from the region and zone of each node.
    pub node_cost_map: BTreeMap<String, CostMap>,
    pub satisfied_map: BTreeMap<String, i64>,
    pub violated_map: BTreeMap<String, i64>,
    pub final_cost_map: BTreeMap<String, i64>,
}

pub struct NetworkCostAware {
    object_store: Arc<dyn ObjectStore>,
    snapshot: Arc<dyn SharedLister>,
    namespaces: Vec<String>,
    weights_name: String,
    network_topology_name: String,
}

pub fn new(args: &PluginArgs, handle: &FrameworkHandle) -> Result<Arc<dyn Plugin>, ConfigError> {
    let args = &args.network_cost_aware;
    if args.namespaces.is_empty() {
        return Err(ConfigError::InvalidArgs(
            "network cost namespaces must not be empty".to_string(),
        ));
    }
    if args.weights_name.is_empty() || args.network_topology_name.is_empty() {
        return Err(ConfigError::InvalidArgs(
            "network cost weights_name and network_topology_name must be set".to_string(),
        ));
    }
    info!(
        "Creating {} plugin, namespaces {:?}, weights {:?}, network topology {:?}",
        NAME, args.namespaces, args.weights_name, args.network_topology_name
    );
    Ok(Arc::new(NetworkCostAware {
        object_store: handle.object_store.clone(),
        snapshot: handle.snapshot.clone(),
        namespaces: args.namespaces.clone(),
        weights_name: args.weights_name.clone(),
        network_topology_name: args.network_topology_name.clone(),
    }))
}

/// Where a dependency is relative to the evaluated node.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Distance {
    SameHost,
    SameZone,
    Cost(i64),
    /// The cost map has no entry for this pair.
    NoCostEntry,
    /// The dependency runs on a node without region and zone.
    UndefinedTopology,
}

struct NodeLocation<'a> {
    name: &'a str,
    region: &'a str,
    zone: &'a str,
    cost_map: &'a CostMap,
}

impl NetworkCostAware {
    /// Looks the AppGroup up in the configured namespaces in order. Only a missing object moves
    /// the lookup on to the next namespace, any other store failure is returned.
    fn find_app_group(&self, name: &str) -> Result<Option<AppGroup>, ApiError> {
        for namespace in self.namespaces.iter() {
            trace!("Looking for AppGroup {:?} in namespace {:?}", name, namespace);
            match self.object_store.get_app_group(namespace, name) {
                Ok(app_group) if !app_group.metadata.uid.is_empty() => return Ok(Some(app_group)),
                Ok(_) => {}
                Err(err) if err.is_not_found() => debug!("Cannot get AppGroup: {}", err),
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn find_network_topology(&self) -> Result<Option<NetworkTopology>, ApiError> {
        for namespace in self.namespaces.iter() {
            trace!(
                "Looking for NetworkTopology {:?} in namespace {:?}",
                self.network_topology_name,
                namespace
            );
            match self
                .object_store
                .get_network_topology(namespace, &self.network_topology_name)
            {
                Ok(topology) if !topology.metadata.uid.is_empty() => return Ok(Some(topology)),
                Ok(_) => {}
                Err(err) if err.is_not_found() => debug!("Cannot get NetworkTopology: {}", err),
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Manually defined weights may come in any order, measured ones are kept sorted.
    fn sort_network_topology_costs(&self, topology: &mut NetworkTopology) {
        if self.weights_name != NETWORK_TOPOLOGY_NETPERF_COSTS {
            topology.sort_costs();
        }
    }

    /// Costs from the region and the zone of a node to their destinations.
    fn populate_cost_map(&self, weight: Option<&WeightInfo>, region: &str, zone: &str) -> CostMap {
        let mut cost_map = CostMap::new();
        let Some(weight) = weight else {
            return cost_map;
        };
        for (topology_key, origin) in [(NETWORK_TOPOLOGY_REGION, region), (NETWORK_TOPOLOGY_ZONE, zone)] {
            if origin.is_empty() {
                continue;
            }
            let origins = find_topology_key(&weight.topology_list, topology_key);
            for cost in find_origin_costs(origins, origin).iter() {
                cost_map.insert(
                    CostKey {
                        origin: origin.to_string(),
                        destination: cost.destination.clone(),
                    },
                    cost.network_cost,
                );
            }
        }
        cost_map
    }

    fn distance(
        &self,
        node: &NodeLocation,
        hostname: &str,
    ) -> Result<Distance, SnapshotError> {
        if hostname == node.name {
            return Ok(Distance::SameHost);
        }
        let other: Arc<NodeInfo> = self.snapshot.get_node(hostname)?;
        let other_region = other.node().region();
        let other_zone = other.node().zone();

        if other_region.is_empty() && other_zone.is_empty() {
            return Ok(Distance::UndefinedTopology);
        }
        let key = if node.region == other_region {
            if node.zone == other_zone {
                return Ok(Distance::SameZone);
            }
            CostKey {
                origin: node.zone.to_string(),
                destination: other_zone.to_string(),
            }
        } else {
            CostKey {
                origin: node.region.to_string(),
                destination: other_region.to_string(),
            }
        };
        Ok(match node.cost_map.get(&key) {
            Some(cost) => Distance::Cost(*cost),
            None => Distance::NoCostEntry,
        })
    }

    /// Number of dependencies of the pod which the node satisfies and violates. A dependency
    /// without a cost entry counts as neither.
    fn check_max_network_cost_requirements(
        &self,
        scheduled: &ScheduledList,
        dependencies: &[DependenciesInfo],
        node: &NodeLocation,
    ) -> Result<(i64, i64), SnapshotError> {
        let mut satisfied = 0;
        let mut violated = 0;
        for placed in scheduled.iter().filter(|placed| !placed.hostname.is_empty()) {
            for dependency in dependencies
                .iter()
                .filter(|d| d.workload.selector == placed.selector)
            {
                match self.distance(node, &placed.hostname)? {
                    Distance::SameHost | Distance::SameZone => satisfied += 1,
                    Distance::UndefinedTopology => violated += 1,
                    Distance::Cost(cost) if cost <= dependency.max_network_cost => satisfied += 1,
                    Distance::Cost(_) => violated += 1,
                    Distance::NoCostEntry => {}
                }
            }
        }
        Ok((satisfied, violated))
    }

    /// Sum of costs to every dependency of the pod. Unknown distances cost `MAX_COST`.
    fn accumulated_cost(
        &self,
        scheduled: &ScheduledList,
        dependencies: &[DependenciesInfo],
        node: &NodeLocation,
    ) -> Result<i64, SnapshotError> {
        let mut cost = 0;
        for placed in scheduled.iter() {
            for _ in dependencies
                .iter()
                .filter(|d| d.workload.selector == placed.selector)
            {
                cost += match self.distance(node, &placed.hostname)? {
                    Distance::SameHost => SAME_HOSTNAME,
                    Distance::SameZone => SAME_ZONE,
                    Distance::Cost(value) => value,
                    Distance::NoCostEntry | Distance::UndefinedTopology => MAX_COST,
                };
            }
        }
        Ok(cost)
    }
}

impl Plugin for NetworkCostAware {
    fn name(&self) -> &'static str {
        NAME
    }

    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        Some(self)
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl PreFilterPlugin for NetworkCostAware {
    fn pre_filter(&self, state: &mut CycleState, pod: &Pod) -> Status {
        // Filter and score always find some state, even after an early return.
        state.write_network_cost(NetworkCostState::ScoreEqually);

        let app_group_name = pod_app_group_label(pod);
        if app_group_name.is_empty() {
            return Status::new(Code::Success, "Pod does not belong to an AppGroup");
        }

        let app_group = match self.find_app_group(app_group_name) {
            Ok(Some(app_group)) => app_group,
            Ok(None) => {
                debug!("AppGroup {:?} not found, scoring nodes equally", app_group_name);
                return Status::success();
            }
            Err(err) => {
                return Status::error(format!(
                    "Error while getting AppGroup {}: {}",
                    app_group_name, err
                ))
            }
        };
        let mut network_topology = match self.find_network_topology() {
            Ok(Some(network_topology)) => network_topology,
            Ok(None) => {
                debug!(
                    "NetworkTopology {:?} not found, scoring nodes equally",
                    self.network_topology_name
                );
                return Status::success();
            }
            Err(err) => {
                return Status::error(format!(
                    "Error while getting NetworkTopology {}: {}",
                    self.network_topology_name, err
                ))
            }
        };
        self.sort_network_topology_costs(&mut network_topology);

        let dependencies = dependency_list(pod, &app_group);
        if dependencies.is_empty() {
            return Status::success();
        }

        let selector = Labels::from([(APP_GROUP_LABEL.to_string(), app_group_name.to_string())]);
        let pods = match self.object_store.list_pods(None, &selector) {
            Ok(pods) => pods,
            Err(err) => {
                return Status::error(format!(
                    "Error while listing pods of AppGroup {}: {}",
                    app_group_name, err
                ))
            }
        };
        if pods.is_empty() {
            return Status::success();
        }
        let scheduled = scheduled_list(&pods);
        if scheduled.is_empty() {
            debug!("No pods of AppGroup {:?} are placed yet", app_group_name);
            return Status::success();
        }

        let nodes = match self.snapshot.list_nodes() {
            Ok(nodes) => nodes,
            Err(err) => return Status::error(format!("Error getting the node list: {}", err)),
        };

        let weight = network_topology.weight(&self.weights_name);
        let mut costs = ComputedCosts {
            app_group_name: app_group_name.to_string(),
            dependency_list: dependencies,
            scheduled_list: scheduled,
            node_cost_map: BTreeMap::new(),
            satisfied_map: BTreeMap::new(),
            violated_map: BTreeMap::new(),
            final_cost_map: BTreeMap::new(),
        };
        for node_info in nodes.iter() {
            if state.is_cancelled() {
                return Status::error("scheduling cycle cancelled");
            }
            let region = node_info.node().region();
            let zone = node_info.node().zone();
            trace!(
                "Node {:?} region {:?} zone {:?}",
                node_info.name(),
                region,
                zone
            );
            let cost_map = self.populate_cost_map(weight, region, zone);
            let node = NodeLocation {
                name: node_info.name(),
                region,
                zone,
                cost_map: &cost_map,
            };

            let (satisfied, violated) = match self.check_max_network_cost_requirements(
                &costs.scheduled_list,
                &costs.dependency_list,
                &node,
            ) {
                Ok(counts) => counts,
                Err(err) => return Status::error(format!("pod hostname not found: {}", err)),
            };
            let final_cost = match self.accumulated_cost(
                &costs.scheduled_list,
                &costs.dependency_list,
                &node,
            ) {
                Ok(cost) => cost,
                Err(err) => {
                    return Status::error(format!(
                        "getting pod hostname from snapshot: {}",
                        err
                    ))
                }
            };
            trace!(
                "Node {:?}: satisfied {}, violated {}, cost {}",
                node_info.name(),
                satisfied,
                violated,
                final_cost
            );

            let name = node_info.name().to_string();
            costs.satisfied_map.insert(name.clone(), satisfied);
            costs.violated_map.insert(name.clone(), violated);
            costs.final_cost_map.insert(name.clone(), final_cost);
            costs.node_cost_map.insert(name, cost_map);
        }

        state.write_network_cost(NetworkCostState::Computed(Box::new(costs)));
        Status::success()
    }
}

impl FilterPlugin for NetworkCostAware {
    /// Rejects the node when it violates more dependencies of the pod than it satisfies.
    fn filter(&self, state: &CycleState, _pod: &Pod, node_info: &NodeInfo) -> Status {
        let network_cost = match state.read_network_cost() {
            Ok(network_cost) => network_cost,
            Err(err) => {
                return Status::error(format!(
                    "not eligible due to failed to read from cycle state: {}",
                    err
                ))
            }
        };
        let NetworkCostState::Computed(costs) = network_cost.as_ref() else {
            return Status::success();
        };

        let satisfied = costs.satisfied_map.get(node_info.name()).copied().unwrap_or(0);
        let violated = costs.violated_map.get(node_info.name()).copied().unwrap_or(0);
        if violated > satisfied {
            return Status::unschedulable(format!(
                "Node {} does not meet several network requirements from Workload dependencies: Satisfied: {} Violated: {}",
                node_info.name(),
                satisfied,
                violated
            ));
        }
        Status::success()
    }
}

impl ScorePlugin for NetworkCostAware {
    /// Accumulated network cost of the node, the lower the better until normalized.
    fn score(&self, state: &CycleState, pod: &Pod, node_name: &str) -> Result<i64, Status> {
        let network_cost = state.read_network_cost().map_err(|err| {
            Status::error(format!(
                "not eligible due to failed to read from cycle state: {}",
                err
            ))
        })?;
        let score = match network_cost.as_ref() {
            NetworkCostState::ScoreEqually => MIN_NODE_SCORE,
            NetworkCostState::Computed(costs) => {
                costs.final_cost_map.get(node_name).copied().unwrap_or(0)
            }
        };
        debug!(
            "Score of pod {:?} on node {:?}: {}",
            pod.namespaced_name(),
            node_name,
            score
        );
        Ok(score)
    }

    /// Inverts costs into [MIN_NODE_SCORE, MAX_NODE_SCORE] so that the cheapest node gets the
    /// highest score.
    fn normalize_score(&self, _state: &CycleState, _pod: &Pod, scores: &mut [NodeScore]) -> Status {
        let (min_cost, max_cost) = min_max_scores(scores);
        if min_cost == 0 && max_cost == 0 {
            return Status::success();
        }
        for node_score in scores.iter_mut() {
            let normalized = if max_cost != min_cost {
                (MAX_NODE_SCORE as f64 * (node_score.score - min_cost) as f64
                    / (max_cost - min_cost) as f64) as i64
            } else {
                node_score.score - min_cost
            };
            node_score.score = MAX_NODE_SCORE - normalized;
        }
        trace!("Normalized scores: {:?}", scores);
        Status::success()
    }
}

fn min_max_scores(scores: &[NodeScore]) -> (i64, i64) {
    if scores.is_empty() {
        return (0, 0);
    }
    scores.iter().fold((i64::MAX, i64::MIN), |(min, max), node_score| {
        (min.min(node_score.score), max.max(node_score.score))
    })
}
