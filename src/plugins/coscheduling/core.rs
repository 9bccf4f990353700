//! PodGroup admission: minimum member and minimum resource gates before scheduling, quorum
//! decision at permit stage and caches of recently permitted and recently failed groups.

use std::fmt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use log::{debug, error, trace, warn};
use thiserror::Error;

use crate::core::clock::Clock;
use crate::core::common::Labels;
use crate::core::expiring_cache::ExpiringCache;
use crate::core::node_info::NodeInfo;
use crate::core::object_store::{ApiError, ObjectStore};
use crate::core::pod::Pod;
use crate::core::pod_group::{pod_group_full_name, pod_group_label, PodGroup, POD_GROUP_LABEL};
use crate::core::resources::{ResourceList, RESOURCE_PODS};
use crate::core::scheduler::cycle_state::CycleState;
use crate::core::snapshot::{SharedLister, SnapshotError};

/// Per-cycle request to activate siblings of the pod, written at permit stage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PermitState {
    pub activate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitStatus {
    Success,
    Wait,
    /// The pod has no PodGroup label.
    PodGroupNotSpecified,
    /// The pod names a PodGroup which does not exist.
    PodGroupNotFound,
}

impl fmt::Display for PermitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PermitStatus::Success => "Success",
            PermitStatus::Wait => "Wait",
            PermitStatus::PodGroupNotSpecified => "PodGroup not specified",
            PermitStatus::PodGroupNotFound => "PodGroup not found",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreFilterError {
    #[error("podGroup {0} failed recently")]
    BackedOff(String),
    #[error(
        "pre-filter pod {pod} cannot find enough sibling pods, current pods number: {current}, minMember of group: {min_member}"
    )]
    NotEnoughSiblings {
        pod: String,
        current: usize,
        min_member: i32,
    },
    #[error("podGroup {pod_group} resource gap: {gap:?}")]
    ResourceGap {
        pod_group: String,
        gap: ResourceList,
    },
    #[error("scheduling cycle cancelled")]
    Cancelled,
    #[error("podLister list pods failed: {0}")]
    Api(#[from] ApiError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl PreFilterError {
    /// Verdicts about the group itself, as opposed to failures of the data sources.
    pub fn is_verdict(&self) -> bool {
        !matches!(
            self,
            PreFilterError::Api(_) | PreFilterError::Snapshot(_) | PreFilterError::Cancelled
        )
    }
}

pub struct PodGroupManager {
    object_store: Arc<dyn ObjectStore>,
    snapshot: Arc<dyn SharedLister>,
    /// Lifetime of a passed resource check, also the default permit wait of a group.
    schedule_timeout: Duration,
    /// Groups which passed the resource check recently.
    permitted_pg: ExpiringCache<String>,
    /// Groups which failed scheduling recently.
    backed_off_pg: ExpiringCache<()>,
}

impl PodGroupManager {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        snapshot: Arc<dyn SharedLister>,
        schedule_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            object_store,
            snapshot,
            schedule_timeout,
            permitted_pg: ExpiringCache::new(clock.clone()),
            backed_off_pg: ExpiringCache::new(clock),
        }
    }

    /// Full name of the pod's group and the group itself. The name is empty for pods without a
    /// group label; the group is `None` when it can not be fetched.
    pub fn get_pod_group(&self, pod: &Pod) -> (String, Option<PodGroup>) {
        let pg_name = pod_group_label(pod);
        if pg_name.is_empty() {
            return (String::new(), None);
        }
        let full_name = pod_group_full_name(pod);
        match self
            .object_store
            .get_pod_group(&pod.metadata.namespace, pg_name)
        {
            Ok(pg) => (full_name, Some(pg)),
            Err(err) => {
                if !err.is_not_found() {
                    warn!("Failed to get PodGroup {:?}: {}", full_name, err);
                }
                (full_name, None)
            }
        }
    }

    /// Rejects a pod if its group failed recently, has fewer pods than `min_member` or the
    /// cluster has not enough free resources for `min_resources` of the group.
    pub fn pre_filter(&self, state: &CycleState, pod: &Pod) -> Result<(), PreFilterError> {
        trace!("Pre-filter pod {:?}", pod.namespaced_name());
        let (pg_full_name, pg) = self.get_pod_group(pod);
        let Some(pg) = pg else {
            return Ok(());
        };

        if self.backed_off_pg.contains(&pg_full_name) {
            return Err(PreFilterError::BackedOff(pg_full_name));
        }

        let siblings = self.list_siblings(pod)?;
        if (siblings.len() as i64) < pg.spec.min_member as i64 {
            return Err(PreFilterError::NotEnoughSiblings {
                pod: pod.metadata.name.clone(),
                current: siblings.len(),
                min_member: pg.spec.min_member,
            });
        }

        let Some(min_resources) = pg.spec.min_resources.as_ref() else {
            return Ok(());
        };

        // Passing this check does not mean the group passes filters, it only catches groups
        // which certainly do not fit.
        if self.permitted_pg.contains(&pg_full_name) {
            return Ok(());
        }

        if state.is_cancelled() {
            return Err(PreFilterError::Cancelled);
        }
        let nodes = self.snapshot.list_nodes()?;
        let mut request = min_resources.clone();
        request.insert(RESOURCE_PODS.to_string(), pg.spec.min_member as i64);
        if let Err(gap) = check_cluster_resource(&nodes, request, &pg_full_name) {
            error!(
                "Failed to PreFilter pod group {:?}: resource gap {:?}",
                pg_full_name, gap
            );
            return Err(PreFilterError::ResourceGap {
                pod_group: pg_full_name,
                gap,
            });
        }
        self.permitted_pg
            .add(&pg_full_name, pg_full_name.clone(), self.schedule_timeout);
        Ok(())
    }

    /// Decides whether the pod completes the quorum of its group. The first pod of a group which
    /// has to wait requests activation of its siblings in `state`.
    pub fn permit(&self, state: &mut CycleState, pod: &Pod) -> PermitStatus {
        let (pg_full_name, pg) = self.get_pod_group(pod);
        if pg_full_name.is_empty() {
            return PermitStatus::PodGroupNotSpecified;
        }
        let Some(pg) = pg else {
            return PermitStatus::PodGroupNotFound;
        };

        // The pod being decided is not in the snapshot yet.
        let assigned = self.calculate_assigned_pods(&pg.metadata.name, &pg.metadata.namespace);
        if assigned as i64 + 1 >= pg.spec.min_member as i64 {
            return PermitStatus::Success;
        }

        if assigned == 0 {
            // Only the first pod of a group reaching permit wakes the others up.
            state.write_permit_state(PermitState { activate: true });
        }
        PermitStatus::Wait
    }

    /// Creation time of the pod's group or `default` when the pod is not in a group.
    pub fn get_creation_timestamp(&self, pod: &Pod, default: f64) -> f64 {
        let pg_name = pod_group_label(pod);
        if pg_name.is_empty() {
            return default;
        }
        match self
            .object_store
            .get_pod_group(&pod.metadata.namespace, pg_name)
        {
            Ok(pg) => pg.metadata.creation_timestamp,
            Err(_) => default,
        }
    }

    pub fn delete_permitted_pod_group(&self, pg_full_name: &str) {
        self.permitted_pg.remove(pg_full_name);
    }

    /// Number of pods of the group which are assumed or bound to a node in the snapshot.
    pub fn calculate_assigned_pods(&self, pod_group_name: &str, namespace: &str) -> usize {
        let nodes = match self.snapshot.list_nodes() {
            Ok(nodes) => nodes,
            Err(err) => {
                error!("Cannot get node infos from snapshot: {}", err);
                return 0;
            }
        };
        nodes
            .iter()
            .flat_map(|node_info| node_info.pods().iter())
            .filter(|pod| {
                pod_group_label(pod) == pod_group_name
                    && pod.metadata.namespace == namespace
                    && pod.is_assigned()
            })
            .count()
    }

    /// Stages siblings of `pod` for activation when permit stage asked for it.
    pub fn activate_siblings(&self, pod: &Pod, state: &CycleState) {
        if pod_group_label(pod).is_empty() {
            return;
        }
        match state.read_permit_state() {
            Ok(permit_state) if permit_state.activate => {}
            _ => return,
        }

        let siblings = match self.list_siblings(pod) {
            Ok(pods) => pods,
            Err(err) => {
                error!(
                    "Failed to obtain pods belonging to pod group {:?}: {}",
                    pod_group_full_name(pod),
                    err
                );
                return;
            }
        };
        let siblings: Vec<Pod> = siblings
            .into_iter()
            .filter(|sibling| sibling.metadata.uid != pod.metadata.uid)
            .collect();
        if siblings.is_empty() {
            return;
        }

        let mut pods_to_activate = state
            .pods_to_activate()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for sibling in siblings.into_iter() {
            debug!(
                "Pod {:?} activates sibling {:?}",
                pod.namespaced_name(),
                sibling.namespaced_name()
            );
            pods_to_activate.insert(sibling.namespaced_name(), sibling);
        }
    }

    /// Rejects pods of the group at pre-filter stage for `backoff`. Zero backoff does nothing.
    pub fn backoff_pod_group(&self, pg_full_name: &str, backoff: Duration) {
        if backoff.is_zero() {
            return;
        }
        debug!("Backing off pod group {:?} for {:?}", pg_full_name, backoff);
        self.backed_off_pg.add(pg_full_name, (), backoff);
    }

    /// All pods in the namespace of `pod` carrying the same PodGroup label, `pod` included.
    pub fn list_siblings(&self, pod: &Pod) -> Result<Vec<Pod>, ApiError> {
        let selector = Labels::from([(
            POD_GROUP_LABEL.to_string(),
            pod_group_label(pod).to_string(),
        )]);
        self.object_store
            .list_pods(Some(&pod.metadata.namespace), &selector)
    }
}

/// Checks whether free resources summed over `nodes` cover `request`. Pods of the group
/// `pg_full_name` already placed on a node count as free there. Returns the unmet part of the
/// request on failure.
pub fn check_cluster_resource(
    nodes: &[Arc<NodeInfo>],
    mut request: ResourceList,
    pg_full_name: &str,
) -> Result<(), ResourceList> {
    for node_info in nodes.iter() {
        let left = node_left_resource(node_info, pg_full_name).to_resource_list();
        request = request
            .into_iter()
            .filter_map(|(name, quantity)| {
                let rest = quantity - left.get(&name).copied().unwrap_or(0);
                (rest > 0).then_some((name, rest))
            })
            .collect();
        if request.is_empty() {
            return Ok(());
        }
    }
    Err(request)
}

fn node_left_resource(
    node_info: &NodeInfo,
    pg_full_name: &str,
) -> crate::core::resources::Resource {
    let left = node_info
        .without_pods(|pod| pod_group_full_name(pod) == pg_full_name)
        .left_resource();
    trace!("Node {:?} left resource {:?}", node_info.name(), left);
    left
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::core::clock::FakeClock;
    use crate::core::object_store::InMemoryObjectStore;
    use crate::core::resources::RESOURCE_CPU;
    use crate::core::snapshot::{SharedSnapshot, Snapshot};
    use crate::test_util::helpers::{make_node, make_pod_group, make_pod_in_group, resource_list};

    use super::*;

    struct TestEnv {
        store: Arc<InMemoryObjectStore>,
        snapshot: Arc<SharedSnapshot>,
        clock: Arc<FakeClock>,
        manager: PodGroupManager,
    }

    fn make_env(nodes: Vec<crate::core::node::Node>, placed: &[Pod]) -> TestEnv {
        let store = Arc::new(InMemoryObjectStore::new());
        let snapshot = Arc::new(SharedSnapshot::new(Snapshot::new(nodes, placed)));
        let clock = Arc::new(FakeClock::new());
        let manager = PodGroupManager::new(
            store.clone(),
            snapshot.clone(),
            Duration::from_secs(10),
            clock.clone(),
        );
        TestEnv {
            store,
            snapshot,
            clock,
            manager,
        }
    }

    #[test]
    fn test_pre_filter_pod_without_group() {
        let env = make_env(vec![], &[]);
        let pod = Pod::new("ns1", "p1", Default::default());
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &pod));
    }

    #[test]
    fn test_pre_filter_group_not_found() {
        let env = make_env(vec![], &[]);
        let pod = make_pod_in_group("ns1", "p1", "missing", resource_list(100, 100));
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &pod));
    }

    #[test]
    fn test_pre_filter_min_member_gate() {
        let env = make_env(vec![], &[]);
        env.store.add_pod_group(make_pod_group("ns1", "pg1", 3, None)).unwrap();
        let pods: Vec<Pod> = (1..=3)
            .map(|i| make_pod_in_group("ns1", &format!("p{}", i), "pg1", resource_list(100, 100)))
            .collect();

        env.store.add_pod(pods[0].clone()).unwrap();
        env.store.add_pod(pods[1].clone()).unwrap();
        assert_eq!(
            Err(PreFilterError::NotEnoughSiblings {
                pod: "p1".to_string(),
                current: 2,
                min_member: 3,
            }),
            env.manager.pre_filter(&CycleState::default(), &pods[0])
        );

        env.store.add_pod(pods[2].clone()).unwrap();
        for pod in pods.iter() {
            assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), pod));
        }
    }

    #[test]
    fn test_pre_filter_counts_siblings_in_own_namespace_only() {
        let env = make_env(vec![], &[]);
        env.store.add_pod_group(make_pod_group("ns1", "pg1", 2, None)).unwrap();
        let pod = make_pod_in_group("ns1", "p1", "pg1", Default::default());
        env.store.add_pod(pod.clone()).unwrap();
        env.store
            .add_pod(make_pod_in_group("ns2", "p2", "pg1", Default::default()))
            .unwrap();
        assert!(matches!(
            env.manager.pre_filter(&CycleState::default(), &pod),
            Err(PreFilterError::NotEnoughSiblings { current: 1, .. })
        ));
    }

    #[test]
    fn test_pre_filter_backoff_expires() {
        let env = make_env(vec![], &[]);
        env.store.add_pod_group(make_pod_group("ns1", "pg1", 1, None)).unwrap();
        let pod = make_pod_in_group("ns1", "p1", "pg1", Default::default());
        env.store.add_pod(pod.clone()).unwrap();

        env.manager.backoff_pod_group("ns1/pg1", Duration::from_secs(5));
        assert_eq!(
            Err(PreFilterError::BackedOff("ns1/pg1".to_string())),
            env.manager.pre_filter(&CycleState::default(), &pod)
        );
        env.clock.advance(Duration::from_millis(4999));
        assert!(matches!(
            env.manager.pre_filter(&CycleState::default(), &pod),
            Err(PreFilterError::BackedOff(_))
        ));
        env.clock.advance(Duration::from_millis(1));
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &pod));
    }

    #[test]
    fn test_zero_backoff_is_noop() {
        let env = make_env(vec![], &[]);
        env.store.add_pod_group(make_pod_group("ns1", "pg1", 1, None)).unwrap();
        let pod = make_pod_in_group("ns1", "p1", "pg1", Default::default());
        env.store.add_pod(pod.clone()).unwrap();

        env.manager.backoff_pod_group("ns1/pg1", Duration::ZERO);
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &pod));
    }

    #[test]
    fn test_check_cluster_resource_greedy() {
        let nodes: Vec<Arc<NodeInfo>> = vec![
            Arc::new(NodeInfo::new(make_node("node1", 2000, 8192, 10), vec![])),
            Arc::new(NodeInfo::new(make_node("node2", 3000, 8192, 10), vec![])),
        ];

        let request = ResourceList::from([(RESOURCE_CPU.to_string(), 4000)]);
        assert_eq!(Ok(()), check_cluster_resource(&nodes, request, "ns1/pg1"));

        let request = ResourceList::from([(RESOURCE_CPU.to_string(), 6000)]);
        assert_eq!(
            Err(ResourceList::from([(RESOURCE_CPU.to_string(), 1000)])),
            check_cluster_resource(&nodes, request, "ns1/pg1")
        );
    }

    #[test]
    fn test_check_cluster_resource_ignores_own_placed_pods() {
        let placed = make_pod_in_group("ns1", "p0", "pg1", resource_list(2000, 0)).with_node_name("node1");
        let other = Pod::new("ns1", "other", resource_list(1000, 0)).with_node_name("node1");
        let nodes = vec![Arc::new(NodeInfo::new(
            make_node("node1", 4000, 8192, 10),
            vec![placed, other],
        ))];

        // 4000 allocatable, 1000 taken by a foreign pod, the group's own pod counts as free.
        let request = ResourceList::from([(RESOURCE_CPU.to_string(), 3000)]);
        assert_eq!(Ok(()), check_cluster_resource(&nodes, request, "ns1/pg1"));
        let request = ResourceList::from([(RESOURCE_CPU.to_string(), 3000)]);
        assert!(check_cluster_resource(&nodes, request, "ns1/pg2").is_err());
    }

    #[test]
    fn test_pre_filter_resource_gap_and_permitted_short_circuit() {
        let env = make_env(
            vec![make_node("node1", 2000, 8192, 10), make_node("node2", 3000, 8192, 10)],
            &[],
        );
        let min_resources = ResourceList::from([(RESOURCE_CPU.to_string(), 6000)]);
        env.store
            .add_pod_group(make_pod_group("ns1", "big", 1, Some(min_resources)))
            .unwrap();
        let big = make_pod_in_group("ns1", "big-1", "big", Default::default());
        env.store.add_pod(big.clone()).unwrap();
        assert_eq!(
            Err(PreFilterError::ResourceGap {
                pod_group: "ns1/big".to_string(),
                gap: ResourceList::from([(RESOURCE_CPU.to_string(), 1000)]),
            }),
            env.manager.pre_filter(&CycleState::default(), &big)
        );

        let min_resources = ResourceList::from([(RESOURCE_CPU.to_string(), 4000)]);
        env.store
            .add_pod_group(make_pod_group("ns1", "small", 2, Some(min_resources)))
            .unwrap();
        let small: Vec<Pod> = (1..=2)
            .map(|i| make_pod_in_group("ns1", &format!("small-{}", i), "small", Default::default()))
            .collect();
        for pod in small.iter() {
            env.store.add_pod(pod.clone()).unwrap();
        }
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &small[0]));

        // Cluster shrinks, but the group is still permitted until the entry expires.
        env.snapshot
            .update(Snapshot::new(vec![make_node("node1", 1000, 8192, 10)], &[]))
            .unwrap();
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &small[1]));

        env.clock.advance(Duration::from_secs(10));
        assert!(matches!(
            env.manager.pre_filter(&CycleState::default(), &small[1]),
            Err(PreFilterError::ResourceGap { .. })
        ));
    }

    #[test]
    fn test_delete_permitted_pod_group_forces_recheck() {
        let env = make_env(vec![make_node("node1", 4000, 8192, 10)], &[]);
        let min_resources = ResourceList::from([(RESOURCE_CPU.to_string(), 4000)]);
        env.store
            .add_pod_group(make_pod_group("ns1", "pg1", 1, Some(min_resources)))
            .unwrap();
        let pod = make_pod_in_group("ns1", "p1", "pg1", Default::default());
        env.store.add_pod(pod.clone()).unwrap();
        assert_eq!(Ok(()), env.manager.pre_filter(&CycleState::default(), &pod));

        env.snapshot.update(Snapshot::new(vec![], &[])).unwrap();
        env.manager.delete_permitted_pod_group("ns1/pg1");
        assert!(matches!(
            env.manager.pre_filter(&CycleState::default(), &pod),
            Err(PreFilterError::ResourceGap { .. })
        ));
    }

    #[test]
    fn test_permit_quorum() {
        let env = make_env(vec![make_node("node1", 4000, 8192, 10)], &[]);
        env.store.add_pod_group(make_pod_group("ns1", "pg1", 3, None)).unwrap();
        let pods: Vec<Pod> = (1..=3)
            .map(|i| make_pod_in_group("ns1", &format!("p{}", i), "pg1", Default::default()))
            .collect();
        for pod in pods.iter() {
            env.store.add_pod(pod.clone()).unwrap();
        }

        let mut activations = vec![];
        let mut statuses = vec![];
        for pod in pods.iter() {
            let mut state = CycleState::default();
            statuses.push(env.manager.permit(&mut state, pod));
            activations.push(state.read_permit_state().map(|s| s.activate).unwrap_or(false));
            // Pod is assumed on the node once it passed permit or waits there.
            let snapshot = env.snapshot.load().unwrap();
            env.snapshot
                .update(
                    snapshot
                        .with_pod_assumed(pod.clone().with_node_name("node1"), "node1")
                        .unwrap(),
                )
                .unwrap();
        }

        assert_eq!(
            vec![PermitStatus::Wait, PermitStatus::Wait, PermitStatus::Success],
            statuses
        );
        assert_eq!(vec![true, false, false], activations);
        assert_eq!(3, env.manager.calculate_assigned_pods("pg1", "ns1"));
    }

    #[test]
    fn test_permit_without_group() {
        let env = make_env(vec![], &[]);
        let mut state = CycleState::default();
        let pod = Pod::new("ns1", "p1", Default::default());
        assert_eq!(
            PermitStatus::PodGroupNotSpecified,
            env.manager.permit(&mut state, &pod)
        );
        let pod = make_pod_in_group("ns1", "p1", "missing", Default::default());
        assert_eq!(
            PermitStatus::PodGroupNotFound,
            env.manager.permit(&mut state, &pod)
        );
    }

    #[test]
    fn test_activate_siblings() {
        let env = make_env(vec![], &[]);
        env.store.add_pod_group(make_pod_group("ns1", "pg1", 3, None)).unwrap();
        let pods: Vec<Pod> = (1..=3)
            .map(|i| make_pod_in_group("ns1", &format!("p{}", i), "pg1", Default::default()))
            .collect();
        for pod in pods.iter() {
            env.store.add_pod(pod.clone()).unwrap();
        }

        // Without the permit request nothing is staged.
        let state = CycleState::default();
        env.manager.activate_siblings(&pods[0], &state);
        assert!(state.pods_to_activate().lock().unwrap().is_empty());

        let mut state = CycleState::default();
        state.write_permit_state(PermitState { activate: true });
        env.manager.activate_siblings(&pods[0], &state);
        let staged: Vec<String> = state
            .pods_to_activate()
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(vec!["ns1/p2".to_string(), "ns1/p3".to_string()], staged);
    }

    #[test]
    fn test_get_creation_timestamp() {
        let env = make_env(vec![], &[]);
        let mut pg = make_pod_group("ns1", "pg1", 1, None);
        pg.metadata.creation_timestamp = 3.0;
        env.store.add_pod_group(pg).unwrap();

        let grouped = make_pod_in_group("ns1", "p1", "pg1", Default::default());
        assert_eq!(3.0, env.manager.get_creation_timestamp(&grouped, 10.0));
        let single = Pod::new("ns1", "p2", Default::default());
        assert_eq!(10.0, env.manager.get_creation_timestamp(&single, 10.0));
    }
}
