//! Implementation of scheduler component which is responsible for scheduling pods for nodes.
//!
//! One scheduling attempt runs the pod through the framework of its profile: pre-filter,
//! filter, post-filter when no node fits, score, reserve and permit. A permitted pod is bound
//! right away, a pod asked to wait stays assumed on its node until the waiting pods map resolves
//! it, everything else goes to the unschedulable queue.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::{ClusterState, ConfigError, SchedulerConfig};
use crate::core::clock::Clock;
use crate::core::node::Node;
use crate::core::object_store::{ApiError, InMemoryObjectStore};
use crate::core::pod::{Pod, PodConditionType};
use crate::core::scheduler::cycle_state::{CycleState, PodsToActivate};
use crate::core::scheduler::framework::{select_host, Framework, FrameworkHandle};
use crate::core::scheduler::interface::ScheduleError;
use crate::core::scheduler::queue::{QueuedPodInfo, SchedulingQueue};
use crate::core::scheduler::status::{Code, Status};
use crate::core::scheduler::waiting_pods::{WaitingPod, WaitingPodState, WaitingPods};
use crate::core::snapshot::{SharedLister, SharedSnapshot, Snapshot, SnapshotError};
use crate::metrics::collector::MetricsCollector;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Successful outcome of one scheduling attempt, with the chosen node.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Bound(String),
    Waiting(String),
}

pub struct Scheduler {
    // Map from scheduler name to the framework of that profile.
    frameworks: HashMap<String, Framework>,
    // Profile whose queue sort plugin orders the shared queue.
    queue_sort_profile: String,

    object_store: Arc<InMemoryObjectStore>,
    snapshot: Arc<SharedSnapshot>,
    waiting_pods: Arc<WaitingPods>,
    clock: Arc<dyn Clock>,
    start_time: Instant,

    queue: SchedulingQueue,
    /// Queue infos of pods parked at permit stage keyed by pod uid, used to requeue them when
    /// they are rejected.
    waiting_infos: HashMap<String, QueuedPodInfo>,
    pods_to_activate: PodsToActivate,
    pod_max_in_unschedulable_pods_duration: f64,

    metrics_collector: Rc<RefCell<MetricsCollector>>,
}

fn status_to_error(status: Status) -> ScheduleError {
    if status.code() == Code::Error {
        ScheduleError::Internal(status)
    } else {
        ScheduleError::Unschedulable(status)
    }
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        object_store: Arc<InMemoryObjectStore>,
        snapshot: Arc<SharedSnapshot>,
        clock: Arc<dyn Clock>,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Result<Self, ConfigError> {
        let queue_sort_profile = config
            .profiles
            .first()
            .map(|profile| profile.scheduler_name.clone())
            .ok_or_else(|| ConfigError::InvalidArgs("no scheduler profiles".to_string()))?;

        let waiting_pods = Arc::new(WaitingPods::new());
        let handle = FrameworkHandle {
            snapshot: snapshot.clone(),
            object_store: object_store.clone(),
            waiting_pods: waiting_pods.clone(),
            clock: clock.clone(),
        };

        let mut frameworks = HashMap::new();
        for profile in config.profiles.iter() {
            if frameworks.contains_key(&profile.scheduler_name) {
                return Err(ConfigError::InvalidArgs(format!(
                    "duplicate profile {:?}",
                    profile.scheduler_name
                )));
            }
            frameworks.insert(
                profile.scheduler_name.clone(),
                Framework::new(profile, handle.clone())?,
            );
        }

        Ok(Self {
            frameworks,
            queue_sort_profile,
            object_store,
            snapshot,
            waiting_pods,
            start_time: clock.now(),
            clock,
            queue: SchedulingQueue::new(),
            waiting_infos: Default::default(),
            pods_to_activate: Default::default(),
            pod_max_in_unschedulable_pods_duration: config.pod_max_in_unschedulable_pods_duration,
            metrics_collector,
        })
    }

    /// Scheduler over a fresh store populated from `cluster`. Pods with a node name are placed
    /// on their nodes, the rest are queued.
    pub fn from_cluster_state(
        config: &SchedulerConfig,
        cluster: ClusterState,
        clock: Arc<dyn Clock>,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Result<Self, SchedulerError> {
        let object_store = Arc::new(InMemoryObjectStore::new());
        for mut pod_group in cluster.pod_groups.into_iter() {
            pod_group.metadata.ensure_uid();
            object_store.add_pod_group(pod_group)?;
        }
        for mut app_group in cluster.app_groups.into_iter() {
            app_group.metadata.ensure_uid();
            object_store.add_app_group(app_group)?;
        }
        for mut network_topology in cluster.network_topologies.into_iter() {
            network_topology.metadata.ensure_uid();
            object_store.add_network_topology(network_topology)?;
        }

        let snapshot = Arc::new(SharedSnapshot::new(Snapshot::new(cluster.nodes, &[])));
        let mut scheduler = Scheduler::new(config, object_store, snapshot, clock, metrics_collector)?;
        for pod in cluster.pods.into_iter() {
            scheduler.add_pod(pod)?;
        }
        Ok(scheduler)
    }

    pub fn object_store(&self) -> &Arc<InMemoryObjectStore> {
        &self.object_store
    }

    pub fn snapshot(&self) -> &Arc<SharedSnapshot> {
        &self.snapshot
    }

    pub fn active_len(&self) -> usize {
        self.queue.active_len()
    }

    pub fn unschedulable_len(&self) -> usize {
        self.queue.unschedulable_len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting_pods.len()
    }

    /// Seconds since the scheduler was created, by its clock.
    fn now(&self) -> f64 {
        self.clock
            .now()
            .saturating_duration_since(self.start_time)
            .as_secs_f64()
    }

    /// Stores the pod and places it on its node when it is already bound, queues it otherwise.
    /// A new pending pod may complete a pod group, so unschedulable pods are retried.
    pub fn add_pod(&mut self, mut pod: Pod) -> Result<(), SchedulerError> {
        pod.metadata.ensure_uid();
        self.object_store.add_pod(pod.clone())?;

        if pod.is_assigned() {
            let node_name = pod.spec.node_name.clone();
            let snapshot = self.snapshot.load()?.with_pod_assumed(pod, &node_name)?;
            self.snapshot.update(snapshot)?;
            return Ok(());
        }

        if !self.frameworks.contains_key(&pod.spec.scheduler_name) {
            debug!(
                "Pod {:?} is handled by unknown scheduler {:?}, skipping",
                pod.namespaced_name(),
                pod.spec.scheduler_name
            );
            return Ok(());
        }

        let now = self.now();
        self.queue.add(pod, now);
        self.queue.move_all_to_active(now);
        Ok(())
    }

    /// Removes the pod from the cluster. Resources of a bound or waiting pod are released and
    /// unschedulable pods are retried.
    pub fn delete_pod(&mut self, namespace: &str, name: &str) -> Result<(), SchedulerError> {
        let Some(pod) = self.object_store.remove_pod(namespace, name)? else {
            return Ok(());
        };
        let uid = pod.metadata.uid.clone();
        self.queue.delete(&uid);

        let node_name = match self.waiting_pods.remove(&uid) {
            Some(waiting_pod) => {
                self.waiting_infos.remove(&uid);
                Some(waiting_pod.node_name)
            }
            None if pod.is_assigned() => Some(pod.spec.node_name.clone()),
            None => None,
        };
        if let Some(node_name) = node_name {
            let snapshot = self.snapshot.load()?.with_pod_forgotten(&uid, &node_name)?;
            self.snapshot.update(snapshot)?;
        }

        self.queue.move_all_to_active(self.now());
        Ok(())
    }

    /// Adds the node to the cluster or replaces the node with the same name, keeping pods placed
    /// on it. Unschedulable pods are retried.
    pub fn add_node(&mut self, node: Node) -> Result<(), SchedulerError> {
        let current = self.snapshot.load()?;
        let mut nodes = vec![];
        let mut pods = vec![];
        for node_info in current.list_nodes()? {
            pods.extend(node_info.pods().iter().cloned());
            if node_info.name() != node.metadata.name {
                nodes.push(node_info.node().clone());
            }
        }
        info!("Adding node {:?} to the cluster", node.metadata.name);
        nodes.push(node);
        self.snapshot.update(Snapshot::new(nodes, &pods))?;

        self.queue.move_all_to_active(self.now());
        Ok(())
    }

    fn framework_for(&self, pod: &Pod) -> Result<&Framework, ScheduleError> {
        self.frameworks
            .get(&pod.spec.scheduler_name)
            .ok_or_else(|| ScheduleError::UnknownProfile(pod.spec.scheduler_name.clone()))
    }

    /// Runs one scheduling attempt of `pod`.
    pub fn schedule_pod(&self, pod: &Pod) -> Result<ScheduleOutcome, ScheduleError> {
        let framework = self.framework_for(pod)?;
        let mut state = CycleState::new(self.pods_to_activate.clone());

        let status = framework.run_pre_filter_plugins(&mut state, pod);
        if !status.is_success() {
            return Err(status_to_error(status));
        }

        let (feasible_nodes, filtered_node_status) = framework.find_nodes_that_fit(&state, pod)?;
        if feasible_nodes.is_empty() {
            let post_filter_status =
                framework.run_post_filter_plugins(&state, pod, &filtered_node_status);
            debug!(
                "PostFilter result for pod {:?}: {}",
                pod.namespaced_name(),
                post_filter_status
            );
            let reasons: Vec<String> = filtered_node_status
                .iter()
                .map(|(node_name, status)| format!("{}: {}", node_name, status.message()))
                .collect();
            return Err(ScheduleError::Unschedulable(Status::unschedulable(format!(
                "0/{} nodes are available: {}",
                filtered_node_status.len(),
                reasons.join("; ")
            ))));
        }

        let node_name = if feasible_nodes.len() == 1 {
            feasible_nodes[0].name().to_string()
        } else {
            let scores = framework
                .run_score_plugins(&state, pod, &feasible_nodes)
                .map_err(status_to_error)?;
            select_host(&scores)
                .map(str::to_string)
                .ok_or_else(|| ScheduleError::Internal(Status::error("empty score list")))?
        };

        let assumed = pod.clone().with_node_name(&node_name);
        let status = framework.run_reserve_plugins_reserve(&mut state, &assumed, &node_name);
        if !status.is_success() {
            framework.run_reserve_plugins_unreserve(&mut state, &assumed, &node_name);
            return Err(status_to_error(status));
        }

        let status = framework.run_permit_plugins(&mut state, &assumed, &node_name);
        if !status.is_success() && !status.is_wait() {
            framework.run_reserve_plugins_unreserve(&mut state, &assumed, &node_name);
            return Err(status_to_error(status));
        }

        // Placed after permit, so permit plugins see the snapshot without the pod itself.
        let snapshot = self.snapshot.load()?.with_pod_assumed(assumed.clone(), &node_name)?;
        self.snapshot.update(snapshot)?;

        if status.is_wait() {
            self.set_pod_condition(&assumed, PodConditionType::PodWaitingOnPermit, true, "");
            return Ok(ScheduleOutcome::Waiting(node_name));
        }
        self.bind(&assumed)?;
        Ok(ScheduleOutcome::Bound(node_name))
    }

    /// Pops the next pod and runs one scheduling attempt for it. Returns false when the active
    /// queue is empty.
    pub fn schedule_one(&mut self) -> bool {
        let Some(framework) = self.frameworks.get(&self.queue_sort_profile) else {
            return false;
        };
        let Some(mut queued_pod) = self.queue.pop(|a, b| framework.queue_sort_less(a, b)) else {
            return false;
        };
        queued_pod.attempts += 1;

        let attempt_start = Instant::now();
        let result = self.schedule_pod(&queued_pod.pod);
        {
            let mut metrics = self.metrics_collector.borrow_mut();
            metrics.scheduling_attempts += 1;
            metrics.increment_pod_scheduling_algorithm_latency(attempt_start.elapsed().as_secs_f64());
        }

        match result {
            Ok(ScheduleOutcome::Bound(node_name)) => {
                info!(
                    "Pod {:?} has been bound to node {:?}",
                    queued_pod.pod.namespaced_name(),
                    node_name
                );
                self.on_pod_bound(&queued_pod);
            }
            Ok(ScheduleOutcome::Waiting(node_name)) => {
                debug!(
                    "Pod {:?} waits on permit at node {:?}",
                    queued_pod.pod.namespaced_name(),
                    node_name
                );
                self.metrics_collector.borrow_mut().pods_waiting_on_permit += 1;
                self.waiting_infos
                    .insert(queued_pod.pod.metadata.uid.clone(), queued_pod);
            }
            Err(err) => self.handle_scheduling_failure(queued_pod, &err),
        }

        self.activate_requested_pods();
        true
    }

    /// Attempts every pod which is active at the start of the cycle, then settles pods waiting
    /// at permit stage. Returns the number of attempts.
    pub fn run_scheduling_cycle(&mut self) -> usize {
        let now = self.now();
        self.queue
            .flush_unschedulable_left_over(now, self.pod_max_in_unschedulable_pods_duration);

        let batch = self.queue.active_len();
        let mut attempts = 0;
        while attempts < batch && self.schedule_one() {
            attempts += 1;
        }
        self.resolve_waiting_pods();
        attempts
    }

    /// Binds waiting pods which every permit plugin allowed, requeues the rejected and expired
    /// ones. Unreserve of a rejected pod may reject more pods, they are settled here too.
    pub fn resolve_waiting_pods(&mut self) {
        loop {
            let resolved = self.waiting_pods.take_resolved(self.clock.now());
            if resolved.is_empty() {
                break;
            }
            for waiting_pod in resolved.into_iter() {
                let queued_pod = self
                    .waiting_infos
                    .remove(&waiting_pod.pod.metadata.uid)
                    .unwrap_or_else(|| QueuedPodInfo::new(waiting_pod.pod.clone(), self.now()));
                match waiting_pod.state().clone() {
                    WaitingPodState::Allowed => match self.bind(&waiting_pod.pod) {
                        Ok(()) => {
                            info!(
                                "Pod {:?} has been bound to node {:?} after waiting",
                                waiting_pod.pod.namespaced_name(),
                                waiting_pod.node_name
                            );
                            self.on_pod_bound(&queued_pod);
                        }
                        Err(err) => {
                            self.reject_waiting_pod(
                                &waiting_pod,
                                queued_pod,
                                &ScheduleError::Api(err),
                            );
                        }
                    },
                    WaitingPodState::Rejected { plugin, message } => {
                        self.metrics_collector.borrow_mut().pods_rejected_on_permit += 1;
                        let status = Status::unschedulable(message).with_plugin(&plugin);
                        self.reject_waiting_pod(
                            &waiting_pod,
                            queued_pod,
                            &ScheduleError::Unschedulable(status),
                        );
                    }
                    WaitingPodState::Waiting => {
                        warn!(
                            "Pod {:?} resolved while still waiting",
                            waiting_pod.pod.namespaced_name()
                        );
                    }
                }
            }
            self.activate_requested_pods();
        }
    }

    fn reject_waiting_pod(
        &mut self,
        waiting_pod: &WaitingPod,
        queued_pod: QueuedPodInfo,
        err: &ScheduleError,
    ) {
        let forgotten = self.snapshot.load().and_then(|snapshot| {
            snapshot.with_pod_forgotten(&waiting_pod.pod.metadata.uid, &waiting_pod.node_name)
        });
        match forgotten.and_then(|snapshot| self.snapshot.update(snapshot)) {
            Ok(()) => {}
            Err(e) => warn!(
                "Failed to forget pod {:?}: {}",
                waiting_pod.pod.namespaced_name(),
                e
            ),
        }

        if let Ok(framework) = self.framework_for(&waiting_pod.pod) {
            let mut state = CycleState::new(self.pods_to_activate.clone());
            framework.run_reserve_plugins_unreserve(
                &mut state,
                &waiting_pod.pod,
                &waiting_pod.node_name,
            );
        }
        self.set_pod_condition(
            &waiting_pod.pod,
            PodConditionType::PodWaitingOnPermit,
            false,
            &err.to_string(),
        );
        self.handle_scheduling_failure(queued_pod, err);
    }

    fn handle_scheduling_failure(&mut self, mut queued_pod: QueuedPodInfo, err: &ScheduleError) {
        info!(
            "Failed to schedule pod {:?}: {}",
            queued_pod.pod.namespaced_name(),
            err
        );
        {
            let mut metrics = self.metrics_collector.borrow_mut();
            match err {
                ScheduleError::Unschedulable(_) => metrics.pods_unschedulable += 1,
                _ => metrics.scheduling_errors += 1,
            }
        }
        self.set_pod_condition(
            &queued_pod.pod,
            PodConditionType::PodScheduled,
            false,
            &err.to_string(),
        );
        // Requeue the pending version, an assumed node name must not leak into the queue.
        queued_pod.pod.spec.node_name.clear();
        let now = self.now();
        self.queue.add_unschedulable(queued_pod, now);
    }

    fn on_pod_bound(&mut self, queued_pod: &QueuedPodInfo) {
        let mut metrics = self.metrics_collector.borrow_mut();
        metrics.pods_scheduled += 1;
        metrics.increment_pod_scheduling_attempts(queued_pod.attempts as f64);
    }

    fn bind(&self, pod: &Pod) -> Result<(), ApiError> {
        let mut bound = self
            .object_store
            .get_pod(&pod.metadata.namespace, &pod.metadata.name)?;
        bound.spec.node_name = pod.spec.node_name.clone();
        if bound.get_condition(PodConditionType::PodWaitingOnPermit).is_some() {
            bound.update_condition(
                "False".to_string(),
                PodConditionType::PodWaitingOnPermit,
                String::new(),
            );
        }
        bound.update_condition(
            "True".to_string(),
            PodConditionType::PodScheduled,
            String::new(),
        );
        self.object_store.add_pod(bound)
    }

    fn set_pod_condition(
        &self,
        pod: &Pod,
        condition_type: PodConditionType,
        value: bool,
        message: &str,
    ) {
        let result = self
            .object_store
            .get_pod(&pod.metadata.namespace, &pod.metadata.name)
            .and_then(|mut stored| {
                let status = if value { "True" } else { "False" };
                stored.update_condition(status.to_string(), condition_type, message.to_string());
                self.object_store.add_pod(stored)
            });
        if let Err(err) = result {
            warn!(
                "Failed to update condition of pod {:?}: {}",
                pod.namespaced_name(),
                err
            );
        }
    }

    /// Moves pods requested by plugins from unschedulable to active queue.
    fn activate_requested_pods(&mut self) {
        let uids: Vec<String> = {
            let mut pods_to_activate = self
                .pods_to_activate
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pods_to_activate)
                .into_values()
                .map(|pod| pod.metadata.uid)
                .collect()
        };
        if uids.is_empty() {
            return;
        }
        let activated = self.queue.activate(&uids, self.now());
        self.metrics_collector.borrow_mut().pods_activated += activated as u64;
    }
}
