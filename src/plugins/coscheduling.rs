//! Gang scheduling plugin: pods of a PodGroup are admitted only together.

pub mod core;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::config::{ConfigError, PluginArgs};
use crate::core::pod::Pod;
use crate::core::pod_group::{pod_group_full_name, pod_group_label, wait_time_duration};
use crate::core::scheduler::cycle_state::CycleState;
use crate::core::scheduler::framework::FrameworkHandle;
use crate::core::scheduler::interface::{
    PermitPlugin, Plugin, PostFilterPlugin, PreFilterPlugin, QueueSortPlugin, ReservePlugin,
};
use crate::core::scheduler::queue::QueuedPodInfo;
use crate::core::scheduler::status::{Code, Status};
use crate::core::scheduler::waiting_pods::WaitingPods;

use self::core::{PermitStatus, PodGroupManager};

pub const NAME: &str = "Coscheduling";

pub struct Coscheduling {
    pg_mgr: PodGroupManager,
    waiting_pods: Arc<WaitingPods>,
    schedule_timeout: Duration,
    pod_group_backoff: Duration,
}

pub fn new(args: &PluginArgs, handle: &FrameworkHandle) -> Result<Arc<dyn Plugin>, ConfigError> {
    let args = &args.coscheduling;
    if args.permit_waiting_time_seconds == 0 {
        return Err(ConfigError::InvalidArgs(
            "coscheduling permit_waiting_time_seconds must be positive".to_string(),
        ));
    }
    let schedule_timeout = Duration::from_secs(args.permit_waiting_time_seconds);
    info!(
        "Creating {} plugin, schedule timeout {:?}, pod group backoff {:?}",
        NAME,
        schedule_timeout,
        Duration::from_secs(args.pod_group_backoff_seconds)
    );
    Ok(Arc::new(Coscheduling {
        pg_mgr: PodGroupManager::new(
            handle.object_store.clone(),
            handle.snapshot.clone(),
            schedule_timeout,
            handle.clock.clone(),
        ),
        waiting_pods: handle.waiting_pods.clone(),
        schedule_timeout,
        pod_group_backoff: Duration::from_secs(args.pod_group_backoff_seconds),
    }))
}

impl Coscheduling {
    fn in_same_group(pod: &Pod, pg_name: &str, namespace: &str) -> bool {
        pod.metadata.namespace == namespace && pod_group_label(pod) == pg_name
    }
}

impl Plugin for Coscheduling {
    fn name(&self) -> &'static str {
        NAME
    }

    fn as_queue_sort(&self) -> Option<&dyn QueueSortPlugin> {
        Some(self)
    }

    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        Some(self)
    }

    fn as_post_filter(&self) -> Option<&dyn PostFilterPlugin> {
        Some(self)
    }

    fn as_reserve(&self) -> Option<&dyn ReservePlugin> {
        Some(self)
    }

    fn as_permit(&self) -> Option<&dyn PermitPlugin> {
        Some(self)
    }
}

impl QueueSortPlugin for Coscheduling {
    /// Higher priority first. Then earlier creation of the pod group (or first queueing of a
    /// pod outside of groups), so that pods of one group go one after another. Then by name.
    fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool {
        let prio_a = a.pod.spec.priority;
        let prio_b = b.pod.spec.priority;
        if prio_a != prio_b {
            return prio_a > prio_b;
        }
        let created_a = self
            .pg_mgr
            .get_creation_timestamp(&a.pod, a.initial_attempt_timestamp);
        let created_b = self
            .pg_mgr
            .get_creation_timestamp(&b.pod, b.initial_attempt_timestamp);
        match created_a.partial_cmp(&created_b) {
            Some(Ordering::Less) => true,
            Some(Ordering::Greater) => false,
            _ => sort_key(&a.pod) < sort_key(&b.pod),
        }
    }
}

fn sort_key(pod: &Pod) -> (String, String) {
    (pod_group_full_name(pod), pod.namespaced_name())
}

impl PreFilterPlugin for Coscheduling {
    fn pre_filter(&self, state: &mut CycleState, pod: &Pod) -> Status {
        match self.pg_mgr.pre_filter(state, pod) {
            Ok(()) => Status::success(),
            Err(err) if err.is_verdict() => {
                debug!(
                    "PreFilter rejected pod {:?}: {}",
                    pod.namespaced_name(),
                    err
                );
                Status::new(Code::UnschedulableAndUnresolvable, err.to_string())
            }
            Err(err) => Status::error(err.to_string()),
        }
    }
}

impl PostFilterPlugin for Coscheduling {
    /// No node fits the pod. Its siblings would most likely fail as well, so the group is backed
    /// off and its waiting pods are rejected early.
    fn post_filter(
        &self,
        _state: &CycleState,
        pod: &Pod,
        _filtered_node_status: &BTreeMap<String, Status>,
    ) -> Status {
        let (pg_full_name, pg) = self.pg_mgr.get_pod_group(pod);
        let Some(pg) = pg else {
            debug!("Pod {:?} does not belong to any group", pod.namespaced_name());
            return Status::unschedulable("can not find pod group");
        };

        // The group is already complete, a single failing pod should not affect the others.
        let assigned = self
            .pg_mgr
            .calculate_assigned_pods(&pg.metadata.name, &pod.metadata.namespace);
        if assigned as i64 >= pg.spec.min_member as i64 {
            debug!(
                "Assigned pods of group {:?}: {}, min member {}",
                pg_full_name, assigned, pg.spec.min_member
            );
            return Status::unschedulable("");
        }

        if !self.pod_group_backoff.is_zero() {
            match self.pg_mgr.list_siblings(pod) {
                Ok(siblings) if siblings.len() as i64 >= pg.spec.min_member as i64 => {
                    self.pg_mgr
                        .backoff_pod_group(&pg_full_name, self.pod_group_backoff);
                }
                Ok(_) => {}
                Err(err) => return Status::error(err.to_string()),
            }
        }

        let rejected = self.waiting_pods.reject_matching(
            NAME,
            "optimistic rejection in PostFilter",
            |waiting| Self::in_same_group(waiting, &pg.metadata.name, &pod.metadata.namespace),
        );
        if rejected > 0 {
            debug!(
                "PostFilter rejected {} waiting pods of group {:?}",
                rejected, pg_full_name
            );
        }
        self.pg_mgr.delete_permitted_pod_group(&pg_full_name);
        Status::unschedulable(format!(
            "PodGroup {} gets rejected due to Pod {} is unschedulable even after PostFilter",
            pg_full_name, pod.metadata.name
        ))
    }
}

impl ReservePlugin for Coscheduling {
    /// Rejects waiting siblings when the pod fails after reserve.
    fn unreserve(&self, _state: &mut CycleState, pod: &Pod, _node_name: &str) {
        let (pg_full_name, pg) = self.pg_mgr.get_pod_group(pod);
        let Some(pg) = pg else {
            return;
        };
        self.waiting_pods
            .reject_matching(NAME, "rejection in Unreserve", |waiting| {
                Self::in_same_group(waiting, &pg.metadata.name, &pod.metadata.namespace)
            });
        self.pg_mgr.delete_permitted_pod_group(&pg_full_name);
    }
}

impl PermitPlugin for Coscheduling {
    fn permit(&self, state: &mut CycleState, pod: &Pod, node_name: &str) -> (Status, Duration) {
        match self.pg_mgr.permit(state, pod) {
            PermitStatus::PodGroupNotSpecified => (Status::success(), Duration::ZERO),
            PermitStatus::PodGroupNotFound => (
                Status::unschedulable(PermitStatus::PodGroupNotFound.to_string()),
                Duration::ZERO,
            ),
            PermitStatus::Wait => {
                let (_, pg) = self.pg_mgr.get_pod_group(pod);
                let wait_time = wait_time_duration(pg.as_ref(), Some(self.schedule_timeout));
                debug!(
                    "Pod {:?} waits on node {:?} for the rest of its group, up to {:?}",
                    pod.namespaced_name(),
                    node_name,
                    wait_time
                );
                self.pg_mgr.activate_siblings(pod, state);
                (
                    Status::new(Code::Wait, "waiting for the rest of the pod group"),
                    wait_time,
                )
            }
            PermitStatus::Success => {
                let pg_full_name = pod_group_full_name(pod);
                self.waiting_pods.allow_matching(NAME, |waiting| {
                    pod_group_full_name(waiting) == pg_full_name
                });
                (Status::success(), Duration::ZERO)
            }
        }
    }
}
