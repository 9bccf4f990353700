//! Extension points of the scheduling framework.
//!
//! Every plugin implements `Plugin` and exposes only the extension points it supports through
//! the `as_*` accessors. The framework never assumes that a plugin implements anything beyond
//! what it returns there.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::core::node_info::NodeInfo;
use crate::core::object_store::ApiError;
use crate::core::pod::Pod;
use crate::core::scheduler::cycle_state::CycleState;
use crate::core::scheduler::queue::QueuedPodInfo;
use crate::core::scheduler::status::Status;
use crate::core::snapshot::SnapshotError;

pub const MIN_NODE_SCORE: i64 = 0;
pub const MAX_NODE_SCORE: i64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("no profile for scheduler name {0:?}")]
    UnknownProfile(String),
    #[error("pod is unschedulable: {0}")]
    Unschedulable(Status),
    #[error("scheduling cycle failed: {0}")]
    Internal(Status),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn as_queue_sort(&self) -> Option<&dyn QueueSortPlugin> {
        None
    }
    fn as_pre_filter(&self) -> Option<&dyn PreFilterPlugin> {
        None
    }
    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }
    fn as_post_filter(&self) -> Option<&dyn PostFilterPlugin> {
        None
    }
    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }
    fn as_reserve(&self) -> Option<&dyn ReservePlugin> {
        None
    }
    fn as_permit(&self) -> Option<&dyn PermitPlugin> {
        None
    }
}

pub trait QueueSortPlugin {
    /// Whether `a` should be scheduled before `b`.
    fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool;
}

pub trait PreFilterPlugin {
    fn pre_filter(&self, state: &mut CycleState, pod: &Pod) -> Status;
}

pub trait FilterPlugin {
    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status;
}

pub trait PostFilterPlugin {
    /// Called when no node passed filtering. `filtered_node_status` holds the rejection of every
    /// node that was examined.
    fn post_filter(
        &self,
        state: &CycleState,
        pod: &Pod,
        filtered_node_status: &BTreeMap<String, Status>,
    ) -> Status;
}

pub trait ScorePlugin {
    /// Raw score of the node before normalization.
    fn score(&self, state: &CycleState, pod: &Pod, node_name: &str) -> Result<i64, Status>;

    /// Maps raw scores into [MIN_NODE_SCORE, MAX_NODE_SCORE] in place.
    fn normalize_score(&self, _state: &CycleState, _pod: &Pod, _scores: &mut [NodeScore]) -> Status {
        Status::success()
    }
}

pub trait ReservePlugin {
    fn reserve(&self, _state: &mut CycleState, _pod: &Pod, _node_name: &str) -> Status {
        Status::success()
    }

    fn unreserve(&self, state: &mut CycleState, pod: &Pod, node_name: &str);
}

pub trait PermitPlugin {
    /// Returns Success, a rejection, or Wait together with the maximum wait duration.
    fn permit(&self, state: &mut CycleState, pod: &Pod, node_name: &str) -> (Status, Duration);
}
