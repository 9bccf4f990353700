//! Typed context of one pod's scheduling cycle.
//!
//! A new `CycleState` is created for every scheduling attempt and dropped at its end, so it is
//! never shared between concurrently scheduled pods. Each plugin that passes data between its
//! own stages owns one typed slot here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::core::pod::Pod;
use crate::plugins::coscheduling::core::PermitState;
use crate::plugins::network_cost::NetworkCostState;

/// Pods which the scheduling loop should move to the active queue, keyed by `namespace/name`.
/// Shared by all cycles, mutate only while holding the lock.
pub type PodsToActivate = Arc<Mutex<BTreeMap<String, Pod>>>;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("error reading {0:?} from cycle state: not found")]
pub struct StateError(pub &'static str);

pub struct CycleState {
    permit_state: Option<PermitState>,
    network_cost: Option<Arc<NetworkCostState>>,
    pods_to_activate: PodsToActivate,
    cancelled: Arc<AtomicBool>,
}

impl Default for CycleState {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl CycleState {
    pub fn new(pods_to_activate: PodsToActivate) -> Self {
        Self {
            permit_state: None,
            network_cost: None,
            pods_to_activate,
            cancelled: Default::default(),
        }
    }

    pub fn write_permit_state(&mut self, state: PermitState) {
        self.permit_state = Some(state);
    }

    pub fn read_permit_state(&self) -> Result<&PermitState, StateError> {
        self.permit_state
            .as_ref()
            .ok_or(StateError("PermitCoscheduling"))
    }

    pub fn write_network_cost(&mut self, state: NetworkCostState) {
        self.network_cost = Some(Arc::new(state));
    }

    pub fn read_network_cost(&self) -> Result<Arc<NetworkCostState>, StateError> {
        self.network_cost
            .clone()
            .ok_or(StateError("PreFilterNetworkCostAware"))
    }

    pub fn pods_to_activate(&self) -> &PodsToActivate {
        &self.pods_to_activate
    }

    /// Flag which the scheduling loop can set from another thread to abort the cycle.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
