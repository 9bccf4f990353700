//! Implements centralized storage for scheduling metrics. The scheduling loop reports here
//! outcomes of every pod attempt and resolution of pods waiting at permit stage.

use average::{concatenate, Estimate, Max, Mean, Min, Variance};

concatenate!(
    Estimator,
    [Min, min],
    [Max, max],
    [Mean, mean],
    [Variance, population_variance]
);

#[derive(Debug)]
pub struct EstimatorWrapper {
    estimator: Estimator,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("mean", &self.mean)
            .field("population_variance", &self.population_variance)
            .finish()
    }
}

impl Default for EstimatorWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl EstimatorWrapper {
    pub fn new() -> Self {
        Self {
            estimator: Estimator::new(),
        }
    }

    pub fn add(&mut self, value: f64) {
        self.estimator.add(value);
    }

    pub fn min(&self) -> f64 {
        self.estimator.min()
    }

    pub fn max(&self) -> f64 {
        self.estimator.max()
    }

    pub fn mean(&self) -> f64 {
        self.estimator.mean()
    }

    pub fn population_variance(&self) -> f64 {
        self.estimator.population_variance()
    }
}

impl PartialEq for EstimatorWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.min() == other.min()
            && self.max() == other.max()
            && self.mean() == other.mean()
            && self.population_variance() == other.population_variance()
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    /// The number of pods popped from the active queue and run through a scheduling cycle.
    pub scheduling_attempts: u64,
    /// The number of pods bound to a node, either directly or after waiting at permit stage.
    pub pods_scheduled: u64,
    /// The number of attempts which ended with the pod moved to the unschedulable queue.
    pub pods_unschedulable: u64,
    /// The number of attempts which failed with an internal plugin error.
    pub scheduling_errors: u64,
    /// The number of pods parked at permit stage.
    pub pods_waiting_on_permit: u64,
    /// The number of waiting pods rejected by a plugin or by timeout.
    pub pods_rejected_on_permit: u64,
    /// The number of pods moved to the active queue on request of a plugin.
    pub pods_activated: u64,

    /// Estimations for the wall time (secs) of one scheduling cycle of one pod, from popping it
    /// from the queue to the scheduling decision.
    pub pod_scheduling_algorithm_latency_stats: EstimatorWrapper,

    /// Estimations for the number of attempts a pod needed before it was bound.
    pub pod_scheduling_attempts_stats: EstimatorWrapper,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn increment_pod_scheduling_algorithm_latency(&mut self, value: f64) {
        self.pod_scheduling_algorithm_latency_stats.add(value);
    }

    pub fn increment_pod_scheduling_attempts(&mut self, value: f64) {
        self.pod_scheduling_attempts_stats.add(value);
    }
}
