//! Pods held in permit stage until every plugin which asked them to wait allows them, one of
//! those plugins rejects them, or their deadline passes.
//!
//! Nothing here runs timers: the scheduling loop calls `take_resolved` with the current time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::debug;

use crate::core::pod::Pod;

#[derive(Debug, Clone, PartialEq)]
pub enum WaitingPodState {
    Waiting,
    Allowed,
    Rejected { plugin: String, message: String },
}

#[derive(Debug, Clone)]
pub struct WaitingPod {
    pub pod: Pod,
    pub node_name: String,
    pub deadline: Instant,
    pending_plugins: BTreeSet<String>,
    state: WaitingPodState,
}

impl WaitingPod {
    pub fn state(&self) -> &WaitingPodState {
        &self.state
    }

    fn allow(&mut self, plugin: &str) {
        if self.state != WaitingPodState::Waiting {
            return;
        }
        self.pending_plugins.remove(plugin);
        if self.pending_plugins.is_empty() {
            self.state = WaitingPodState::Allowed;
        }
    }

    fn reject(&mut self, plugin: &str, message: &str) {
        if self.state != WaitingPodState::Waiting {
            return;
        }
        self.state = WaitingPodState::Rejected {
            plugin: plugin.to_string(),
            message: message.to_string(),
        };
    }
}

#[derive(Default)]
pub struct WaitingPods {
    // Keyed by pod uid.
    pods: RwLock<BTreeMap<String, WaitingPod>>,
}

impl WaitingPods {
    pub fn new() -> Self {
        Default::default()
    }

    /// Parks `pod` until every plugin in `plugins` allows it. The deadline is the shortest of
    /// their timeouts.
    pub fn add(&self, pod: Pod, node_name: &str, plugins: &[(String, Duration)], now: Instant) {
        let timeout = plugins
            .iter()
            .map(|(_, timeout)| *timeout)
            .min()
            .unwrap_or(Duration::ZERO);
        debug!(
            "Pod {:?} waits on permit at node {:?} for {:?}",
            pod.namespaced_name(),
            node_name,
            timeout
        );
        let waiting_pod = WaitingPod {
            node_name: node_name.to_string(),
            deadline: now + timeout,
            pending_plugins: plugins.iter().map(|(name, _)| name.clone()).collect(),
            state: WaitingPodState::Waiting,
            pod,
        };
        self.pods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(waiting_pod.pod.metadata.uid.clone(), waiting_pod);
    }

    pub fn remove(&self, uid: &str) -> Option<WaitingPod> {
        self.pods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid)
    }

    pub fn len(&self) -> usize {
        self.pods.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allow(&self, uid: &str, plugin: &str) {
        if let Some(waiting_pod) = self
            .pods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(uid)
        {
            waiting_pod.allow(plugin);
        }
    }

    /// Allows on behalf of `plugin` every waiting pod matching `predicate`. Returns how many
    /// pods matched.
    pub fn allow_matching<F>(&self, plugin: &str, predicate: F) -> usize
    where
        F: Fn(&Pod) -> bool,
    {
        let mut pods = self.pods.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for waiting_pod in pods.values_mut().filter(|wp| predicate(&wp.pod)) {
            waiting_pod.allow(plugin);
            count += 1;
        }
        count
    }

    /// Rejects on behalf of `plugin` every waiting pod matching `predicate`. Returns how many
    /// pods matched.
    pub fn reject_matching<F>(&self, plugin: &str, message: &str, predicate: F) -> usize
    where
        F: Fn(&Pod) -> bool,
    {
        let mut pods = self.pods.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for waiting_pod in pods.values_mut().filter(|wp| predicate(&wp.pod)) {
            waiting_pod.reject(plugin, message);
            count += 1;
        }
        count
    }

    /// Removes and returns pods which are allowed, rejected or past their deadline. Expired pods
    /// are returned as rejected.
    pub fn take_resolved(&self, now: Instant) -> Vec<WaitingPod> {
        let mut pods = self.pods.write().unwrap_or_else(PoisonError::into_inner);
        for waiting_pod in pods.values_mut() {
            if waiting_pod.state == WaitingPodState::Waiting && waiting_pod.deadline <= now {
                let plugin = waiting_pod
                    .pending_plugins
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_default();
                waiting_pod.reject(&plugin, "rejected due to timeout after waiting at permit");
            }
        }
        let resolved: Vec<String> = pods
            .iter()
            .filter(|(_, wp)| wp.state != WaitingPodState::Waiting)
            .map(|(uid, _)| uid.clone())
            .collect();
        resolved
            .iter()
            .filter_map(|uid| pods.remove(uid))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str) -> Pod {
        Pod::new("default", name, Default::default())
    }

    #[test]
    fn test_allowed_by_all_plugins() {
        let now = Instant::now();
        let waiting = WaitingPods::new();
        waiting.add(
            pod("p1"),
            "node1",
            &[
                ("A".to_string(), Duration::from_secs(10)),
                ("B".to_string(), Duration::from_secs(5)),
            ],
            now,
        );
        waiting.allow("default/p1", "A");
        assert!(waiting.take_resolved(now + Duration::from_secs(4)).is_empty());

        waiting.allow("default/p1", "B");
        let resolved = waiting.take_resolved(now);
        assert_eq!(1, resolved.len());
        assert_eq!(&WaitingPodState::Allowed, resolved[0].state());
        assert!(waiting.is_empty());
    }

    #[test]
    fn test_deadline_is_the_shortest_plugin_timeout() {
        let now = Instant::now();
        let waiting = WaitingPods::new();
        waiting.add(
            pod("p1"),
            "node1",
            &[
                ("A".to_string(), Duration::from_secs(10)),
                ("B".to_string(), Duration::from_secs(5)),
            ],
            now,
        );

        assert!(waiting.take_resolved(now + Duration::from_millis(4999)).is_empty());
        let expired = waiting.take_resolved(now + Duration::from_secs(5));
        assert_eq!(1, expired.len());
        assert_eq!(now + Duration::from_secs(5), expired[0].deadline);
        assert!(matches!(expired[0].state(), WaitingPodState::Rejected { .. }));
    }

    #[test]
    fn test_reject_matching_and_timeout() {
        let now = Instant::now();
        let waiting = WaitingPods::new();
        let plugins = [("Coscheduling".to_string(), Duration::from_secs(10))];
        waiting.add(pod("a-1"), "node1", &plugins, now);
        waiting.add(pod("a-2"), "node1", &plugins, now);
        waiting.add(pod("b-1"), "node2", &plugins, now);

        let rejected = waiting.reject_matching("Coscheduling", "group failed", |p| {
            p.metadata.name.starts_with("a-")
        });
        assert_eq!(2, rejected);
        assert_eq!(2, waiting.take_resolved(now).len());

        let expired = waiting.take_resolved(now + Duration::from_secs(10));
        assert_eq!(1, expired.len());
        assert!(matches!(
            expired[0].state(),
            WaitingPodState::Rejected { plugin, .. } if plugin == "Coscheduling"
        ));
    }
}
