//! Scheduling framework of one profile: runs enabled plugins at every extension point.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use crate::config::{ConfigError, Plugin as PluginConfig, SchedulerProfile};
use crate::core::clock::Clock;
use crate::core::node_info::NodeInfo;
use crate::core::object_store::ObjectStore;
use crate::core::pod::Pod;
use crate::core::scheduler::cycle_state::CycleState;
use crate::core::scheduler::interface::{NodeScore, Plugin, ScheduleError};
use crate::core::scheduler::plugin::PLUGIN_REGISTRY;
use crate::core::scheduler::queue::QueuedPodInfo;
use crate::core::scheduler::status::{Code, Status};
use crate::core::scheduler::waiting_pods::WaitingPods;
use crate::core::snapshot::{SharedLister, SharedSnapshot};

/// Shared services plugins get at construction.
#[derive(Clone)]
pub struct FrameworkHandle {
    pub snapshot: Arc<SharedSnapshot>,
    pub object_store: Arc<dyn ObjectStore>,
    pub waiting_pods: Arc<WaitingPods>,
    pub clock: Arc<dyn Clock>,
}

pub struct Framework {
    scheduler_name: String,
    queue_sort: Option<Arc<dyn Plugin>>,
    pre_filter: Vec<Arc<dyn Plugin>>,
    filter: Vec<Arc<dyn Plugin>>,
    post_filter: Vec<Arc<dyn Plugin>>,
    // Score plugins with their weights.
    score: Vec<(Arc<dyn Plugin>, i64)>,
    reserve: Vec<Arc<dyn Plugin>>,
    permit: Vec<Arc<dyn Plugin>>,
    handle: FrameworkHandle,
}

type Capability = fn(&dyn Plugin) -> bool;

impl Framework {
    /// Instantiates every plugin enabled in `profile` once and checks that it implements each
    /// extension point it is enabled at.
    pub fn new(profile: &SchedulerProfile, handle: FrameworkHandle) -> Result<Self, ConfigError> {
        let mut instances: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
        let mut resolve = |plugins: &[PluginConfig],
                           extension_point: &'static str,
                           implements: Capability|
         -> Result<Vec<Arc<dyn Plugin>>, ConfigError> {
            let mut resolved = vec![];
            for config in plugins.iter() {
                let plugin = match instances.get(&config.name) {
                    Some(plugin) => plugin.clone(),
                    None => {
                        let factory = PLUGIN_REGISTRY
                            .get(config.name.as_str())
                            .ok_or_else(|| ConfigError::UnknownPlugin(config.name.clone()))?;
                        let plugin = factory(&profile.plugin_config, &handle)?;
                        instances.insert(config.name.clone(), plugin.clone());
                        plugin
                    }
                };
                if !implements(plugin.as_ref()) {
                    return Err(ConfigError::UnsupportedExtensionPoint {
                        plugin: config.name.clone(),
                        extension_point,
                    });
                }
                resolved.push(plugin);
            }
            Ok(resolved)
        };

        let plugins = &profile.plugins;
        let mut queue_sort = resolve(&plugins.queue_sort, "QueueSort", |p| {
            p.as_queue_sort().is_some()
        })?;
        if queue_sort.len() > 1 {
            return Err(ConfigError::InvalidArgs(
                "only one queue sort plugin can be enabled".to_string(),
            ));
        }
        let pre_filter = resolve(&plugins.pre_filter, "PreFilter", |p| {
            p.as_pre_filter().is_some()
        })?;
        let filter = resolve(&plugins.filter, "Filter", |p| p.as_filter().is_some())?;
        let post_filter = resolve(&plugins.post_filter, "PostFilter", |p| {
            p.as_post_filter().is_some()
        })?;
        let score_plugins = resolve(&plugins.score, "Score", |p| p.as_score().is_some())?;
        let reserve = resolve(&plugins.reserve, "Reserve", |p| p.as_reserve().is_some())?;
        let permit = resolve(&plugins.permit, "Permit", |p| p.as_permit().is_some())?;

        let score = score_plugins
            .into_iter()
            .zip(plugins.score.iter())
            .map(|(plugin, config)| (plugin, config.weight.unwrap_or(1)))
            .collect();

        Ok(Self {
            scheduler_name: profile.scheduler_name.clone(),
            queue_sort: queue_sort.pop(),
            pre_filter,
            filter,
            post_filter,
            score,
            reserve,
            permit,
            handle,
        })
    }

    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    /// Queue ordering. Without a queue sort plugin pods go by priority, then by the time they
    /// were queued.
    pub fn queue_sort_less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool {
        if let Some(queue_sort) = self.queue_sort.as_ref().and_then(|p| p.as_queue_sort()) {
            return queue_sort.less(a, b);
        }
        if a.pod.spec.priority != b.pod.spec.priority {
            return a.pod.spec.priority > b.pod.spec.priority;
        }
        a.timestamp < b.timestamp
    }

    pub fn run_pre_filter_plugins(&self, state: &mut CycleState, pod: &Pod) -> Status {
        for plugin in self.pre_filter.iter() {
            let Some(pre_filter) = plugin.as_pre_filter() else {
                continue;
            };
            let status = pre_filter.pre_filter(state, pod);
            if !status.is_success() {
                debug!(
                    "PreFilter plugin {} rejected pod {:?}: {}",
                    plugin.name(),
                    pod.namespaced_name(),
                    status.message()
                );
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    pub fn run_filter_plugins(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> Status {
        for plugin in self.filter.iter() {
            let Some(filter) = plugin.as_filter() else {
                continue;
            };
            let status = filter.filter(state, pod, node_info);
            if !status.is_success() {
                trace!(
                    "Filter plugin {} rejected node {:?} for pod {:?}: {}",
                    plugin.name(),
                    node_info.name(),
                    pod.namespaced_name(),
                    status.message()
                );
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    /// Nodes passing all filters, and rejection statuses of the others. An `Error` status from
    /// any filter aborts the cycle.
    pub fn find_nodes_that_fit(
        &self,
        state: &CycleState,
        pod: &Pod,
    ) -> Result<(Vec<Arc<NodeInfo>>, BTreeMap<String, Status>), ScheduleError> {
        let mut feasible = vec![];
        let mut statuses = BTreeMap::new();
        for node_info in self.handle.snapshot.list_nodes()? {
            let status = self.run_filter_plugins(state, pod, &node_info);
            if status.is_success() {
                feasible.push(node_info);
            } else if status.code() == Code::Error {
                return Err(ScheduleError::Internal(status));
            } else {
                statuses.insert(node_info.name().to_string(), status);
            }
        }
        Ok((feasible, statuses))
    }

    pub fn run_post_filter_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        filtered_node_status: &BTreeMap<String, Status>,
    ) -> Status {
        let mut result = Status::unschedulable("no post filter plugin made the pod schedulable");
        for plugin in self.post_filter.iter() {
            let Some(post_filter) = plugin.as_post_filter() else {
                continue;
            };
            let status = post_filter.post_filter(state, pod, filtered_node_status);
            if status.is_success() {
                return status;
            }
            result = status.with_plugin(plugin.name());
        }
        result
    }

    /// Weighted sum of normalized scores of every score plugin for each node.
    pub fn run_score_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Arc<NodeInfo>],
    ) -> Result<Vec<NodeScore>, Status> {
        let mut total: Vec<NodeScore> = nodes
            .iter()
            .map(|node| NodeScore {
                name: node.name().to_string(),
                score: 0,
            })
            .collect();

        for (plugin, weight) in self.score.iter() {
            let Some(score_plugin) = plugin.as_score() else {
                continue;
            };
            let mut scores = Vec::with_capacity(nodes.len());
            for node in nodes.iter() {
                let score = score_plugin
                    .score(state, pod, node.name())
                    .map_err(|status| status.with_plugin(plugin.name()))?;
                scores.push(NodeScore {
                    name: node.name().to_string(),
                    score,
                });
            }
            let status = score_plugin.normalize_score(state, pod, &mut scores);
            if !status.is_success() {
                return Err(status.with_plugin(plugin.name()));
            }
            for (node_total, node_score) in total.iter_mut().zip(scores.iter()) {
                node_total.score += node_score.score * weight;
            }
        }
        Ok(total)
    }

    pub fn run_reserve_plugins_reserve(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> Status {
        for plugin in self.reserve.iter() {
            let Some(reserve) = plugin.as_reserve() else {
                continue;
            };
            let status = reserve.reserve(state, pod, node_name);
            if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }
        Status::success()
    }

    /// Runs unreserve of every reserve plugin in reverse order.
    pub fn run_reserve_plugins_unreserve(&self, state: &mut CycleState, pod: &Pod, node_name: &str) {
        for plugin in self.reserve.iter().rev() {
            if let Some(reserve) = plugin.as_reserve() {
                reserve.unreserve(state, pod, node_name);
            }
        }
    }

    /// Runs permit plugins. When some of them ask to wait, the pod is parked in waiting pods and
    /// a `Wait` status is returned.
    pub fn run_permit_plugins(&self, state: &mut CycleState, pod: &Pod, node_name: &str) -> Status {
        let mut waiting_on: Vec<(String, Duration)> = vec![];
        for plugin in self.permit.iter() {
            let Some(permit) = plugin.as_permit() else {
                continue;
            };
            let (status, timeout) = permit.permit(state, pod, node_name);
            if status.is_wait() {
                waiting_on.push((plugin.name().to_string(), timeout));
            } else if !status.is_success() {
                return status.with_plugin(plugin.name());
            }
        }
        if !waiting_on.is_empty() {
            self.handle
                .waiting_pods
                .add(pod.clone(), node_name, &waiting_on, self.handle.clock.now());
            return Status::new(Code::Wait, "one or more plugins asked to wait");
        }
        Status::success()
    }
}

/// Node with the highest score. Ties go to the node which comes first by name.
pub fn select_host(scores: &[NodeScore]) -> Option<&str> {
    let mut best: Option<&NodeScore> = None;
    for node_score in scores.iter() {
        match best {
            Some(current)
                if current.score > node_score.score
                    || (current.score == node_score.score && current.name <= node_score.name) => {}
            _ => best = Some(node_score),
        }
    }
    best.map(|node_score| node_score.name.as_str())
}

#[cfg(test)]
mod tests {
    use crate::config::{default_scheduler_config, Plugins, SchedulerProfile};
    use crate::test_util::helpers::make_framework_handle;

    use super::*;

    #[test]
    fn test_select_host() {
        let scores = vec![
            NodeScore { name: "node2".to_string(), score: 50 },
            NodeScore { name: "node1".to_string(), score: 50 },
            NodeScore { name: "node3".to_string(), score: 10 },
        ];
        assert_eq!(Some("node1"), select_host(&scores));
        assert_eq!(None, select_host(&[]));
    }

    #[test]
    fn test_unknown_plugin() {
        let profile = SchedulerProfile {
            scheduler_name: "test".to_string(),
            plugins: Plugins {
                filter: vec![PluginConfig::new("ImageLocality")],
                ..Default::default()
            },
            plugin_config: Default::default(),
        };
        let result = Framework::new(&profile, make_framework_handle(vec![], &[]));
        assert!(matches!(result, Err(ConfigError::UnknownPlugin(name)) if name == "ImageLocality"));
    }

    #[test]
    fn test_plugin_at_unsupported_extension_point() {
        let profile = SchedulerProfile {
            scheduler_name: "test".to_string(),
            plugins: Plugins {
                score: vec![PluginConfig::new("Coscheduling")],
                ..Default::default()
            },
            plugin_config: Default::default(),
        };
        let result = Framework::new(&profile, make_framework_handle(vec![], &[]));
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedExtensionPoint { extension_point: "Score", .. })
        ));
    }

    #[test]
    fn test_default_profile_builds() {
        let config = default_scheduler_config();
        let framework =
            Framework::new(&config.profiles[0], make_framework_handle(vec![], &[])).unwrap();
        assert_eq!("default_scheduler", framework.scheduler_name());
        assert_eq!(2, framework.pre_filter.len());
        assert!(Arc::ptr_eq(&framework.pre_filter[0], &framework.permit[0]));
    }
}
