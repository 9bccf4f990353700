//! Config fields definitions for the scheduler and its plugins.

use serde::Deserialize;
use thiserror::Error;

use crate::core::app_group::AppGroup;
use crate::core::network_topology::NetworkTopology;
use crate::core::node::Node;
use crate::core::pod::{Pod, DEFAULT_SCHEDULER_NAME};
use crate::core::pod_group::PodGroup;

use crate::metrics::printer::MetricsPrinterConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("plugin {0:?} is not registered")]
    UnknownPlugin(String),
    #[error("plugin {plugin:?} does not implement extension point {extension_point}")]
    UnsupportedExtensionPoint {
        plugin: String,
        extension_point: &'static str,
    },
    #[error("invalid plugin arguments: {0}")]
    InvalidArgs(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_pod_max_in_unschedulable_pods_duration() -> f64 {
    crate::core::scheduler::queue::DEFAULT_POD_MAX_IN_UNSCHEDULABLE_PODS_DURATION
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct SchedulerConfig {
    // Pods choose a profile by their `scheduler_name`.
    pub profiles: Vec<SchedulerProfile>,
    /// Seconds after which pods from unschedulable queue are retried regardless of events.
    #[serde(default = "default_pod_max_in_unschedulable_pods_duration")]
    pub pod_max_in_unschedulable_pods_duration: f64,
    #[serde(default)]
    pub metrics_printer: Option<MetricsPrinterConfig>,
}

impl SchedulerConfig {
    pub fn from_yaml(config: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str::<SchedulerConfig>(config)?)
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct SchedulerProfile {
    pub scheduler_name: String,
    pub plugins: Plugins,
    #[serde(default)]
    pub plugin_config: PluginArgs,
}

#[derive(Default, Debug, Deserialize, PartialEq, Clone)]
pub struct Plugins {
    // Each extension point is a list of enabled plugins which are registered globally in plugin registry.
    #[serde(default)]
    pub queue_sort: Vec<Plugin>,
    #[serde(default)]
    pub pre_filter: Vec<Plugin>,
    #[serde(default)]
    pub filter: Vec<Plugin>,
    #[serde(default)]
    pub post_filter: Vec<Plugin>,
    #[serde(default)]
    pub score: Vec<Plugin>,
    #[serde(default)]
    pub reserve: Vec<Plugin>,
    #[serde(default)]
    pub permit: Vec<Plugin>,
}

// Plugin specifies a plugin name and its weight when applicable.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Plugin {
    pub name: String,
    // Weight is used only for Score plugins.
    #[serde(default)]
    pub weight: Option<i64>,
}

impl Plugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            weight: None,
        }
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Clone)]
pub struct PluginArgs {
    #[serde(default)]
    pub coscheduling: CoschedulingArgs,
    #[serde(default)]
    pub network_cost_aware: NetworkCostArgs,
}

fn default_permit_waiting_time_seconds() -> u64 {
    60
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct CoschedulingArgs {
    /// Default time a pod group may wait in permit stage, also the lifetime of a passed
    /// resource check.
    #[serde(default = "default_permit_waiting_time_seconds")]
    pub permit_waiting_time_seconds: u64,
    /// Backoff applied to a pod group after a failed scheduling attempt. 0 disables backoff.
    #[serde(default)]
    pub pod_group_backoff_seconds: u64,
}

impl Default for CoschedulingArgs {
    fn default() -> Self {
        Self {
            permit_waiting_time_seconds: default_permit_waiting_time_seconds(),
            pod_group_backoff_seconds: 0,
        }
    }
}

fn default_namespaces() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_weights_name() -> String {
    "UserDefined".to_string()
}

fn default_network_topology_name() -> String {
    "nt-default".to_string()
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct NetworkCostArgs {
    /// Namespaces searched in order for AppGroup and NetworkTopology objects.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
    /// Weighting scheme of the NetworkTopology to use.
    #[serde(default = "default_weights_name")]
    pub weights_name: String,
    #[serde(default = "default_network_topology_name")]
    pub network_topology_name: String,
}

impl Default for NetworkCostArgs {
    fn default() -> Self {
        Self {
            namespaces: default_namespaces(),
            weights_name: default_weights_name(),
            network_topology_name: default_network_topology_name(),
        }
    }
}

/// Profile with gang admission, resource fit and network-cost-aware placement enabled.
pub fn default_scheduler_config() -> SchedulerConfig {
    let coscheduling = || Plugin::new("Coscheduling");
    let network_cost = || Plugin::new("NetworkCostAware");
    SchedulerConfig {
        profiles: vec![SchedulerProfile {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            plugins: Plugins {
                queue_sort: vec![coscheduling()],
                pre_filter: vec![coscheduling(), network_cost()],
                filter: vec![Plugin::new("Fit"), network_cost()],
                post_filter: vec![coscheduling()],
                score: vec![
                    Plugin {
                        name: "NetworkCostAware".to_string(),
                        weight: Some(1),
                    },
                    Plugin {
                        name: "LeastAllocatedResources".to_string(),
                        weight: Some(1),
                    },
                ],
                reserve: vec![coscheduling()],
                permit: vec![coscheduling()],
            },
            plugin_config: Default::default(),
        }],
        pod_max_in_unschedulable_pods_duration: default_pod_max_in_unschedulable_pods_duration(),
        metrics_printer: None,
    }
}

/// Content of a cluster file: objects the scheduler starts from.
#[derive(Default, Debug, Deserialize, PartialEq, Clone)]
pub struct ClusterState {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub pod_groups: Vec<PodGroup>,
    #[serde(default)]
    pub app_groups: Vec<AppGroup>,
    #[serde(default)]
    pub network_topologies: Vec<NetworkTopology>,
}

impl ClusterState {
    /// Parses json when `path` ends with `.json`, yaml otherwise.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        if path.extension().map_or(false, |ext| ext == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_with_defaults() {
        let config = SchedulerConfig::from_yaml(
            r#"
        profiles:
        - scheduler_name: default_scheduler
          plugins:
            pre_filter:
            - name: Coscheduling
            score:
            - name: NetworkCostAware
              weight: 2
          plugin_config:
            network_cost_aware:
              namespaces: [ns1, ns2]
              network_topology_name: nt-test
        "#,
        )
        .unwrap();

        let profile = &config.profiles[0];
        assert_eq!(Some(2), profile.plugins.score[0].weight);
        assert!(profile.plugins.filter.is_empty());
        assert_eq!(60, profile.plugin_config.coscheduling.permit_waiting_time_seconds);
        assert_eq!(0, profile.plugin_config.coscheduling.pod_group_backoff_seconds);
        assert_eq!(
            vec!["ns1".to_string(), "ns2".to_string()],
            profile.plugin_config.network_cost_aware.namespaces
        );
        assert_eq!("UserDefined", profile.plugin_config.network_cost_aware.weights_name);
        assert_eq!(300.0, config.pod_max_in_unschedulable_pods_duration);
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(matches!(
            SchedulerConfig::from_yaml("profiles: 42"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_parse_cluster_state() {
        let cluster: ClusterState = serde_yaml::from_str(
            r#"
        nodes:
        - metadata:
            name: node1
            labels:
              topology.kubernetes.io/zone: Z1
          status:
            capacity:
              cpu: 4000
              memory: 8192
              pods: 10
        pods:
        - metadata:
            name: pod1
            uid: pod1
          spec:
            resources:
              requests:
                cpu: 1000
        "#,
        )
        .unwrap();
        assert_eq!("Z1", cluster.nodes[0].zone());
        assert_eq!(Some(&4000), cluster.nodes[0].allocatable().get("cpu"));
        assert_eq!("default_scheduler", cluster.pods[0].spec.scheduler_name);
    }
}
