use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::config::{ConfigError, PluginArgs};
use crate::core::scheduler::framework::FrameworkHandle;
use crate::core::scheduler::interface::Plugin;
use crate::plugins::{coscheduling, network_cost, node_resources};

/// Builds a plugin instance for one profile from that profile's arguments.
pub type PluginFactory = fn(&PluginArgs, &FrameworkHandle) -> Result<Arc<dyn Plugin>, ConfigError>;

lazy_static! {
    pub static ref PLUGIN_REGISTRY: HashMap<&'static str, PluginFactory> = {
        HashMap::from([
            (coscheduling::NAME, coscheduling::new as PluginFactory),
            (network_cost::NAME, network_cost::new as PluginFactory),
            (node_resources::FIT_NAME, node_resources::new_fit as PluginFactory),
            (
                node_resources::LEAST_ALLOCATED_NAME,
                node_resources::new_least_allocated as PluginFactory,
            ),
        ])
    };
}
