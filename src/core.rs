pub mod app_group;
pub mod clock;
pub mod common;
pub mod expiring_cache;
pub mod network_topology;
pub mod node;
pub mod node_info;
pub mod object_store;
pub mod pod;
pub mod pod_group;
pub mod resources;
pub mod scheduler;
pub mod snapshot;
