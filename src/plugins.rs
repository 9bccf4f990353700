pub mod coscheduling;
pub mod network_cost;
pub mod node_resources;
