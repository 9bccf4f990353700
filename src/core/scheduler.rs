pub mod cycle_state;
pub mod framework;
pub mod interface;
pub mod plugin;
pub mod queue;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod status;
pub mod waiting_pods;
