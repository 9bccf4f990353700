pub mod config;
pub mod core;
pub mod metrics;
pub mod plugins;
pub mod test_util;
