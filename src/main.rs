use std::cell::RefCell;
use std::env;
use std::rc::Rc;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use kubernetriks_sched_plugins::config::{default_scheduler_config, ClusterState, SchedulerConfig};
use kubernetriks_sched_plugins::core::clock::SystemClock;
use kubernetriks_sched_plugins::core::scheduler::scheduler::{Scheduler, SchedulerError};
use kubernetriks_sched_plugins::metrics::collector::MetricsCollector;
use kubernetriks_sched_plugins::metrics::printer::{print_metrics, print_metrics_as_pretty_table};

#[derive(Parser)]
struct Args {
    /// Scheduler config, the built-in default profile is used when omitted.
    #[clap(short, long)]
    config_file: Option<std::path::PathBuf>,
    /// Nodes, pods and scheduling objects to start from, yaml or json.
    #[clap(long)]
    cluster_file: std::path::PathBuf,
    /// Maximum number of scheduling cycles to run.
    #[clap(long, default_value_t = 100)]
    cycles: usize,
}

fn run(args: Args) -> Result<(), SchedulerError> {
    let config = match &args.config_file {
        Some(path) => {
            info!("Path to config file: {:?}", path);
            SchedulerConfig::from_yaml(&std::fs::read_to_string(path).map_err(|e| {
                SchedulerError::Config(e.into())
            })?)?
        }
        None => default_scheduler_config(),
    };
    info!("Path to cluster file: {:?}", args.cluster_file);
    let cluster = ClusterState::from_file(&args.cluster_file)?;

    let metrics_collector = Rc::new(RefCell::new(MetricsCollector::new()));
    let mut scheduler = Scheduler::from_cluster_state(
        &config,
        cluster,
        Arc::new(SystemClock),
        metrics_collector.clone(),
    )?;

    for cycle in 0..args.cycles {
        let attempts = scheduler.run_scheduling_cycle();
        info!(
            "Cycle {}: {} attempts, {} active, {} unschedulable, {} waiting",
            cycle,
            attempts,
            scheduler.active_len(),
            scheduler.unschedulable_len(),
            scheduler.waiting_len()
        );
        if attempts == 0 && scheduler.waiting_len() == 0 {
            break;
        }
    }

    let printed = match &config.metrics_printer {
        Some(printer_config) => print_metrics(metrics_collector, printer_config),
        None => print_metrics_as_pretty_table(metrics_collector, &mut std::io::stdout()),
    };
    if let Err(e) = printed {
        error!("Failed to print metrics: {}", e);
    }
    Ok(())
}

fn main() {
    // log level INFO by default
    let mut env_logger_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        env_logger_builder.filter_level(log::LevelFilter::Info);
    }
    env_logger_builder.init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
