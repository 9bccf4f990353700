use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, fs::File, io::Write, rc::Rc};

use crate::metrics::collector::{EstimatorWrapper, MetricsCollector};

#[derive(Debug, Default, Deserialize, PartialEq, Clone)]
pub enum OutputFormat {
    #[default]
    JSON,
    PrettyTable,
}

#[derive(Debug, Default, Deserialize, PartialEq, Clone)]
pub struct MetricsPrinterConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub output_file: std::path::PathBuf,
}

pub fn print_metrics(
    collector: Rc<RefCell<MetricsCollector>>,
    config: &MetricsPrinterConfig,
) -> std::io::Result<()> {
    let mut metrics_file = File::create(&config.output_file)?;
    match config.format {
        OutputFormat::PrettyTable => print_metrics_as_pretty_table(collector, &mut metrics_file),
        OutputFormat::JSON => print_metrics_as_json(collector, &mut metrics_file),
    }
}

pub fn print_metrics_as_pretty_table<W: Write>(
    collector: Rc<RefCell<MetricsCollector>>,
    out: &mut W,
) -> std::io::Result<()> {
    let metrics = collector.borrow();

    let mut aggregated_table = Table::new();
    aggregated_table.add_row(row!["Metric", "Count"]);
    aggregated_table.add_row(row!["Scheduling attempts", metrics.scheduling_attempts]);
    aggregated_table.add_row(row!["Pods scheduled", metrics.pods_scheduled]);
    aggregated_table.add_row(row!["Pods unschedulable", metrics.pods_unschedulable]);
    aggregated_table.add_row(row!["Scheduling errors", metrics.scheduling_errors]);
    aggregated_table.add_row(row!["Pods waiting on permit", metrics.pods_waiting_on_permit]);
    aggregated_table.add_row(row!["Pods rejected on permit", metrics.pods_rejected_on_permit]);
    aggregated_table.add_row(row!["Pods activated", metrics.pods_activated]);

    let mut stats_table = Table::new();
    stats_table.add_row(row!["Metric", "Min", "Max", "Mean", "Variance"]);
    let stats_row = |name: &str, stats: &EstimatorWrapper| {
        row![
            name,
            stats.min(),
            stats.max(),
            stats.mean(),
            stats.population_variance()
        ]
    };
    stats_table.add_row(stats_row(
        "Pod scheduling algorithm latency",
        &metrics.pod_scheduling_algorithm_latency_stats,
    ));
    stats_table.add_row(stats_row(
        "Pod scheduling attempts",
        &metrics.pod_scheduling_attempts_stats,
    ));

    aggregated_table.print(out)?;
    stats_table.print(out)?;
    Ok(())
}

#[derive(Serialize)]
struct MetricsJSON {
    counters: Counters,
    timings: Timings,
}

#[derive(Serialize)]
struct Counters {
    scheduling_attempts: u64,
    pods_scheduled: u64,
    pods_unschedulable: u64,
    scheduling_errors: u64,
    pods_waiting_on_permit: u64,
    pods_rejected_on_permit: u64,
    pods_activated: u64,
}

#[derive(Serialize)]
struct Timings {
    pod_scheduling_algorithm_latency: TimingsStats,
    pod_scheduling_attempts: TimingsStats,
}

#[derive(Serialize)]
struct TimingsStats {
    min: f64,
    max: f64,
    mean: f64,
    variance: f64,
}

impl From<&EstimatorWrapper> for TimingsStats {
    fn from(stats: &EstimatorWrapper) -> Self {
        Self {
            min: stats.min(),
            max: stats.max(),
            mean: stats.mean(),
            variance: stats.population_variance(),
        }
    }
}

pub fn print_metrics_as_json<W: Write>(
    collector: Rc<RefCell<MetricsCollector>>,
    out: &mut W,
) -> std::io::Result<()> {
    let metrics = collector.borrow();

    let metrics = MetricsJSON {
        counters: Counters {
            scheduling_attempts: metrics.scheduling_attempts,
            pods_scheduled: metrics.pods_scheduled,
            pods_unschedulable: metrics.pods_unschedulable,
            scheduling_errors: metrics.scheduling_errors,
            pods_waiting_on_permit: metrics.pods_waiting_on_permit,
            pods_rejected_on_permit: metrics.pods_rejected_on_permit,
            pods_activated: metrics.pods_activated,
        },
        timings: Timings {
            pod_scheduling_algorithm_latency: (&metrics.pod_scheduling_algorithm_latency_stats)
                .into(),
            pod_scheduling_attempts: (&metrics.pod_scheduling_attempts_stats).into(),
        },
    };

    let serialized_json = serde_json::to_string_pretty(&metrics)?;
    out.write_all(serialized_json.as_bytes())
}
