use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use kubernetriks_sched_plugins::config::{default_scheduler_config, ClusterState, PluginArgs};
use kubernetriks_sched_plugins::core::clock::FakeClock;
use kubernetriks_sched_plugins::core::network_topology::{
    NETWORK_TOPOLOGY_REGION, NETWORK_TOPOLOGY_ZONE,
};
use kubernetriks_sched_plugins::core::node::Node;
use kubernetriks_sched_plugins::core::pod::Pod;
use kubernetriks_sched_plugins::core::scheduler::cycle_state::CycleState;
use kubernetriks_sched_plugins::core::scheduler::scheduler::Scheduler;
use kubernetriks_sched_plugins::metrics::collector::MetricsCollector;
use kubernetriks_sched_plugins::plugins::network_cost::{self, NetworkCostState};
use kubernetriks_sched_plugins::test_util::helpers::{
    make_app_group, make_app_pod, make_network_topology, make_node, make_test_env,
};

fn make_nodes(n1_cpu: i64) -> Vec<Node> {
    vec![
        make_node("n1", n1_cpu, 16384, 10).with_topology("R1", "Z1"),
        make_node("n2", 8000, 16384, 10).with_topology("R1", "Z2"),
        make_node("n3", 8000, 16384, 10).with_topology("R2", "Z3"),
    ]
}

fn make_cluster(nodes: Vec<Node>, pods: Vec<Pod>) -> ClusterState {
    ClusterState {
        nodes,
        pods,
        app_groups: vec![make_app_group(
            "default",
            "ag",
            &[("P1", vec![("P2", 20)]), ("P2", vec![])],
        )],
        network_topologies: vec![make_network_topology(
            "default",
            "nt-default",
            "UserDefined",
            &[
                (NETWORK_TOPOLOGY_ZONE, "Z3", "Z1", 30),
                (NETWORK_TOPOLOGY_ZONE, "Z1", "Z2", 10),
                (NETWORK_TOPOLOGY_REGION, "R2", "R1", 50),
                (NETWORK_TOPOLOGY_REGION, "R1", "R2", 50),
            ],
        )],
        ..Default::default()
    }
}

fn create_scheduler(cluster: ClusterState) -> Scheduler {
    let _ = env_logger::try_init();
    Scheduler::from_cluster_state(
        &default_scheduler_config(),
        cluster,
        Arc::new(FakeClock::new()),
        Rc::new(RefCell::new(MetricsCollector::new())),
    )
    .unwrap()
}

fn assigned_node(scheduler: &Scheduler, name: &str) -> String {
    scheduler
        .object_store()
        .get_pod("default", name)
        .unwrap()
        .spec
        .node_name
}

#[test]
fn test_pod_is_placed_next_to_its_dependency() {
    let placed = make_app_pod("default", "p2-1", "ag", "P2").with_node_name("n1");
    let pending = make_app_pod("default", "p1-1", "ag", "P1");
    let mut scheduler = create_scheduler(make_cluster(make_nodes(8000), vec![placed, pending]));

    scheduler.run_scheduling_cycle();
    // n1 has less free resources than n2 but hosts the dependency.
    assert_eq!("n1", assigned_node(&scheduler, "p1-1"));
}

#[test]
fn test_node_violating_max_cost_is_filtered() {
    // The dependency node is full, n3 is across regions beyond the allowed cost.
    let placed = make_app_pod("default", "p2-1", "ag", "P2").with_node_name("n1");
    let pending = make_app_pod("default", "p1-1", "ag", "P1");
    let mut scheduler = create_scheduler(make_cluster(make_nodes(150), vec![placed, pending]));

    scheduler.run_scheduling_cycle();
    assert_eq!("n2", assigned_node(&scheduler, "p1-1"));
}

#[test]
fn test_only_violating_nodes_left() {
    let placed = make_app_pod("default", "p2-1", "ag", "P2").with_node_name("n1");
    let pending = make_app_pod("default", "p1-1", "ag", "P1");
    let nodes = vec![
        make_node("n1", 150, 16384, 10).with_topology("R1", "Z1"),
        make_node("n3", 8000, 16384, 10).with_topology("R2", "Z3"),
    ];
    let mut scheduler = create_scheduler(make_cluster(nodes, vec![placed, pending]));

    scheduler.run_scheduling_cycle();
    assert!(assigned_node(&scheduler, "p1-1").is_empty());
    assert_eq!(1, scheduler.unschedulable_len());
}

#[test]
fn test_concurrent_pre_filter() {
    let placed = make_app_pod("default", "p2-1", "ag", "P2").with_node_name("n1");
    let env = make_test_env(make_nodes(8000), &[placed.clone()]);
    let cluster = make_cluster(vec![], vec![]);
    env.store.add_pod(placed).unwrap();
    for app_group in cluster.app_groups.into_iter() {
        env.store.add_app_group(app_group).unwrap();
    }
    for network_topology in cluster.network_topologies.into_iter() {
        env.store.add_network_topology(network_topology).unwrap();
    }
    let plugin = network_cost::new(&PluginArgs::default(), &env.handle).unwrap();

    let results: Vec<NetworkCostState> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let plugin = plugin.clone();
                s.spawn(move || {
                    let pod = make_app_pod("default", &format!("p1-{}", idx), "ag", "P1");
                    let mut state = CycleState::default();
                    assert!(plugin
                        .as_pre_filter()
                        .unwrap()
                        .pre_filter(&mut state, &pod)
                        .is_success());
                    state.read_network_cost().unwrap().as_ref().clone()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in results.iter() {
        let NetworkCostState::Computed(costs) = result else {
            panic!("costs were not computed");
        };
        assert_eq!(Some(&0), costs.final_cost_map.get("n1"));
        assert_eq!(Some(&50), costs.final_cost_map.get("n3"));
    }
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}
