//! NetworkTopology custom resource: costs between regions and zones of the cluster, grouped in
//! named weighting schemes, and binary searchable lookups over it.

use serde::{Deserialize, Serialize};

use crate::core::common::ObjectMeta;

pub const NETWORK_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
pub const NETWORK_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// Weighting scheme filled by a measurement source which keeps its lists ordered.
/// Every other scheme is considered manually defined and has to be sorted before lookups.
pub const NETWORK_TOPOLOGY_NETPERF_COSTS: &str = "NetperfCosts";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CostInfo {
    pub destination: String,
    pub network_cost: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OriginInfo {
    pub origin: String,
    #[serde(default)]
    pub cost_list: Vec<CostInfo>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TopologyInfo {
    pub topology_key: String,
    #[serde(default)]
    pub origin_list: Vec<OriginInfo>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WeightInfo {
    pub name: String,
    #[serde(default)]
    pub topology_list: Vec<TopologyInfo>,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetworkTopologySpec {
    #[serde(default)]
    pub weights: Vec<WeightInfo>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetworkTopology {
    pub metadata: ObjectMeta,
    pub spec: NetworkTopologySpec,
}

/// Key of a per-node cost map. Not symmetric: (a, b) and (b, a) are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CostKey {
    pub origin: String,
    pub destination: String,
}

impl NetworkTopology {
    /// Sorts every weighting scheme by topology key and every topology level by origin.
    pub fn sort_costs(&mut self) {
        for weight in self.spec.weights.iter_mut() {
            sort_by_topology_key(&mut weight.topology_list);
            for topology in weight.topology_list.iter_mut() {
                sort_by_origin(&mut topology.origin_list);
            }
        }
    }

    pub fn weight(&self, name: &str) -> Option<&WeightInfo> {
        self.spec.weights.iter().find(|w| w.name == name)
    }
}

pub fn sort_by_topology_key(list: &mut [TopologyInfo]) {
    list.sort_by(|a, b| a.topology_key.cmp(&b.topology_key));
}

pub fn sort_by_origin(list: &mut [OriginInfo]) {
    list.sort_by(|a, b| a.origin.cmp(&b.origin));
}

/// Origins of topology level `key`. `list` must be sorted by topology key.
pub fn find_topology_key<'a>(list: &'a [TopologyInfo], key: &str) -> &'a [OriginInfo] {
    match list.binary_search_by(|t| t.topology_key.as_str().cmp(key)) {
        Ok(idx) => &list[idx].origin_list,
        Err(_) => &[],
    }
}

/// Costs from `origin` to its destinations. `list` must be sorted by origin.
pub fn find_origin_costs<'a>(list: &'a [OriginInfo], origin: &str) -> &'a [CostInfo] {
    match list.binary_search_by(|o| o.origin.as_str().cmp(origin)) {
        Ok(idx) => &list[idx].cost_list,
        Err(_) => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_topology() -> NetworkTopology {
        serde_yaml::from_str(
            r#"
        metadata:
          name: nt-test
          uid: nt-1
        spec:
          weights:
          - name: UserDefined
            topology_list:
            - topology_key: topology.kubernetes.io/zone
              origin_list:
              - origin: Z2
                cost_list:
                - destination: Z1
                  network_cost: 5
              - origin: Z1
                cost_list:
                - destination: Z2
                  network_cost: 5
            - topology_key: topology.kubernetes.io/region
              origin_list:
              - origin: us-west-1
                cost_list:
                - destination: us-east-1
                  network_cost: 20
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_lookups_after_sort() {
        let mut topology = make_topology();
        topology.sort_costs();
        let weight = topology.weight("UserDefined").unwrap();

        assert_eq!(NETWORK_TOPOLOGY_REGION, weight.topology_list[0].topology_key);

        let zones = find_topology_key(&weight.topology_list, NETWORK_TOPOLOGY_ZONE);
        assert_eq!(2, zones.len());
        assert_eq!("Z1", zones[0].origin);

        let costs = find_origin_costs(zones, "Z2");
        assert_eq!(1, costs.len());
        assert_eq!("Z1", costs[0].destination);
        assert_eq!(5, costs[0].network_cost);
    }

    #[test]
    fn test_lookup_misses_return_empty() {
        let mut topology = make_topology();
        topology.sort_costs();
        let weight = topology.weight("UserDefined").unwrap();

        assert!(find_topology_key(&weight.topology_list, "rack").is_empty());
        let regions = find_topology_key(&weight.topology_list, NETWORK_TOPOLOGY_REGION);
        assert!(find_origin_costs(regions, "us-east-1").is_empty());
        assert!(topology.weight("NetperfCosts").is_none());
    }
}
